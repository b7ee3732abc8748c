use crate::score_set::ScoreSet;
use crate::store::ServiceRegistry;
use crate::unix_now;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;
use tracing::warn;

/// An agent that has sent neither a registration nor a keepalive for this
/// long is treated as gone.
pub const STALE_AFTER: Duration = Duration::from_secs(5 * 60);

/// Last-seen tracking for agent addresses.
///
/// Registration handlers and the eviction sweep both go through the inner
/// mutex, so a keepalive can never resurrect an address mid-eviction.
#[derive(Default)]
pub struct Liveness {
    inner: Mutex<ScoreSet<()>>,
}

impl Liveness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `address` was seen at `now`.
    pub fn touch(&self, address: &str, now: i64) {
        let mut set = self.inner.lock().expect("liveness lock poisoned");
        set.upsert(address, now, ());
    }

    pub fn contains(&self, address: &str) -> bool {
        self.inner
            .lock()
            .expect("liveness lock poisoned")
            .contains(address)
    }

    /// Drops every address last seen at or before `now` minus the staleness
    /// window, deregistering each; returns the evicted addresses.
    pub fn evict_stale(&self, registry: &dyn ServiceRegistry, now: i64) -> Vec<String> {
        let deadline = now - STALE_AFTER.as_secs() as i64;
        let stale = {
            let mut set = self.inner.lock().expect("liveness lock poisoned");
            set.evict_older_than(deadline)
        };
        for address in &stale {
            info!("address:{address} lost connect");
            if let Err(err) = registry.remove(address) {
                warn!("failed to deregister {address}: {err}");
            }
        }
        stale
    }
}

/// Runs the eviction sweep every staleness window for the process lifetime.
pub fn spawn_liveness_sweeper(
    liveness: Arc<Liveness>,
    registry: Arc<dyn ServiceRegistry>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(STALE_AFTER).await;
            liveness.evict_stale(registry.as_ref(), unix_now());
        }
    })
}
