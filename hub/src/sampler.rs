use crate::collect::collect_profiles;
use crate::metrics_store::MetricsStore;
use crate::store::ServiceRegistry;
use crate::unix_now;
use covhub_profile::metrics_data;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;

const SAMPLE_INTERVAL: Duration = Duration::from_secs(60);

/// Samples every registered service's coverage into the metrics store once
/// a minute, for the lifetime of the process.
pub fn spawn_metrics_sampler(
    registry: Arc<dyn ServiceRegistry>,
    metrics: Arc<MetricsStore>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(SAMPLE_INTERVAL).await;
            sample_once(registry.as_ref(), &metrics, unix_now()).await;
        }
    })
}

/// One sampling pass over a registry snapshot. Unreachable agents only
/// lose their tick; the pass continues with the remaining services.
pub async fn sample_once(registry: &dyn ServiceRegistry, metrics: &MetricsStore, ts: i64) {
    for (name, addresses) in registry.get_all() {
        match collect_profiles(&addresses, true, &[], &[]).await {
            Ok(profiles) => {
                let mut md = metrics_data(&profiles);
                md.name = name;
                md.ts = ts;
                metrics.save(md);
            }
            Err(err) => warn!("failed to get profile, err={err}, name={name}"),
        }
    }
    metrics.clear_old();
}
