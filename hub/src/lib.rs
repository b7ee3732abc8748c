//! The central coverage hub: keeps the registry of services under test,
//! pulls counter profiles from their embedded agents, merges them, and
//! serves coverage metrics over time.

mod client;
mod collect;
mod liveness;
mod metrics_store;
mod proto;
mod sampler;
mod score_set;
mod server;
mod store;
mod worker;

pub use client::HubClient;
pub use collect::CollectError;
pub use collect::collect_profiles;
pub use collect::resolve_addresses;
pub use liveness::Liveness;
pub use liveness::spawn_liveness_sweeper;
pub use metrics_store::MetricsStore;
pub use proto::ProfileRequest;
pub use proto::ServiceUnderTest;
pub use sampler::sample_once;
pub use sampler::spawn_metrics_sampler;
pub use score_set::ScoreSet;
pub use server::HubOptions;
pub use server::hub_router;
pub use server::run_hub;
pub use store::FileStore;
pub use store::MemoryStore;
pub use store::ServiceRegistry;
pub use store::StoreError;
pub use worker::Worker;

use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// Current wall-clock time in unix seconds.
pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
