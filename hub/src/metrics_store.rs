use crate::score_set::ScoreSet;
use crate::unix_now;
use covhub_profile::MetricsData;
use std::sync::RwLock;
use std::time::Duration;

/// Services without a fresh sample for this long are dropped wholesale.
const RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Per-service coverage samples over time.
///
/// Two score-ordered levels: services ordered by their last update, and
/// inside each service the samples ordered by timestamp. A single RwLock
/// guards both levels.
#[derive(Default)]
pub struct MetricsStore {
    inner: RwLock<ScoreSet<ScoreSet<MetricsData>>>,
}

impl MetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upserts one sample and marks its service fresh.
    pub fn save(&self, md: MetricsData) {
        self.save_at(md, unix_now());
    }

    fn save_at(&self, mut md: MetricsData, now: i64) {
        if md.name.is_empty() {
            return;
        }
        if md.ts == 0 {
            md.ts = now;
        }
        let mut outer = self.inner.write().expect("metrics lock poisoned");
        let mut series = outer.remove(&md.name).unwrap_or_default();
        let name = md.name.clone();
        series.upsert(&md.ts.to_string(), md.ts, md);
        outer.upsert(&name, now, series);
    }

    /// Samples of `name` with timestamp in `[beg, end]`, ascending.
    pub fn get(&self, name: &str, beg: i64, end: i64) -> Vec<MetricsData> {
        let outer = self.inner.read().expect("metrics lock poisoned");
        let Some(series) = outer.get(name) else {
            return Vec::new();
        };
        series.values_in_range(beg, end).into_iter().cloned().collect()
    }

    /// Drops services whose last update is past the retention window.
    pub fn clear_old(&self) {
        self.clear_older_than(unix_now() - RETENTION.as_secs() as i64);
    }

    fn clear_older_than(&self, deadline: i64) {
        let mut outer = self.inner.write().expect("metrics lock poisoned");
        outer.evict_older_than(deadline);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample(name: &str, ts: i64, rate: f64) -> MetricsData {
        MetricsData {
            name: name.to_string(),
            cover_rate: rate,
            ts,
            ..MetricsData::default()
        }
    }

    #[test]
    fn returns_only_samples_inside_the_range() {
        let store = MetricsStore::new();
        store.save(sample("svc", 100, 10.0));
        store.save(sample("svc", 160, 20.0));
        store.save(sample("svc", 220, 30.0));
        let rates: Vec<f64> = store
            .get("svc", 100, 160)
            .into_iter()
            .map(|md| md.cover_rate)
            .collect();
        assert_eq!(rates, vec![10.0, 20.0]);
        assert!(store.get("other", 0, 999).is_empty());
    }

    #[test]
    fn same_timestamp_upserts_instead_of_duplicating() {
        let store = MetricsStore::new();
        store.save(sample("svc", 100, 10.0));
        store.save(sample("svc", 100, 55.0));
        let samples = store.get("svc", 0, 999);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].cover_rate, 55.0);
    }

    #[test]
    fn stale_services_are_dropped_whole() {
        let store = MetricsStore::new();
        store.save_at(sample("old", 100, 10.0), 1_000);
        store.save_at(sample("fresh", 100, 10.0), 100_000);
        store.clear_older_than(50_000);
        assert!(store.get("old", 0, i64::MAX).is_empty());
        assert_eq!(store.get("fresh", 0, i64::MAX).len(), 1);
    }

    #[test]
    fn missing_timestamp_is_stamped_with_the_clock() {
        let store = MetricsStore::new();
        store.save_at(sample("svc", 0, 10.0), 12_345);
        let samples = store.get("svc", 12_345, 12_345);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].ts, 12_345);
    }

    #[test]
    fn nameless_samples_are_ignored() {
        let store = MetricsStore::new();
        store.save(sample("", 100, 10.0));
        assert!(store.get("", 0, i64::MAX).is_empty());
    }
}
