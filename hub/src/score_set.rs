use std::collections::BTreeSet;
use std::collections::HashMap;
use std::ops::Bound;

/// An associative container whose entries are addressable by key and
/// ordered by an integer score.
///
/// Liveness tracking keys agent addresses by last-seen time; the metrics
/// store keys services by last-update time and samples by timestamp.
pub struct ScoreSet<V> {
    by_key: HashMap<String, (i64, V)>,
    order: BTreeSet<(i64, String)>,
}

impl<V> Default for ScoreSet<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> ScoreSet<V> {
    pub fn new() -> Self {
        Self {
            by_key: HashMap::new(),
            order: BTreeSet::new(),
        }
    }

    /// Inserts `key` with `score`, replacing any previous score and value.
    pub fn upsert(&mut self, key: &str, score: i64, value: V) {
        if let Some((old_score, _)) = self.by_key.get(key) {
            self.order.remove(&(*old_score, key.to_string()));
        }
        self.order.insert((score, key.to_string()));
        self.by_key.insert(key.to_string(), (score, value));
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        let (score, value) = self.by_key.remove(key)?;
        self.order.remove(&(score, key.to_string()));
        Some(value)
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.by_key.get(key).map(|(_, value)| value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Values whose score lies in `[beg, end]`, ascending by (score, key).
    pub fn values_in_range(&self, beg: i64, end: i64) -> Vec<&V> {
        self.order
            .range((Bound::Included((beg, String::new())), Bound::Unbounded))
            .take_while(|(score, _)| *score <= end)
            .map(|(_, key)| &self.by_key[key].1)
            .collect()
    }

    /// Removes every entry with score at or below `max_score`; returns the
    /// evicted keys, ascending by (score, key).
    pub fn evict_older_than(&mut self, max_score: i64) -> Vec<String> {
        let stale: Vec<(i64, String)> = self
            .order
            .iter()
            .take_while(|(score, _)| *score <= max_score)
            .cloned()
            .collect();
        for (score, key) in &stale {
            self.order.remove(&(*score, key.clone()));
            self.by_key.remove(key);
        }
        stale.into_iter().map(|(_, key)| key).collect()
    }
}
