//! Bounded-retention memory of already-processed keys

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::time::Instant;

/// Remembers keys (idempotency tokens, resolved request ids) for a retention
/// window so redelivered messages can be recognized and dropped.
#[derive(Debug)]
pub struct DedupWindow<K> {
    retention: Duration,
    seen: HashMap<K, Instant>,
}

impl<K: Eq + Hash> DedupWindow<K> {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            seen: HashMap::new(),
        }
    }

    /// Whether `key` was recorded within the retention window
    pub fn contains(&self, key: &K) -> bool {
        self.seen
            .get(key)
            .map(|at| at.elapsed() < self.retention)
            .unwrap_or(false)
    }

    /// Record `key`; returns `false` if it was already present
    pub fn record(&mut self, key: K) -> bool {
        self.prune();
        let now = Instant::now();
        match self.seen.insert(key, now) {
            Some(previous) => now.duration_since(previous) >= self.retention,
            None => true,
        }
    }

    /// Forget keys older than the retention window
    pub fn prune(&mut self) {
        let retention = self.retention;
        self.seen.retain(|_, at| at.elapsed() < retention);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
