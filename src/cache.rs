use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use moka::sync::Cache;

use crate::classifier::Classifier;

/// In-memory map from user id to a loaded personalized artifact.
///
/// Strictly a performance layer over the artifact store: bounded capacity
/// with eviction, entries only ever hold successfully loaded *personalized*
/// models (never the global fallback, never failure markers), and dropping
/// any entry changes latency, not answers.
///
/// Fills are coalesced per key: concurrent misses for one user run the
/// loader once while lookups for other users proceed untouched.
#[derive(Clone)]
pub struct ModelCache {
    cache: Cache<String, Arc<Classifier>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl ModelCache {
    pub fn new(capacity: u64) -> Self {
        Self {
            cache: Cache::builder().max_capacity(capacity).build(),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Lookup without side effects.
    pub fn get(&self, user_id: &str) -> Option<Arc<Classifier>> {
        match self.cache.get(user_id) {
            Some(v) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(v)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Cache-aside fill: on a miss, `load` runs under the per-key lock and
    /// its `Some` result is installed; `None` installs nothing, so the next
    /// lookup retries the backing store.
    pub fn get_or_load(
        &self,
        user_id: &str,
        load: impl FnOnce() -> Option<Arc<Classifier>>,
    ) -> Option<Arc<Classifier>> {
        if let Some(hit) = self.cache.get(user_id) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(hit);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.cache.optionally_get_with(user_id.to_string(), load)
    }

    /// Overwrites any prior entry for the user.
    pub fn insert(&self, user_id: &str, classifier: Arc<Classifier>) {
        self.cache.insert(user_id.to_string(), classifier);
    }

    /// Removes the entry for a user. A no-op when absent.
    pub fn invalidate(&self, user_id: &str) {
        self.cache.invalidate(user_id);
    }

    /// Total cache hits.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Total cache misses.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Number of entries currently in the cache.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Drains pending internal maintenance so `entry_count` is exact.
    /// Diagnostics and tests only.
    pub fn flush(&self) {
        self.cache.run_pending_tasks();
    }
}
