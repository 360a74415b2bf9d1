//! Time-boxed memoization cache for query results.
//!
//! Uses moka's concurrent cache with a fixed time-to-live. Owners clear the whole cache on
//! every mutation of the data the cached results were derived from.

use std::time::Duration;

use moka::sync::Cache;

/// Default time-to-live for memoized query results.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5);
/// Default capacity for memoized query results.
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Thread-safe keyed cache with a fixed TTL.
///
/// Used for:
/// - Port compatibility checks (`MemCache<(NodeId, NodeId), CompatibilityReport>`)
/// - Snap detection results (`MemCache<SnapKey, SnapResult>`)
/// - Manager query results (`MemCache<QueryKey, QueryValue>`)
#[derive(Clone)]
pub struct MemCache<K, V> {
    entries: Cache<K, V>,
    ttl: Duration,
}

impl<K, V> MemCache<K, V>
where
    K: std::hash::Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Allocate a new [`MemCache`] holding entries for `ttl`.
    pub fn new(
        capacity: usize,
        ttl: Duration,
    ) -> Self {
        Self {
            entries: Cache::builder().max_capacity(capacity as u64).time_to_live(ttl).build(),
            ttl,
        }
    }

    /// Store a value.
    pub fn set(
        &self,
        key: K,
        value: V,
    ) {
        self.entries.insert(key, value);
    }

    /// Get a live value through key `&K`.
    pub fn get(
        &self,
        key: &K,
    ) -> Option<V> {
        self.entries.get(key)
    }

    /// Return the cached value or compute, store and return it.
    pub fn get_or_insert_with(
        &self,
        key: K,
        f: impl FnOnce() -> V,
    ) -> V {
        if let Some(v) = self.entries.get(&key) {
            return v;
        }
        let value = f();
        self.entries.insert(key, value.clone());
        value
    }

    /// Remove a value through key `&K`.
    pub fn remove(
        &self,
        key: &K,
    ) {
        self.entries.invalidate(key);
    }

    /// Drop every entry. Called by owners on any mutation that could affect cached results.
    pub fn invalidate_all(&self) {
        self.entries.invalidate_all();
    }

    /// Approximate number of live entries.
    pub fn len(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl<K, V> Default for MemCache<K, V>
where
    K: std::hash::Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL)
    }
}
