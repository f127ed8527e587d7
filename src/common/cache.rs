//! Bounded concurrent key-value cache backed by moka.

use std::hash::Hash;

use moka::sync::Cache;

/// Thread-safe in-memory cache with configurable capacity.
///
/// Used by the engine to keep handles of active runs; entries are removed
/// explicitly once a run reports completion.
#[derive(Clone)]
pub struct MemCache<K, V> {
    entries: Cache<K, V>,
}

impl<K, V> MemCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Cache::new(capacity as u64),
        }
    }

    pub fn set(
        &self,
        key: K,
        value: V,
    ) {
        self.entries.insert(key, value);
    }

    pub fn get(
        &self,
        key: &K,
    ) -> Option<V> {
        self.entries.get(key)
    }

    pub fn contains(
        &self,
        key: &K,
    ) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(
        &self,
        key: &K,
    ) -> Option<V> {
        self.entries.remove(key)
    }

    /// Snapshot of all cached values.
    pub fn values(&self) -> Vec<V> {
        self.entries.iter().map(|(_, v)| v).collect()
    }
}
