//! Memoization table shared across aggregation calls.
//!
//! Entries never expire on their own. The owner clears them between
//! inventory cycles with [`MemoCache::clear`].

use metrics::counter;
use moka::future::Cache as MokaCache;
use std::future::Future;

/// Concurrent key/value memo table backed by `moka`.
#[derive(Clone)]
pub struct MemoCache<V: Clone + Send + Sync + 'static> {
    name: &'static str,
    cache: MokaCache<String, V>,
}

impl<V: Clone + Send + Sync + 'static> MemoCache<V> {
    /// Creates an empty table. `name` labels the hit/miss metrics.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            cache: MokaCache::builder().build(),
        }
    }

    /// Gets a memoized value.
    pub async fn get(&self, key: &str) -> Option<V> {
        let value = self.cache.get(key).await;
        if value.is_some() {
            counter!("pw_inventory_memo_hits_total", "cache" => self.name).increment(1);
        } else {
            counter!("pw_inventory_memo_misses_total", "cache" => self.name).increment(1);
        }
        value
    }

    /// Returns the memoized value for `key`, computing it on a miss.
    ///
    /// Only `Ok` values are stored; an `Err` is handed back and the next
    /// call computes again. Concurrent misses on the same key may each run
    /// `f`; the last one to finish wins the slot.
    pub async fn get_or_try_compute<E, F, Fut>(&self, key: String, f: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key).await {
            return Ok(value);
        }
        let value = f().await?;
        self.cache.insert(key, value.clone()).await;
        Ok(value)
    }

    /// Drops every entry.
    pub async fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }

    /// Number of stored entries. May lag behind recent inserts.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl<V: Clone + Send + Sync + 'static> std::fmt::Debug for MemoCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoCache")
            .field("name", &self.name)
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}
