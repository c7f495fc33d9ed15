//! Cache tiers
//!
//! - [`MemoryCache`]: a sharded byte map; the fast, volatile tier
//! - [`TieredCache`]: fast tier in front of a durable tier, promoting hits
//!
//! Every entry is best-effort. Readers must tolerate a miss at any time, so
//! `clear()` on the fast tier is a valid eviction of everything.

use arbor_core::{CacheStore, Result};
use dashmap::DashMap;
use rustc_hash::FxHasher;
use std::hash::BuildHasherDefault;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

type FxBuildHasher = BuildHasherDefault<FxHasher>;

/// Hit/miss counters of a cache
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    /// Lookups that found an entry
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lookups that found nothing
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    fn record(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// In-process byte cache
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, Vec<u8>, FxBuildHasher>,
    stats: CacheStats,
}

impl MemoryCache {
    /// Empty cache
    pub fn new() -> Self {
        MemoryCache::default()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the cache holds nothing
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evict everything
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Evict entries whose key starts with `prefix`
    pub fn evict_prefix(&self, prefix: &str) {
        self.entries.retain(|key, _| !key.starts_with(prefix));
    }

    /// True if `key` is present
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Lookup counters
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let found = self.entries.get(key).map(|entry| entry.value().clone());
        self.stats.record(found.is_some());
        Ok(found)
    }

    fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Fast cache in front of a durable one
///
/// Reads try the fast tier first and promote durable hits. Writes go to
/// both tiers. A failing fast tier is logged and skipped; durable-tier
/// errors propagate.
pub struct TieredCache {
    fast: Arc<dyn CacheStore>,
    durable: Arc<dyn CacheStore>,
}

impl TieredCache {
    /// Combine two tiers
    pub fn new(fast: Arc<dyn CacheStore>, durable: Arc<dyn CacheStore>) -> Self {
        TieredCache { fast, durable }
    }

    /// The fast tier
    pub fn fast(&self) -> &Arc<dyn CacheStore> {
        &self.fast
    }

    /// The durable tier
    pub fn durable(&self) -> &Arc<dyn CacheStore> {
        &self.durable
    }
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache").finish_non_exhaustive()
    }
}

impl CacheStore for TieredCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.fast.get(key) {
            Ok(Some(bytes)) => return Ok(Some(bytes)),
            Ok(None) => {}
            Err(e) => warn!(target: "arbor::cache", key, error = %e, "Fast cache read failed"),
        }
        let found = self.durable.get(key)?;
        if let Some(bytes) = &found {
            if let Err(e) = self.fast.put(key, bytes.clone()) {
                warn!(target: "arbor::cache", key, error = %e, "Fast cache promotion failed");
            }
        }
        Ok(found)
    }

    fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        if let Err(e) = self.fast.put(key, value.clone()) {
            warn!(target: "arbor::cache", key, error = %e, "Fast cache write failed");
        }
        self.durable.put(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        if let Err(e) = self.fast.remove(key) {
            warn!(target: "arbor::cache", key, error = %e, "Fast cache remove failed");
        }
        self.durable.remove(key)
    }
}
