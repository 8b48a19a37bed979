//! Bounded result cache.
//!
//! Execution engines publish the resolved hash of every selected output
//! (`T…#name`) they produce. The graph consults the cache when a reduction
//! leaves a referencing thunk waiting on one of those outputs.
//!
//! ## Cache Key Design
//!
//! Keys are xxh64 digests of the raw identifier, so entries stay small no
//! matter how long the selector is.

use std::hash::Hasher;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::RwLock;
use xxhash_rust::xxh64::Xxh64;

use crate::types::DependencyId;
use super::ResultCache;

/// Fallback capacity when zero is configured.
const DEFAULT_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ResultCacheKey(u64);

impl ResultCacheKey {
    fn compute(id: &DependencyId) -> Self {
        let mut hasher = Xxh64::new(0);
        hasher.write(id.hash().as_bytes());
        if let Some(selector) = id.selector() {
            hasher.write(&[0]);
            hasher.write(selector.as_bytes());
        }
        Self(hasher.finish())
    }
}

/// LRU-bounded [`ResultCache`].
///
/// Thread-safe; clones share the same entries.
#[derive(Debug, Clone)]
pub struct LruResultCache {
    entries: Arc<RwLock<LruCache<ResultCacheKey, String>>>,
}

impl LruResultCache {
    /// Create a cache holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        let size = NonZeroUsize::new(capacity)
            .or_else(|| NonZeroUsize::new(DEFAULT_CAPACITY))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Arc::new(RwLock::new(LruCache::new(size))),
        }
    }

    /// Record the resolved hash of `id`.
    pub fn insert(&self, id: &DependencyId, hash: impl Into<String>) {
        self.entries.write().put(ResultCacheKey::compute(id), hash.into());
    }

    /// Current statistics.
    pub fn stats(&self) -> ResultCacheStats {
        let entries = self.entries.read();
        ResultCacheStats {
            len: entries.len(),
            cap: entries.cap().get(),
        }
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl Default for LruResultCache {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_RESULT_CACHE_CAPACITY)
    }
}

impl ResultCache for LruResultCache {
    fn check(&self, id: &DependencyId) -> Option<String> {
        // `get` promotes the entry, so this takes the write lock.
        self.entries.write().get(&ResultCacheKey::compute(id)).cloned()
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultCacheStats {
    /// Current number of entries in the cache.
    pub len: usize,
    /// Maximum capacity of the cache.
    pub cap: usize,
}
