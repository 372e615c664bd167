//! Bounded LRU cache of decoded blocks

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::debug;
use lru::LruCache;
use parking_lot::Mutex;

use crate::config::ReaderConfig;
use crate::core::{Block, MatrixKey, NormalizationType, Zoom};

/// A thread-safe, capacity-bounded LRU map.
///
/// A capacity of zero yields a cache that never stores anything.
pub struct BoundedCache<K: Hash + Eq, V: Clone> {
    inner: Option<Mutex<LruCache<K, V>>>,
}
impl<K: Hash + Eq, V: Clone> BoundedCache<K, V> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    /// Returns a clone of the cached value and marks it most recently used
    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.as_ref()?.lock().get(key).cloned()
    }

    /// Inserts a value, evicting the least recently used entry when full
    pub fn put(&self, key: K, value: V) {
        if let Some(inner) = &self.inner {
            inner.lock().put(key, value);
        }
    }

    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|inner| inner.lock().contains(key))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.as_ref().map_or(0, |inner| inner.lock().len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.as_ref().map_or(0, |inner| inner.lock().cap().get())
    }

    pub fn clear(&self) {
        if let Some(inner) = &self.inner {
            inner.lock().clear();
        }
    }
}

/// Identity of a decoded block: matrix, resolution, block number and the
/// normalization that was applied to its counts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub matrix: MatrixKey,
    pub zoom: Zoom,
    pub block_number: u32,
    pub norm: NormalizationType,
}
impl CacheKey {
    #[must_use]
    pub fn new(matrix: MatrixKey, zoom: Zoom, block_number: u32, norm: NormalizationType) -> Self {
        Self {
            matrix,
            zoom,
            block_number,
            norm,
        }
    }
}

/// The block cache shared by every matrix of a dataset.
///
/// Caching can be switched off at runtime; turning it off drops every entry.
pub struct BlockCache {
    blocks: BoundedCache<CacheKey, Arc<Block>>,
    enabled: AtomicBool,
}
impl BlockCache {
    #[must_use]
    pub fn new(capacity: usize, enabled: bool) -> Self {
        Self {
            blocks: BoundedCache::new(capacity),
            enabled: AtomicBool::new(enabled && capacity > 0),
        }
    }

    #[must_use]
    pub fn from_config(config: &ReaderConfig) -> Self {
        Self::new(config.block_cache_capacity, config.use_block_cache)
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        let enabled = enabled && self.blocks.capacity() > 0;
        if !self.enabled.swap(enabled, Ordering::AcqRel) && enabled {
            debug!("Block cache enabled");
        } else if !enabled {
            self.blocks.clear();
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<Block>> {
        if !self.is_enabled() {
            return None;
        }
        self.blocks.get(key)
    }

    pub fn put(&self, key: CacheKey, block: Arc<Block>) {
        if self.is_enabled() {
            self.blocks.put(key, block);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.blocks.capacity()
    }

    pub fn clear(&self) {
        self.blocks.clear();
    }
}
