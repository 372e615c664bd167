use crate::DEFAULT_BLOCK_CACHE_CAPACITY;

/// Reader tuning knobs
///
/// The defaults suit interactive browsing: memory-mapped input, a small block
/// cache and one worker thread per core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderConfig {
    /// Maximum number of decoded blocks kept in the cache (0 disables caching)
    pub block_cache_capacity: usize,
    /// Whether decoded blocks are cached at all
    pub use_block_cache: bool,
    /// Worker threads for block loading (0 means all cores)
    pub num_threads: usize,
    /// Memory-map local files instead of reading through a buffered handle
    pub use_mmap: bool,
}
impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            block_cache_capacity: DEFAULT_BLOCK_CACHE_CAPACITY,
            use_block_cache: true,
            num_threads: 0,
            use_mmap: true,
        }
    }
}
impl ReaderConfig {
    #[must_use]
    pub fn with_block_cache_capacity(mut self, capacity: usize) -> Self {
        self.block_cache_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_block_cache(mut self, enabled: bool) -> Self {
        self.use_block_cache = enabled;
        self
    }

    #[must_use]
    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    #[must_use]
    pub fn with_mmap(mut self, use_mmap: bool) -> Self {
        self.use_mmap = use_mmap;
        self
    }

    /// Whether blocks will actually be cached under this configuration
    #[must_use]
    pub fn caches_blocks(&self) -> bool {
        self.use_block_cache && self.block_cache_capacity > 0
    }
}
