//! Options for opening a slide.

use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use crate::tile::{
    LoaderConfig, TileCache, TileNotifier, DEFAULT_EVICTION_WINDOW, DEFAULT_TILE_CACHE_CAPACITY,
};

/// How the tile cache and loader of a slide are set up.
///
/// The high-resolution index and the notifier are owned by the caller: the
/// viewer stores its active layer in the index, and listens on the notifier
/// for newly cached tiles. When they are not supplied the slide runs without
/// resolution-aware admission and creates a private notifier.
#[derive(Debug, Clone)]
pub struct SlideOpenInfo {
    /// Maximum number of cached tiles
    pub capacity: usize,

    /// Active viewing layer, read by the cache for admission and eviction
    pub high_resolution_index: Option<Arc<AtomicU32>>,

    /// Signal fired whenever a tile is cached
    pub notifier: Option<Arc<TileNotifier>>,

    /// Least-recently-used entries considered per eviction
    pub eviction_window: usize,

    /// Worker and back-off settings
    pub loader: LoaderConfig,
}

impl Default for SlideOpenInfo {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_TILE_CACHE_CAPACITY,
            high_resolution_index: None,
            notifier: None,
            eviction_window: DEFAULT_EVICTION_WINDOW,
            loader: LoaderConfig::default(),
        }
    }
}

impl SlideOpenInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_high_resolution_index(mut self, index: Arc<AtomicU32>) -> Self {
        self.high_resolution_index = Some(index);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<TileNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_eviction_window(mut self, window: usize) -> Self {
        self.eviction_window = window;
        self
    }

    pub fn with_loader(mut self, loader: LoaderConfig) -> Self {
        self.loader = loader;
        self
    }

    pub(crate) fn build_cache(&self) -> TileCache {
        let cache = TileCache::with_capacity(self.capacity).with_eviction_window(self.eviction_window);
        match &self.high_resolution_index {
            Some(index) => cache.with_high_resolution_index(index.clone()),
            None => cache,
        }
    }
}
