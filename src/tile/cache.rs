//! Decoded tile cache.
//!
//! This module provides a capacity-bounded cache mapping tile coordinates to
//! published [`SharedBuffer`]s, preventing repeated decodes of tiles the
//! viewer keeps coming back to.
//!
//! # Locking
//!
//! Entries live behind a reader/writer lock. Lookups take the shared side and
//! record recency in an atomic stamp on the entry, so concurrent readers on
//! the render path never wait for each other. Inserts, evictions and
//! invalidations take the exclusive side.
//!
//! # Eviction
//!
//! Capacity is counted in tiles. When an insert overflows it, the victim is
//! chosen among the `eviction_window` least-recently-used entries:
//!
//! - without a high-resolution index, the least-recently-used entry goes;
//! - with one, the entry whose layer is farthest from the active layer goes,
//!   ties falling back to recency.
//!
//! During continuous zoom this keeps tiles around the active resolution
//! instead of thrashing between adjacent layers.
//!
//! Entries are indexed by the stamp they were last indexed at. A lookup only
//! bumps the entry's atomic stamp; eviction walks the index from the oldest
//! end and re-files entries whose stamp moved, so finding the window costs
//! the window size plus the lookups since the last eviction, not a scan of
//! the whole cache.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::buffer::SharedBuffer;

use super::coord::TileCoord;

/// Default cache capacity: 1000 tiles (~256 MiB of 256x256 RGBA tiles).
pub const DEFAULT_TILE_CACHE_CAPACITY: usize = 1000;

/// Default number of least-recently-used entries considered for eviction.
pub const DEFAULT_EVICTION_WINDOW: usize = 16;

// =============================================================================
// Cache Entry
// =============================================================================

struct CacheEntry {
    buffer: SharedBuffer,
    last_access: AtomicU64,
    /// Key of this entry in `CacheState::order`; only changed under the write lock.
    indexed_at: u64,
}

struct CacheState {
    map: HashMap<TileCoord, CacheEntry>,
    order: BTreeMap<u64, TileCoord>,
}

impl CacheState {
    fn remove(&mut self, coord: TileCoord) -> Option<CacheEntry> {
        let entry = self.map.remove(&coord)?;
        self.order.remove(&entry.indexed_at);
        Some(entry)
    }

    /// Pick an entry to evict, never `keep`.
    ///
    /// Considers the `window` least-recently-used entries; with an active
    /// layer the farthest one wins, otherwise the oldest.
    fn select_victim(
        &mut self,
        keep: TileCoord,
        window: usize,
        high_resolution: Option<u32>,
    ) -> Option<TileCoord> {
        let window = if high_resolution.is_some() { window } else { 1 };
        let mut candidates: Vec<(u64, TileCoord)> = Vec::with_capacity(window);
        let mut kept = None;

        while candidates.len() < window {
            let Some((stamp, coord)) = self.order.pop_first() else {
                break;
            };
            let Some(entry) = self.map.get_mut(&coord) else {
                continue;
            };
            if entry.indexed_at != stamp {
                continue;
            }
            let last_access = *entry.last_access.get_mut();
            if last_access > stamp {
                // Looked up since it was filed
                entry.indexed_at = last_access;
                self.order.insert(last_access, coord);
                continue;
            }
            if coord == keep {
                kept = Some((stamp, coord));
                continue;
            }
            candidates.push((stamp, coord));
        }

        let victim = match high_resolution {
            Some(active) => candidates
                .iter()
                .max_by(|(a_stamp, a), (b_stamp, b)| {
                    a.layer_distance(active)
                        .cmp(&b.layer_distance(active))
                        .then(b_stamp.cmp(a_stamp))
                })
                .map(|(_, coord)| *coord),
            None => candidates.first().map(|(_, coord)| *coord),
        };

        for (stamp, coord) in candidates.into_iter().chain(kept) {
            if Some(coord) != victim {
                self.order.insert(stamp, coord);
            }
        }
        victim
    }
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
}

impl CacheStats {
    /// Fraction of lookups that hit, or 0 when nothing was looked up.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    insertions: AtomicU64,
    evictions: AtomicU64,
}

// =============================================================================
// Tile Cache
// =============================================================================

/// Capacity-bounded map from tile coordinate to decoded tile.
///
/// # Example
///
/// ```
/// use wsi_tile_cache::buffer::Buffer;
/// use wsi_tile_cache::tile::{TileCache, TileCoord};
///
/// let cache = TileCache::with_capacity(2);
/// let coord = TileCoord::new(0, 3);
///
/// assert!(cache.lookup(coord).is_none());
/// cache.insert(coord, Buffer::from_vec(vec![0xAB; 16]).into_shared());
/// assert_eq!(cache.lookup(coord).unwrap().size(), 16);
/// ```
pub struct TileCache {
    state: RwLock<CacheState>,
    capacity: usize,
    eviction_window: usize,
    clock: AtomicU64,
    high_resolution_index: Option<Arc<AtomicU32>>,
    counters: Counters,
}

impl TileCache {
    /// Create a cache with the default capacity (1000 tiles).
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TILE_CACHE_CAPACITY)
    }

    /// Create a cache holding at most `capacity` tiles (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: RwLock::new(CacheState {
                map: HashMap::with_capacity(capacity.min(4096)),
                order: BTreeMap::new(),
            }),
            capacity,
            eviction_window: DEFAULT_EVICTION_WINDOW,
            clock: AtomicU64::new(0),
            high_resolution_index: None,
            counters: Counters::default(),
        }
    }

    /// Read the active viewing layer from `index` for admission and eviction.
    ///
    /// The cache only ever reads the value; whoever drives the view updates it.
    pub fn with_high_resolution_index(mut self, index: Arc<AtomicU32>) -> Self {
        self.high_resolution_index = Some(index);
        self
    }

    /// Set how many least-recently-used entries eviction chooses from.
    ///
    /// A window of 1 is strict LRU.
    pub fn with_eviction_window(mut self, window: usize) -> Self {
        self.eviction_window = window.max(1);
        self
    }

    /// The active viewing layer, if an index was configured.
    pub fn high_resolution_layer(&self) -> Option<u32> {
        self.high_resolution_index
            .as_ref()
            .map(|index| index.load(Ordering::Acquire))
    }

    /// Get a tile, marking it recently used. `None` is a cache miss.
    pub fn lookup(&self, coord: TileCoord) -> Option<SharedBuffer> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        match state.map.get(&coord) {
            Some(entry) => {
                entry.last_access.store(self.tick(), Ordering::Relaxed);
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.buffer.clone())
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Get a tile without marking it used or counting a hit.
    pub fn peek(&self, coord: TileCoord) -> Option<SharedBuffer> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.map.get(&coord).map(|entry| entry.buffer.clone())
    }

    /// Check whether a tile is cached without touching its recency.
    pub fn contains(&self, coord: TileCoord) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.map.contains_key(&coord)
    }

    /// Install or replace a tile, evicting if the cache overflows.
    ///
    /// Returns the coordinates that were evicted to make room.
    pub fn insert(&self, coord: TileCoord, buffer: SharedBuffer) -> Vec<TileCoord> {
        let high_resolution = self.high_resolution_layer();
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        let stamp = self.tick();
        let entry = CacheEntry {
            buffer,
            last_access: AtomicU64::new(stamp),
            indexed_at: stamp,
        };
        if let Some(replaced) = state.map.insert(coord, entry) {
            state.order.remove(&replaced.indexed_at);
        }
        state.order.insert(stamp, coord);
        self.counters.insertions.fetch_add(1, Ordering::Relaxed);

        let mut evicted = Vec::new();
        while state.map.len() > self.capacity {
            let Some(victim) = state.select_victim(coord, self.eviction_window, high_resolution)
            else {
                break;
            };
            state.remove(victim);
            evicted.push(victim);
        }
        self.counters
            .evictions
            .fetch_add(evicted.len() as u64, Ordering::Relaxed);

        evicted
    }

    /// Decide whether a missing tile is worth decoding.
    ///
    /// With a high-resolution index configured, layers more than one step
    /// away from it are rejected: the view has already moved past them.
    pub fn admit(&self, coord: TileCoord) -> bool {
        match self.high_resolution_layer() {
            Some(active) => coord.layer_distance(active) <= 1,
            None => true,
        }
    }

    /// Remove a tile.
    pub fn invalidate(&self, coord: TileCoord) -> Option<SharedBuffer> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.remove(coord).map(|entry| entry.buffer)
    }

    /// Remove every tile.
    pub fn clear(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.map.clear();
        state.order.clear();
    }

    /// Number of cached tiles.
    pub fn len(&self) -> usize {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of cached tiles.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total decoded bytes currently held.
    pub fn resident_bytes(&self) -> usize {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.map.values().map(|entry| entry.buffer.size()).sum()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            capacity: self.capacity,
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            insertions: self.counters.insertions.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for TileCache {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
