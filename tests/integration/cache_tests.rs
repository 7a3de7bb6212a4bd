//! Cache behavior integration tests.
//!
//! Tests verify:
//! - Admission follows the live high-resolution index
//! - Eviction prefers tiles far from the active layer during a zoom
//! - Capacity is respected under concurrent readers and writers

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use wsi_tile_cache::buffer::{Buffer, SharedBuffer};
use wsi_tile_cache::tile::{TileCache, TileCoord};

fn tile(fill: u8) -> SharedBuffer {
    Buffer::from_vec(vec![fill; 32]).into_shared()
}

// =============================================================================
// Admission
// =============================================================================

#[test]
fn test_admission_around_active_layer() {
    let index = Arc::new(AtomicU32::new(5));
    let cache = TileCache::new().with_high_resolution_index(index.clone());

    assert!(!cache.admit(TileCoord::new(2, 0)));
    assert!(cache.admit(TileCoord::new(4, 0)));
    assert!(cache.admit(TileCoord::new(6, 0)));

    // Zooming out moves the accepted band with it
    index.store(3, Ordering::Release);
    assert!(cache.admit(TileCoord::new(2, 0)));
    assert!(!cache.admit(TileCoord::new(5, 0)));
}

// =============================================================================
// Eviction
// =============================================================================

#[test]
fn test_zoom_keeps_tiles_near_active_layer() {
    let index = Arc::new(AtomicU32::new(0));
    let cache = TileCache::with_capacity(8).with_high_resolution_index(index.clone());

    // Fill with tiles from layers 0 and 1 while viewing layer 0
    for t in 0..4 {
        cache.insert(TileCoord::new(0, t), tile(0));
    }
    for t in 0..4 {
        cache.insert(TileCoord::new(1, t), tile(1));
    }

    // Zoom in to layer 2 and load its tiles
    index.store(2, Ordering::Release);
    let mut evicted = Vec::new();
    for t in 0..4 {
        evicted.extend(cache.insert(TileCoord::new(2, t), tile(2)));
    }

    // Layer 0 is two steps away and goes first, layer 1 survives
    assert_eq!(evicted.len(), 4);
    assert!(evicted.iter().all(|coord| coord.layer == 0));
    for t in 0..4 {
        assert!(cache.contains(TileCoord::new(1, t)));
        assert!(cache.contains(TileCoord::new(2, t)));
    }
    assert_eq!(cache.len(), 8);
}

#[test]
fn test_window_limits_resolution_preference() {
    let index = Arc::new(AtomicU32::new(4));
    let cache = TileCache::with_capacity(4)
        .with_high_resolution_index(index)
        .with_eviction_window(2);

    cache.insert(TileCoord::new(4, 0), tile(0)); // oldest
    cache.insert(TileCoord::new(3, 0), tile(1));
    cache.insert(TileCoord::new(0, 0), tile(2)); // farthest, but outside the window
    cache.insert(TileCoord::new(4, 1), tile(3));

    // Window holds the two oldest: (4,0) and (3,0); (3,0) is farther
    let evicted = cache.insert(TileCoord::new(4, 2), tile(4));
    assert_eq!(evicted, vec![TileCoord::new(3, 0)]);
    assert!(cache.contains(TileCoord::new(0, 0)));
}

#[test]
fn test_lookup_protects_from_eviction() {
    let cache = TileCache::with_capacity(3);
    for t in 0..3 {
        cache.insert(TileCoord::new(0, t), tile(t as u8));
    }

    cache.lookup(TileCoord::new(0, 0));
    cache.lookup(TileCoord::new(0, 1));

    let evicted = cache.insert(TileCoord::new(0, 3), tile(3));
    assert_eq!(evicted, vec![TileCoord::new(0, 2)]);
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn test_capacity_under_concurrent_inserts() {
    let cache = Arc::new(TileCache::with_capacity(32));

    let writers: Vec<_> = (0..4u32)
        .map(|writer| {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                for t in 0..200 {
                    cache.insert(TileCoord::new(writer, t), tile(writer as u8));
                    assert!(cache.len() <= 32);
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..4u32)
        .map(|reader| {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                for t in 0..200 {
                    if let Some(buffer) = cache.lookup(TileCoord::new(reader, t)) {
                        assert_eq!(buffer.as_slice(), &[reader as u8; 32]);
                    }
                }
            })
        })
        .collect();

    for handle in writers.into_iter().chain(readers) {
        handle.join().unwrap();
    }

    let stats = cache.stats();
    assert_eq!(stats.entries, 32);
    assert_eq!(stats.insertions, 800);
    assert_eq!(stats.evictions, 800 - 32);
}
