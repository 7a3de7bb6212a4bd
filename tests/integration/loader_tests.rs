//! Load coordinator integration tests.
//!
//! Tests verify:
//! - Concurrent requests for one tile share a single decode
//! - Requests never block while a decode is running
//! - Rejected tiles are never decoded
//! - Failures reach every waiter and are rate limited afterwards
//! - Notifications fire after the tile is visible in the cache

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

use wsi_tile_cache::decode::TileDecoder;
use wsi_tile_cache::error::{DecodeError, TileError};
use wsi_tile_cache::tile::{
    Extent, LoaderConfig, RequestOutcome, TileCache, TileCoord, TileLoader, TileNotifier,
};

use super::test_utils::{deep_extent, two_layer_extent, GatedDecoder};

fn loader_for<D: TileDecoder>(extent: Extent, cache: TileCache, decoder: D) -> TileLoader<D> {
    TileLoader::new(
        Arc::new(extent),
        Arc::new(cache),
        decoder,
        Arc::new(TileNotifier::new()),
        LoaderConfig::default().with_max_concurrent_decodes(4),
        Handle::current(),
    )
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// =============================================================================
// Deduplication
// =============================================================================

#[tokio::test]
async fn test_many_requests_one_decode() {
    let decoder = Arc::new(GatedDecoder::new());
    let loader = loader_for(two_layer_extent(), TileCache::new(), decoder.clone());
    let coord = TileCoord::new(0, 2);

    let mut handles = Vec::new();
    for _ in 0..16 {
        match loader.request(coord).unwrap() {
            RequestOutcome::Pending(pending) => handles.push(pending),
            other => panic!("expected pending, got {:?}", other),
        }
    }

    // The decode is held at the gate, so everything attached to it
    wait_until(|| decoder.started() == 1).await;
    assert_eq!(loader.in_flight_count(), 1);
    assert!(handles.iter().all(|h| !h.is_ready()));

    decoder.open();
    for handle in &handles {
        let buffer = handle.wait().await.unwrap();
        assert_eq!(buffer.as_slice(), decoder.expected(coord).as_slice());
    }

    assert_eq!(decoder.calls(coord), 1);
    assert_eq!(loader.in_flight_count(), 0);
}

#[tokio::test]
async fn test_concurrent_tasks_share_decode() {
    let decoder = Arc::new(GatedDecoder::new());
    let loader = loader_for(two_layer_extent(), TileCache::new(), decoder.clone());
    let coord = TileCoord::new(1, 0);

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let loader = loader.clone();
            tokio::spawn(async move { loader.load(coord).await })
        })
        .collect();

    wait_until(|| decoder.started() == 1).await;
    decoder.open();

    let mut buffers = Vec::new();
    for task in tasks {
        buffers.push(task.await.unwrap().unwrap().unwrap());
    }
    assert!(buffers.iter().all(|b| Arc::ptr_eq(b, &buffers[0])));
    assert_eq!(decoder.calls(coord), 1);
}

#[tokio::test]
async fn test_distinct_tiles_decode_independently() {
    let decoder = Arc::new(GatedDecoder::new());
    decoder.open();
    let loader = loader_for(two_layer_extent(), TileCache::new(), decoder.clone());

    for tile in 0..4 {
        let buffer = loader.load(TileCoord::new(0, tile)).await.unwrap().unwrap();
        assert_eq!(
            buffer.as_slice(),
            decoder.expected(TileCoord::new(0, tile)).as_slice()
        );
    }
    assert_eq!(decoder.started(), 4);
    assert_eq!(loader.cache().len(), 4);
}

// =============================================================================
// Admission
// =============================================================================

#[tokio::test]
async fn test_rejected_layers_are_not_decoded() {
    let decoder = Arc::new(GatedDecoder::new());
    decoder.open();
    let index = Arc::new(AtomicU32::new(5));
    let cache = TileCache::new().with_high_resolution_index(index.clone());
    let loader = loader_for(deep_extent(), cache, decoder.clone());

    assert!(loader.request(TileCoord::new(2, 0)).unwrap().is_rejected());
    assert!(loader.load(TileCoord::new(4, 0)).await.unwrap().is_some());
    assert!(loader.load(TileCoord::new(6, 0)).await.unwrap().is_some());

    assert_eq!(decoder.calls(TileCoord::new(2, 0)), 0);
    assert_eq!(decoder.started(), 2);

    // Once the view reaches layer 2 it is admitted
    index.store(2, Ordering::Release);
    assert!(loader.request(TileCoord::new(2, 0)).unwrap().is_pending());
}

#[tokio::test]
async fn test_cached_tile_served_regardless_of_admission() {
    let decoder = Arc::new(GatedDecoder::new());
    decoder.open();
    let index = Arc::new(AtomicU32::new(0));
    let cache = TileCache::new().with_high_resolution_index(index.clone());
    let loader = loader_for(deep_extent(), cache, decoder.clone());

    loader.load(TileCoord::new(1, 0)).await.unwrap().unwrap();
    index.store(7, Ordering::Release);

    assert!(loader.request(TileCoord::new(1, 0)).unwrap().is_ready());
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_failure_reaches_every_waiter() {
    let decoder = Arc::new(GatedDecoder::new());
    let coord = TileCoord::new(0, 1);
    decoder.fail_on(coord);
    let loader = loader_for(two_layer_extent(), TileCache::new(), decoder.clone());

    let handles: Vec<_> = (0..4)
        .map(|_| match loader.request(coord).unwrap() {
            RequestOutcome::Pending(pending) => pending,
            other => panic!("expected pending, got {:?}", other),
        })
        .collect();
    decoder.open();

    for handle in &handles {
        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, TileError::DecodeFailure { coord: c, .. } if c == coord));
        assert!(matches!(err.decode_cause(), Some(DecodeError::Image { .. })));
    }

    assert!(!loader.cache().contains(coord));
    assert!(matches!(
        loader.request(coord),
        Err(TileError::BackedOff { failures: 1, .. })
    ));
    assert_eq!(decoder.calls(coord), 1);

    // Other tiles are unaffected
    assert!(loader.load(TileCoord::new(0, 0)).await.unwrap().is_some());
}

#[tokio::test]
async fn test_invalid_coordinates() {
    let loader = loader_for(two_layer_extent(), TileCache::new(), GatedDecoder::new());

    assert!(matches!(
        loader.request(TileCoord::new(5, 0)),
        Err(TileError::InvalidLayer { layer: 5, .. })
    ));
    assert!(matches!(
        loader.load(TileCoord::new(0, 4)).await,
        Err(TileError::TileOutOfBounds { layer: 0, tile: 4, tile_count: 4 })
    ));
    assert_eq!(loader.decoder().started(), 0);
}

// =============================================================================
// Notifications
// =============================================================================

#[tokio::test]
async fn test_notification_after_insert() {
    let decoder = Arc::new(GatedDecoder::new());
    let loader = loader_for(two_layer_extent(), TileCache::new(), decoder.clone());
    let notifier = loader.notifier().clone();
    let cache = loader.cache().clone();
    let coord = TileCoord::new(0, 3);

    // Consumer: remember the generation, check the cache, wait, re-check
    let seen = notifier.generation();
    assert!(cache.lookup(coord).is_none());
    let consumer = tokio::spawn(async move {
        notifier.wait_past(seen).await;
        cache.lookup(coord)
    });

    assert!(loader.request(coord).unwrap().is_pending());
    decoder.open();

    let buffer = tokio::time::timeout(Duration::from_secs(5), consumer)
        .await
        .unwrap()
        .unwrap()
        .expect("tile visible once notified");
    assert_eq!(buffer.as_slice(), decoder.expected(coord).as_slice());
}

#[tokio::test]
async fn test_dropped_request_still_caches() {
    let decoder = Arc::new(GatedDecoder::new());
    let loader = loader_for(two_layer_extent(), TileCache::new(), decoder.clone());
    let coord = TileCoord::new(0, 0);

    drop(loader.request(coord).unwrap());
    decoder.open();

    let cache = loader.cache().clone();
    wait_until(move || cache.contains(coord)).await;
    assert_eq!(loader.in_flight_count(), 0);
}
