//! Test utilities for integration tests.
//!
//! This module provides instrumented decoders and helpers for building
//! pyramids and on-disk tile directories.

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::Semaphore;

use wsi_tile_cache::buffer::Buffer;
use wsi_tile_cache::decode::{SyntheticDecoder, TileDecoder, EXTENT_FILE_NAME};
use wsi_tile_cache::error::DecodeError;
use wsi_tile_cache::tile::{Extent, Format, LayerExtent, TileCoord};

/// Tile edge used by the integration tests.
pub const TEST_TILE_SIZE: u32 = 16;

// =============================================================================
// Gated Decoder
// =============================================================================

/// A decoder whose decodes block until the gate is opened.
///
/// Lets tests pile up requests against a decode that is known to still be
/// running, then release it and observe the outcome.
pub struct GatedDecoder {
    inner: SyntheticDecoder,
    gate: Semaphore,
    calls: Mutex<HashMap<TileCoord, usize>>,
    started: AtomicUsize,
}

impl GatedDecoder {
    pub fn new() -> Self {
        Self {
            inner: SyntheticDecoder::new(Format::R8G8B8A8, TEST_TILE_SIZE),
            gate: Semaphore::new(0),
            calls: Mutex::new(HashMap::new()),
            started: AtomicUsize::new(0),
        }
    }

    /// Let every current and future decode through.
    pub fn open(&self) {
        self.gate.close();
    }

    pub fn fail_on(&self, coord: TileCoord) {
        self.inner.fail_on(coord);
    }

    /// The bytes a successful decode of `coord` produces.
    pub fn expected(&self, coord: TileCoord) -> Vec<u8> {
        self.inner.render(coord)
    }

    /// Decodes started for `coord`.
    pub fn calls(&self, coord: TileCoord) -> usize {
        self.calls.lock().unwrap().get(&coord).copied().unwrap_or(0)
    }

    /// Decodes started across all coordinates.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TileDecoder for GatedDecoder {
    async fn decode(&self, coord: TileCoord, extent: &Extent) -> Result<Buffer, DecodeError> {
        *self.calls.lock().unwrap().entry(coord).or_default() += 1;
        self.started.fetch_add(1, Ordering::SeqCst);

        // Closed gate: acquire fails and the decode proceeds
        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }
        self.inner.decode(coord, extent).await
    }
}

// =============================================================================
// Geometry Helpers
// =============================================================================

/// Layer 0 is a 2×2 grid, layer 1 a single tile.
pub fn two_layer_extent() -> Extent {
    Extent::new(
        512,
        512,
        vec![
            LayerExtent::new(2, 2, 1.0, 1.0),
            LayerExtent::new(1, 1, 0.5, 2.0),
        ],
    )
}

/// Eight layers of increasing size; layer `n` has `n + 1` tiles per side.
pub fn deep_extent() -> Extent {
    let layers = (0..8u32)
        .map(|layer| {
            let scale = (layer + 1) as f32;
            LayerExtent::new(layer + 1, layer + 1, scale, 8.0 / scale)
        })
        .collect();
    Extent::new(256, 256, layers)
}

// =============================================================================
// Tile Directories
// =============================================================================

/// Create a JPEG image filled with `color`.
pub fn create_test_jpeg(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb(color));
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, 95);
    encoder.encode_image(&img).expect("Failed to encode JPEG");
    buf
}

/// Color used for every tile of `coord.layer` in generated directories.
pub fn layer_color(layer: u32) -> [u8; 3] {
    match layer % 3 {
        0 => [220, 40, 40],
        1 => [40, 220, 40],
        _ => [40, 40, 220],
    }
}

/// A scratch directory removed on drop.
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    pub fn new(name: &str) -> Self {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let path = std::env::temp_dir().join(format!(
            "wsi-tile-cache-it-{}-{}-{}",
            name,
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::SeqCst)
        ));
        std::fs::create_dir_all(&path).expect("Failed to create scratch dir");
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        std::fs::remove_dir_all(&self.path).ok();
    }
}

/// Write `extent.json` and one `tile_size`-pixel JPEG per tile, skipping `omit`.
pub fn write_tile_directory(
    name: &str,
    extent: &Extent,
    tile_size: u32,
    omit: &[TileCoord],
) -> ScratchDir {
    let dir = ScratchDir::new(name);
    std::fs::write(
        dir.path().join(EXTENT_FILE_NAME),
        serde_json::to_vec_pretty(extent).unwrap(),
    )
    .unwrap();

    for (layer, grid) in extent.layers.iter().enumerate() {
        let layer_dir = dir.path().join(layer.to_string());
        std::fs::create_dir_all(&layer_dir).unwrap();
        let jpeg = create_test_jpeg(tile_size, tile_size, layer_color(layer as u32));
        for tile in 0..grid.tile_count() {
            if omit.contains(&TileCoord::new(layer as u32, tile)) {
                continue;
            }
            std::fs::write(layer_dir.join(format!("{}.jpg", tile)), &jpeg).unwrap();
        }
    }
    dir
}

/// Whether two channel values are within JPEG rounding of each other.
pub fn close(actual: u8, expected: u8) -> bool {
    actual.abs_diff(expected) <= 8
}
