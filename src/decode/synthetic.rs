//! Generated tiles for simulations and tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::buffer::Buffer;
use crate::error::DecodeError;
use crate::tile::{Extent, Format, TileCoord, TILE_PIX_LENGTH};

use super::TileDecoder;

/// Decoder that renders a deterministic pattern for each coordinate.
///
/// The same coordinate always yields the same bytes, so callers can compare
/// what came out of the cache with [`SyntheticDecoder::render`].
#[derive(Debug)]
pub struct SyntheticDecoder {
    format: Format,
    tile_size: u32,
    latency: Option<Duration>,
    failing: Mutex<HashSet<TileCoord>>,
    decodes: AtomicU64,
}

impl SyntheticDecoder {
    pub fn new(format: Format, tile_size: u32) -> Self {
        Self {
            format,
            tile_size: tile_size.max(1),
            latency: None,
            failing: Mutex::new(HashSet::new()),
            decodes: AtomicU64::new(0),
        }
    }

    /// Sleep for `latency` before producing each tile.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make every decode of `coord` fail until [`heal`](Self::heal) is called.
    pub fn fail_on(&self, coord: TileCoord) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(coord);
    }

    pub fn heal(&self, coord: TileCoord) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&coord);
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Decodes attempted so far, failed ones included.
    pub fn decode_count(&self) -> u64 {
        self.decodes.load(Ordering::Relaxed)
    }

    /// The pixels produced for `coord`.
    pub fn render(&self, coord: TileCoord) -> Vec<u8> {
        let channels = self.format.bytes_per_pixel();
        let mut pixels = Vec::with_capacity(self.format.tile_bytes(self.tile_size));
        let shade = (coord.layer as u8).wrapping_mul(37);

        for y in 0..self.tile_size {
            for x in 0..self.tile_size {
                let red = (coord.tile as u8).wrapping_add(x as u8);
                let green = shade.wrapping_add(y as u8);
                let blue = ((x ^ y) as u8) ^ ((coord.tile >> 8) as u8);
                let (first, third) = if self.format.is_bgr() {
                    (blue, red)
                } else {
                    (red, blue)
                };
                pixels.extend_from_slice(&[first, green, third]);
                if channels == 4 {
                    pixels.push(u8::MAX);
                }
            }
        }
        pixels
    }
}

impl Default for SyntheticDecoder {
    fn default() -> Self {
        Self::new(Format::default(), TILE_PIX_LENGTH)
    }
}

#[async_trait]
impl TileDecoder for SyntheticDecoder {
    async fn decode(&self, coord: TileCoord, extent: &Extent) -> Result<Buffer, DecodeError> {
        self.decodes.fetch_add(1, Ordering::Relaxed);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if extent.tile_xy(coord).is_none() {
            return Err(DecodeError::Image {
                message: format!("tile {coord} is outside the pyramid"),
            });
        }
        let failing = self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&coord);
        if failing {
            return Err(DecodeError::Image {
                message: format!("injected failure for tile {coord}"),
            });
        }

        Ok(Buffer::from_vec(self.render(coord)))
    }
}
