//! JPEG tile decoder.
//!
//! This module handles decoding encoded JPEG tiles into raw pixel buffers in
//! the slide's pixel format.
//!
//! # Design Decisions
//!
//! - **Fixed output size**: every decoded tile is `tile_size × tile_size`
//!   pixels. Edge tiles that are smaller are padded with zeroed (transparent)
//!   pixels; larger images are rejected.
//!
//! - **Off the executor**: decoding runs on tokio's blocking pool so a burst
//!   of misses never stalls the tasks serving cache hits.

use std::io::Cursor;

use async_trait::async_trait;
use image::{ImageFormat, ImageReader};

use crate::buffer::Buffer;
use crate::error::DecodeError;
use crate::tile::{Extent, Format, TileCoord, TILE_PIX_LENGTH};

use super::{TileDecoder, TileSource};

// =============================================================================
// JPEG Decoder
// =============================================================================

/// Decoder for JPEG-encoded tiles read from a [`TileSource`].
///
/// # Example
///
/// ```ignore
/// use wsi_tile_cache::decode::{DirectoryTileSource, JpegTileDecoder};
/// use wsi_tile_cache::tile::Format;
///
/// let decoder = JpegTileDecoder::new(DirectoryTileSource::new("/data/slide"))
///     .with_format(Format::B8G8R8A8);
/// ```
#[derive(Debug, Clone)]
pub struct JpegTileDecoder<S> {
    source: S,
    format: Format,
    tile_size: u32,
}

impl<S: TileSource> JpegTileDecoder<S> {
    /// Create a decoder producing 256×256 RGBA tiles.
    pub fn new(source: S) -> Self {
        Self {
            source,
            format: Format::default(),
            tile_size: TILE_PIX_LENGTH,
        }
    }

    /// Set the output pixel format.
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Set the output tile edge length in pixels.
    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size.max(1);
        self
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

#[async_trait]
impl<S: TileSource> TileDecoder for JpegTileDecoder<S> {
    async fn decode(&self, coord: TileCoord, _extent: &Extent) -> Result<Buffer, DecodeError> {
        let encoded = self.source.read_tile(coord).await?;
        let format = self.format;
        let tile_size = self.tile_size;

        tokio::task::spawn_blocking(move || decode_jpeg(&encoded, format, tile_size))
            .await
            .map_err(|e| DecodeError::Worker(format!("Task join error: {e}")))?
    }
}

/// Decode a JPEG payload into a `tile_size × tile_size` buffer of `format` pixels.
pub fn decode_jpeg(source: &[u8], format: Format, tile_size: u32) -> Result<Buffer, DecodeError> {
    let reader = ImageReader::with_format(Cursor::new(source), ImageFormat::Jpeg);
    let img = reader.decode().map_err(|e| DecodeError::Image {
        message: e.to_string(),
    })?;

    let (width, height) = (img.width(), img.height());
    if width > tile_size || height > tile_size {
        return Err(DecodeError::UnexpectedDimensions {
            width,
            height,
            tile_size,
        });
    }
    if width == 0 || height == 0 {
        return Err(DecodeError::Image {
            message: "empty image".to_string(),
        });
    }

    let channels = format.bytes_per_pixel();
    let raw = if channels == 4 {
        img.to_rgba8().into_raw()
    } else {
        img.to_rgb8().into_raw()
    };

    let mut buffer = Buffer::with_capacity(format.tile_bytes(tile_size))?;
    let pixels = buffer.append(format.tile_bytes(tile_size))?;

    let dst_row = tile_size as usize * channels;
    let src_row = width as usize * channels;
    for (y, row) in raw.chunks_exact(src_row).enumerate() {
        let start = y * dst_row;
        let dst = &mut pixels[start..start + src_row];
        dst.copy_from_slice(row);
        if format.is_bgr() {
            for pixel in dst.chunks_exact_mut(channels) {
                pixel.swap(0, 2);
            }
        }
    }

    Ok(buffer)
}

// =============================================================================
// Tests
// =============================================================================
