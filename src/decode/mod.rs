//! Tile decoders.
//!
//! The load coordinator treats decoding as an opaque producer: given a tile
//! coordinate and the slide geometry it yields a [`Buffer`] of decoded pixels
//! or a [`DecodeError`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              TileLoader                 │
//! └────────────────────┬────────────────────┘
//!                      │ decode(coord, extent)
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │           TileDecoder Trait             │
//! └────────────────────┬────────────────────┘
//!          ┌───────────┴───────────┐
//!          ▼                       ▼
//! ┌─────────────────┐    ┌─────────────────────┐
//! │ JpegTileDecoder │    │  SyntheticDecoder   │
//! │  (TileSource →  │    │  (generated tiles)  │
//! │   RGBA pixels)  │    │                     │
//! └────────┬────────┘    └─────────────────────┘
//!          ▼
//! ┌─────────────────────┐
//! │ DirectoryTileSource │
//! └─────────────────────┘
//! ```

mod jpeg;
mod source;
mod synthetic;

use std::sync::Arc;

use async_trait::async_trait;

use crate::buffer::Buffer;
use crate::error::DecodeError;
use crate::tile::{Extent, TileCoord};

pub use jpeg::JpegTileDecoder;
pub use source::{DirectoryTileSource, TileSource, EXTENT_FILE_NAME};
pub use synthetic::SyntheticDecoder;

/// Producer of decoded tile pixels.
///
/// Implementations must be thread-safe: the loader runs several decodes at
/// once on worker tasks. CPU-heavy work should be moved off the async
/// executor (e.g. with `tokio::task::spawn_blocking`).
#[async_trait]
pub trait TileDecoder: Send + Sync + 'static {
    /// Decode the tile at `coord`.
    async fn decode(&self, coord: TileCoord, extent: &Extent) -> Result<Buffer, DecodeError>;
}

#[async_trait]
impl<D: TileDecoder + ?Sized> TileDecoder for Arc<D> {
    async fn decode(&self, coord: TileCoord, extent: &Extent) -> Result<Buffer, DecodeError> {
        (**self).decode(coord, extent).await
    }
}

#[async_trait]
impl<D: TileDecoder + ?Sized> TileDecoder for Box<D> {
    async fn decode(&self, coord: TileCoord, extent: &Extent) -> Result<Buffer, DecodeError> {
        (**self).decode(coord, extent).await
    }
}
