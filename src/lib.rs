//! # WSI Tile Cache
//!
//! Decoded tile caching for Whole Slide Image (WSI) viewers.
//!
//! Gigapixel pyramidal slides are decoded on demand, one tile at a time, into
//! memory, shown, and evicted again under a fixed memory budget while the user
//! pans and zooms. This library provides the pieces between the decoder and
//! the renderer.
//!
//! ## Features
//!
//! - **Switchable buffers**: byte buffers that either own their memory or borrow
//!   it, with ownership moved explicitly between the two
//! - **Resolution-aware cache**: bounded tile cache that evicts tiles far from the
//!   active viewing layer first and refuses to decode layers the view has left
//! - **Deduplicated loading**: one decode per tile no matter how many consumers
//!   ask, on a bounded worker pool, with back-off for tiles that keep failing
//! - **Notifications**: a broadcast signal whenever a tile lands in the cache
//!
//! ## Architecture
//!
//! - [`buffer`] - Reference-counted, resizable byte buffers
//! - [`tile`] - Tile coordinates, cache, loader and notifications
//! - [`decode`] - Tile decoders and encoded tile sources
//! - [`slide`] - Slide handles tying geometry, cache and loader together
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust
//! use std::sync::atomic::AtomicU32;
//! use std::sync::Arc;
//! use wsi_tile_cache::{Extent, Slide, SlideOpenInfo, SyntheticDecoder, TileCoord};
//!
//! #[tokio::main]
//! async fn main() {
//!     // The viewer owns the active layer and updates it as the user zooms
//!     let active_layer = Arc::new(AtomicU32::new(0));
//!
//!     let slide = Slide::open(
//!         Extent::uniform(1024, 768, 3),
//!         SyntheticDecoder::default(),
//!         SlideOpenInfo::new()
//!             .with_capacity(200)
//!             .with_high_resolution_index(active_layer.clone()),
//!     )
//!     .unwrap();
//!
//!     let tile = slide.load(TileCoord::new(0, 0)).await.unwrap();
//!     assert!(tile.is_some());
//! }
//! ```

pub mod buffer;
pub mod config;
pub mod decode;
pub mod error;
pub mod slide;
pub mod tile;

// Re-export commonly used types
pub use buffer::{Buffer, RegionOwnership, SharedBuffer, Strength, StrengthenError};
pub use config::{CheckConfig, Cli, Command, LoadConfig, SimulateConfig};
pub use decode::{
    DirectoryTileSource, JpegTileDecoder, SyntheticDecoder, TileDecoder, TileSource,
};
pub use error::{BufferError, DecodeError, GeometryError, IoError, SlideError, TileError};
pub use slide::{Slide, SlideOpenInfo};
pub use tile::{
    CacheStats, Extent, Format, LayerExtent, LoaderConfig, PendingTile, RequestOutcome,
    TileCache, TileCoord, TileLoader, TileNotifier,
};
