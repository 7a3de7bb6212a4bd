//! Tile caching layer.
//!
//! This module keeps decoded tiles in memory while the viewer pans and zooms,
//! and coordinates the decodes that fill it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            Viewer / Renderer            │
//! └──────────┬─────────────────────▲────────┘
//!            │ request / lookup    │ TileNotifier
//!            ▼                     │
//! ┌─────────────────────────────────────────┐
//! │              TileLoader                 │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │  in-flight   │  │ FailureTracker  │  │
//! │  │  (dedup)     │  │ (back-off)      │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └──────────┬─────────────────────┬────────┘
//!            │ insert              │ decode
//!            ▼                     ▼
//! ┌────────────────────┐  ┌────────────────┐
//! │     TileCache      │  │  TileDecoder   │
//! │ (resolution-aware  │  └────────────────┘
//! │  LRU of buffers)   │
//! └────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`TileCoord`], [`Extent`], [`LayerExtent`]: pyramid addressing and geometry
//! - [`TileCache`]: capacity-bounded map of decoded tiles
//! - [`TileLoader`]: singleflight decode scheduling with bounded workers
//! - [`TileNotifier`]: broadcast signal fired when a tile is cached
//! - [`FailureTracker`]: exponential back-off for tiles that fail to decode
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use wsi_tile_cache::decode::SyntheticDecoder;
//! use wsi_tile_cache::tile::{
//!     Extent, LoaderConfig, TileCache, TileCoord, TileLoader, TileNotifier,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let loader = TileLoader::new(
//!         Arc::new(Extent::uniform(512, 512, 2)),
//!         Arc::new(TileCache::with_capacity(64)),
//!         SyntheticDecoder::default(),
//!         Arc::new(TileNotifier::new()),
//!         LoaderConfig::default(),
//!         tokio::runtime::Handle::current(),
//!     );
//!
//!     let tile = loader.load(TileCoord::new(0, 3)).await.unwrap();
//!     assert!(tile.is_some());
//!     assert!(loader.cache().contains(TileCoord::new(0, 3)));
//! }
//! ```

mod backoff;
mod cache;
mod coord;
mod loader;
mod notify;

pub use backoff::{
    Backoff, BackoffPolicy, FailureTracker, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX,
    DEFAULT_FAILURE_RECORDS,
};
pub use cache::{CacheStats, TileCache, DEFAULT_EVICTION_WINDOW, DEFAULT_TILE_CACHE_CAPACITY};
pub use coord::{
    Extent, Format, LayerExtent, TileCoord, LAYER_STEP, TILE_PIX_AREA, TILE_PIX_BYTES_RGB,
    TILE_PIX_BYTES_RGBA, TILE_PIX_LENGTH,
};
pub use loader::{LoaderConfig, PendingTile, RequestOutcome, TileLoader};
pub use notify::TileNotifier;
