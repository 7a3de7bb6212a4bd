//! Slide handles.
//!
//! A [`Slide`] bundles everything needed to view one whole-slide image: its
//! pyramid geometry, its decoded tile cache and the loader that fills it.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │                 Slide                   │
//! │  ┌──────────┐ ┌───────────┐ ┌────────┐  │
//! │  │  Extent  │ │ TileCache │ │ Loader │  │
//! │  └──────────┘ └───────────┘ └───┬────┘  │
//! └─────────────────────────────────┼───────┘
//!                                   ▼
//!                          ┌────────────────┐
//!                          │  TileDecoder   │
//!                          └────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::atomic::AtomicU32;
//! use std::sync::Arc;
//! use wsi_tile_cache::slide::{Slide, SlideOpenInfo};
//! use wsi_tile_cache::tile::{Format, TileCoord};
//!
//! let active_layer = Arc::new(AtomicU32::new(0));
//! let info = SlideOpenInfo::new()
//!     .with_capacity(500)
//!     .with_high_resolution_index(active_layer.clone());
//!
//! let slide = Slide::open_directory("/data/slides/sample", Format::R8G8B8A8, info).await?;
//! let tile = slide.load(TileCoord::new(0, 0)).await?;
//! ```

mod handle;
mod info;

pub use handle::Slide;
pub use info::SlideOpenInfo;
