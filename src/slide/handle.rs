//! An opened slide: geometry, tile cache and loader.

use std::path::PathBuf;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::buffer::SharedBuffer;
use crate::decode::{DirectoryTileSource, JpegTileDecoder, TileDecoder, TileSource};
use crate::error::{SlideError, TileError};
use crate::tile::{
    CacheStats, Extent, Format, RequestOutcome, TileCache, TileCoord, TileLoader, TileNotifier,
};

use super::info::SlideOpenInfo;

/// A slide opened for viewing.
///
/// Owns the decoded tile cache for the slide. Dropping the slide clears the
/// cache; buffers already handed out stay valid.
///
/// # Example
///
/// ```
/// use wsi_tile_cache::decode::SyntheticDecoder;
/// use wsi_tile_cache::slide::{Slide, SlideOpenInfo};
/// use wsi_tile_cache::tile::{Extent, TileCoord};
///
/// #[tokio::main]
/// async fn main() {
///     let slide = Slide::open(
///         Extent::uniform(512, 512, 2),
///         SyntheticDecoder::default(),
///         SlideOpenInfo::default(),
///     )
///     .unwrap();
///
///     let coord = TileCoord::new(1, 0);
///     assert!(slide.lookup(coord).is_none());
///     slide.load(coord).await.unwrap();
///     assert!(slide.lookup(coord).is_some());
/// }
/// ```
pub struct Slide<D: TileDecoder> {
    extent: Arc<Extent>,
    cache: Arc<TileCache>,
    notifier: Arc<TileNotifier>,
    high_resolution_index: Option<Arc<AtomicU32>>,
    loader: TileLoader<D>,
}

impl<D: TileDecoder> Slide<D> {
    /// Open a slide, running decodes on the current tokio runtime.
    pub fn open(extent: Extent, decoder: D, info: SlideOpenInfo) -> Result<Self, SlideError> {
        let runtime = Handle::try_current().map_err(|e| SlideError::Runtime(e.to_string()))?;
        Self::open_with_runtime(extent, decoder, info, runtime)
    }

    /// Open a slide whose decodes run on `runtime`.
    pub fn open_with_runtime(
        extent: Extent,
        decoder: D,
        info: SlideOpenInfo,
        runtime: Handle,
    ) -> Result<Self, SlideError> {
        extent.validate()?;

        let extent = Arc::new(extent);
        let cache = Arc::new(info.build_cache());
        let notifier = info
            .notifier
            .clone()
            .unwrap_or_else(|| Arc::new(TileNotifier::new()));
        let loader = TileLoader::new(
            extent.clone(),
            cache.clone(),
            decoder,
            notifier.clone(),
            info.loader.clone(),
            runtime,
        );

        debug!(
            layers = extent.layer_count(),
            tiles = extent.total_tiles(),
            capacity = cache.capacity(),
            workers = loader.max_concurrent_decodes(),
            "Slide opened"
        );

        Ok(Self {
            extent,
            cache,
            notifier,
            high_resolution_index: info.high_resolution_index,
            loader,
        })
    }

    /// Cached tile at `coord`, if any. Never waits for a decode.
    pub fn lookup(&self, coord: TileCoord) -> Option<SharedBuffer> {
        self.cache.lookup(coord)
    }

    /// Ask for a tile; see [`TileLoader::request`].
    pub fn request(&self, coord: TileCoord) -> Result<RequestOutcome, TileError> {
        self.loader.request(coord)
    }

    /// Ask for a tile and wait for it; `Ok(None)` when it is not admitted.
    pub async fn load(&self, coord: TileCoord) -> Result<Option<SharedBuffer>, TileError> {
        self.loader.load(coord).await
    }

    pub fn extent(&self) -> &Extent {
        &self.extent
    }

    pub fn cache(&self) -> &Arc<TileCache> {
        &self.cache
    }

    pub fn notifier(&self) -> &Arc<TileNotifier> {
        &self.notifier
    }

    pub fn high_resolution_index(&self) -> Option<&Arc<AtomicU32>> {
        self.high_resolution_index.as_ref()
    }

    pub fn loader(&self) -> &TileLoader<D> {
        &self.loader
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

impl Slide<JpegTileDecoder<DirectoryTileSource>> {
    /// Open a directory of JPEG tiles described by its `extent.json`.
    pub async fn open_directory(
        root: impl Into<PathBuf>,
        format: Format,
        info: SlideOpenInfo,
    ) -> Result<Self, SlideError> {
        let source = DirectoryTileSource::new(root);
        let extent = source.read_extent().await?;
        info!(
            slide = source.identifier(),
            layers = extent.layer_count(),
            "Opening tile directory"
        );
        Self::open(extent, JpegTileDecoder::new(source).with_format(format), info)
    }
}

impl<D: TileDecoder> Drop for Slide<D> {
    fn drop(&mut self) {
        debug!(entries = self.cache.len(), "Slide closed, clearing tile cache");
        self.cache.clear();
    }
}
