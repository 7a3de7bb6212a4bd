//! Sources of encoded tile payloads.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{IoError, SlideError};
use crate::tile::{Extent, TileCoord};

/// Name of the geometry file at the root of a tile directory.
pub const EXTENT_FILE_NAME: &str = "extent.json";

/// Trait for reading encoded tiles.
///
/// This abstraction lets the JPEG decoder work with any storage backend
/// without knowing where tiles live.
#[async_trait]
pub trait TileSource: Send + Sync + 'static {
    /// Read the encoded bytes of one tile.
    async fn read_tile(&self, coord: TileCoord) -> Result<Bytes, IoError>;

    /// Identifier for logging.
    fn identifier(&self) -> &str;
}

/// Tiles stored on local disk as `<root>/<layer>/<tile>.jpg`, with the
/// pyramid geometry in `<root>/extent.json`.
///
/// # Example
///
/// ```ignore
/// use wsi_tile_cache::decode::DirectoryTileSource;
///
/// let source = DirectoryTileSource::new("/data/slides/sample");
/// let extent = source.read_extent().await?;
/// let bytes = source.read_tile(TileCoord::new(0, 0)).await?;
/// ```
#[derive(Debug, Clone)]
pub struct DirectoryTileSource {
    root: PathBuf,
    extension: String,
    identifier: String,
}

impl DirectoryTileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let identifier = format!("file://{}", root.display());
        Self {
            root,
            extension: "jpg".to_string(),
            identifier,
        }
    }

    /// Use a different tile file extension (default `jpg`).
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file holding `coord`.
    pub fn tile_path(&self, coord: TileCoord) -> PathBuf {
        self.root
            .join(coord.layer.to_string())
            .join(format!("{}.{}", coord.tile, self.extension))
    }

    /// Load and validate the pyramid geometry.
    pub async fn read_extent(&self) -> Result<Extent, SlideError> {
        let path = self.root.join(EXTENT_FILE_NAME);
        let json = tokio::fs::read(&path)
            .await
            .map_err(|e| IoError::from_std(path.display().to_string(), e))?;
        Ok(Extent::from_json(&json)?)
    }
}

#[async_trait]
impl TileSource for DirectoryTileSource {
    async fn read_tile(&self, coord: TileCoord) -> Result<Bytes, IoError> {
        let path = self.tile_path(coord);
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| IoError::from_std(path.display().to_string(), e))?;
        Ok(Bytes::from(data))
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}
