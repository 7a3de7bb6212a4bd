//! Tile coordinates and pyramid geometry.
//!
//! A slide is a pyramid of layers, each a grid of fixed-size tiles. Tiles
//! are addressed by `(layer, tile)` where `tile` is a row-major index into
//! the layer's `x_tiles × y_tiles` grid.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{GeometryError, TileError};

/// Tile edge length in pixels.
pub const TILE_PIX_LENGTH: u32 = 256;

/// Pixels in one tile.
pub const TILE_PIX_AREA: u32 = TILE_PIX_LENGTH * TILE_PIX_LENGTH;

/// Bytes in one decoded 3-channel tile.
pub const TILE_PIX_BYTES_RGB: usize = TILE_PIX_AREA as usize * 3;

/// Bytes in one decoded 4-channel tile.
pub const TILE_PIX_BYTES_RGBA: usize = TILE_PIX_AREA as usize * 4;

/// Resolution ratio between adjacent layers built by [`Extent::uniform`].
pub const LAYER_STEP: u32 = 4;

// =============================================================================
// Pixel Format
// =============================================================================

/// Channel byte order of decoded pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Format {
    B8G8R8,
    R8G8B8,
    B8G8R8A8,
    #[default]
    R8G8B8A8,
}

impl Format {
    /// Bytes per pixel.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Format::B8G8R8 | Format::R8G8B8 => 3,
            Format::B8G8R8A8 | Format::R8G8B8A8 => 4,
        }
    }

    /// Whether blue is stored before red.
    pub const fn is_bgr(self) -> bool {
        matches!(self, Format::B8G8R8 | Format::B8G8R8A8)
    }

    /// Decoded size of a square tile with edge `tile_size`.
    pub const fn tile_bytes(self, tile_size: u32) -> usize {
        tile_size as usize * tile_size as usize * self.bytes_per_pixel()
    }

    pub const fn name(self) -> &'static str {
        match self {
            Format::B8G8R8 => "B8G8R8",
            Format::R8G8B8 => "R8G8B8",
            Format::B8G8R8A8 => "B8G8R8A8",
            Format::R8G8B8A8 => "R8G8B8A8",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Format {
    type Err = String;

    /// Accepts the channel layout name (`R8G8B8A8`) or its short form (`rgba`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "B8G8R8" | "BGR" => Ok(Format::B8G8R8),
            "R8G8B8" | "RGB" => Ok(Format::R8G8B8),
            "B8G8R8A8" | "BGRA" => Ok(Format::B8G8R8A8),
            "R8G8B8A8" | "RGBA" => Ok(Format::R8G8B8A8),
            _ => Err(format!(
                "unknown pixel format '{s}' (expected rgb, bgr, rgba or bgra)"
            )),
        }
    }
}

// =============================================================================
// Tile Coordinate
// =============================================================================

/// Position of a tile in the pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoord {
    /// Layer index
    pub layer: u32,

    /// Row-major tile index within the layer
    pub tile: u32,
}

impl TileCoord {
    pub const fn new(layer: u32, tile: u32) -> Self {
        Self { layer, tile }
    }

    /// Number of resolution steps between this tile's layer and `layer`.
    pub fn layer_distance(&self, layer: u32) -> u32 {
        self.layer.abs_diff(layer)
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.layer, self.tile)
    }
}

// =============================================================================
// Pyramid Geometry
// =============================================================================

/// Tile grid and scale of one pyramid layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayerExtent {
    /// Horizontal tile count
    pub x_tiles: u32,

    /// Vertical tile count
    pub y_tiles: u32,

    /// Zoom factor of this layer
    pub scale: f32,

    /// Reciprocal of `scale` relative to the highest-resolution layer
    pub downsample: f32,
}

impl LayerExtent {
    pub fn new(x_tiles: u32, y_tiles: u32, scale: f32, downsample: f32) -> Self {
        Self {
            x_tiles,
            y_tiles,
            scale,
            downsample,
        }
    }

    /// Total tiles in the layer, saturating at `u32::MAX`.
    ///
    /// A validated [`Extent`] never saturates.
    pub fn tile_count(&self) -> u32 {
        self.x_tiles.saturating_mul(self.y_tiles)
    }

    /// Total tiles in the layer, or `None` if the grid is not addressable
    /// by a `u32` tile index.
    pub fn checked_tile_count(&self) -> Option<u32> {
        self.x_tiles.checked_mul(self.y_tiles)
    }
}

impl Default for LayerExtent {
    fn default() -> Self {
        Self::new(1, 1, 1.0, 1.0)
    }
}

/// Pixel extent of a slide plus its layer list.
///
/// `width` and `height` describe the initially presented (lowest-resolution)
/// layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
    pub layers: Vec<LayerExtent>,
}

impl Extent {
    pub fn new(width: u32, height: u32, layers: Vec<LayerExtent>) -> Self {
        Self {
            width,
            height,
            layers,
        }
    }

    /// Build a pyramid whose layers grow by [`LAYER_STEP`] from a
    /// `width × height` base (layer 0) up to `layer_count - 1`.
    pub fn uniform(width: u32, height: u32, layer_count: u32) -> Self {
        let top = LAYER_STEP.saturating_pow(layer_count.saturating_sub(1)) as f32;
        let layers = (0..layer_count)
            .map(|layer| {
                let step = LAYER_STEP.saturating_pow(layer);
                let scale = step as f32;
                LayerExtent::new(
                    width.saturating_mul(step).div_ceil(TILE_PIX_LENGTH).max(1),
                    height.saturating_mul(step).div_ceil(TILE_PIX_LENGTH).max(1),
                    scale,
                    top / scale,
                )
            })
            .collect();
        Self::new(width, height, layers)
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn layer(&self, layer: u32) -> Option<&LayerExtent> {
        self.layers.get(layer as usize)
    }

    /// Tiles in the given layer, if it exists.
    pub fn tile_count(&self, layer: u32) -> Option<u32> {
        self.layer(layer).map(LayerExtent::tile_count)
    }

    /// Tiles across all layers.
    pub fn total_tiles(&self) -> u64 {
        self.layers.iter().map(|l| l.tile_count() as u64).sum()
    }

    /// Index of the layer with the most tiles.
    pub fn highest_resolution_layer(&self) -> Option<u32> {
        self.layers
            .iter()
            .enumerate()
            .max_by_key(|(_, l)| l.tile_count())
            .map(|(i, _)| i as u32)
    }

    /// Linear coordinate of the tile at column `x`, row `y` of `layer`.
    pub fn coord_at(&self, layer: u32, x: u32, y: u32) -> Option<TileCoord> {
        let extent = self.layer(layer)?;
        if x >= extent.x_tiles || y >= extent.y_tiles {
            return None;
        }
        let tile = y.checked_mul(extent.x_tiles)?.checked_add(x)?;
        Some(TileCoord::new(layer, tile))
    }

    /// Column and row of `coord` within its layer.
    pub fn tile_xy(&self, coord: TileCoord) -> Option<(u32, u32)> {
        let extent = self.layer(coord.layer)?;
        if coord.tile >= extent.tile_count() {
            return None;
        }
        Some((coord.tile % extent.x_tiles, coord.tile / extent.x_tiles))
    }

    /// Check that `coord` addresses an existing tile.
    pub fn check(&self, coord: TileCoord) -> Result<(), TileError> {
        let extent = self.layer(coord.layer).ok_or(TileError::InvalidLayer {
            layer: coord.layer,
            layer_count: self.layers.len(),
        })?;
        if coord.tile >= extent.tile_count() {
            return Err(TileError::TileOutOfBounds {
                layer: coord.layer,
                tile: coord.tile,
                tile_count: extent.tile_count(),
            });
        }
        Ok(())
    }

    /// Validate the geometry a slide is opened with.
    pub fn validate(&self) -> Result<(), GeometryError> {
        if self.layers.is_empty() {
            return Err(GeometryError::NoLayers);
        }
        if self.width == 0 || self.height == 0 {
            return Err(GeometryError::EmptyExtent {
                width: self.width,
                height: self.height,
            });
        }

        for (index, layer) in self.layers.iter().enumerate() {
            if layer.x_tiles == 0 || layer.y_tiles == 0 {
                return Err(GeometryError::InvalidLayer {
                    layer: index as u32,
                    message: format!("empty tile grid {}x{}", layer.x_tiles, layer.y_tiles),
                });
            }
            if layer.checked_tile_count().is_none() {
                return Err(GeometryError::InvalidLayer {
                    layer: index as u32,
                    message: format!(
                        "tile grid {}x{} exceeds the {} addressable tiles",
                        layer.x_tiles,
                        layer.y_tiles,
                        u32::MAX
                    ),
                });
            }
            let valid_factor = |v: f32| v.is_finite() && v > 0.0;
            if !valid_factor(layer.scale) || !valid_factor(layer.downsample) {
                return Err(GeometryError::InvalidLayer {
                    layer: index as u32,
                    message: format!(
                        "scale {} and downsample {} must be positive",
                        layer.scale, layer.downsample
                    ),
                });
            }
        }

        // Resolution must move in a single direction through the list
        let mut direction = std::cmp::Ordering::Equal;
        for (index, pair) in self.layers.windows(2).enumerate() {
            let step = pair[1].tile_count().cmp(&pair[0].tile_count());
            if step == std::cmp::Ordering::Equal {
                continue;
            }
            if direction != std::cmp::Ordering::Equal && step != direction {
                return Err(GeometryError::Unordered {
                    layer: index as u32 + 1,
                });
            }
            direction = step;
        }

        Ok(())
    }

    /// Parse an `extent.json` document.
    pub fn from_json(json: &[u8]) -> Result<Self, GeometryError> {
        let extent: Extent =
            serde_json::from_slice(json).map_err(|e| GeometryError::Malformed(e.to_string()))?;
        extent.validate()?;
        Ok(extent)
    }
}
