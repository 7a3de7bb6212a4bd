use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::tile::TileCoord;

/// Errors returned by [`Buffer`](crate::buffer::Buffer) mutators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    /// The operation is not permitted for the buffer's current reference strength
    /// (e.g. growing a weak buffer, which would require reallocating memory it
    /// does not own).
    #[error("Invalid operation: {0}")]
    InvalidOperation(&'static str),

    /// A size argument is out of range for this buffer
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// I/O errors that can occur when reading encoded tiles from a source
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// The tile or geometry file does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other filesystem error
    #[error("I/O error on {path}: {message}")]
    Other { path: String, message: String },
}

impl IoError {
    /// Classify a `std::io::Error` raised while accessing `path`.
    pub fn from_std(path: impl Into<String>, err: std::io::Error) -> Self {
        let path = path.into();
        if err.kind() == std::io::ErrorKind::NotFound {
            IoError::NotFound(path)
        } else {
            IoError::Other {
                path,
                message: err.to_string(),
            }
        }
    }
}

/// Errors describing an invalid pyramid geometry
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    /// The pyramid has no layers
    #[error("Pyramid has no layers")]
    NoLayers,

    /// The base extent has a zero dimension
    #[error("Invalid base extent {width}x{height}")]
    EmptyExtent { width: u32, height: u32 },

    /// A layer has a zero tile grid or a non-positive scale factor
    #[error("Invalid layer {layer}: {message}")]
    InvalidLayer { layer: u32, message: String },

    /// Tile counts do not change monotonically from one layer to the next
    #[error("Layers are not consistently ordered by resolution (layer {layer})")]
    Unordered { layer: u32 },

    /// The geometry file could not be parsed
    #[error("Malformed geometry: {0}")]
    Malformed(String),
}

/// Errors that can occur when opening a slide
#[derive(Debug, Clone, Error)]
pub enum SlideError {
    /// The geometry file could not be read
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// The geometry is invalid
    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),

    /// No tokio runtime was available to run decodes on
    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// Errors produced by a tile decoder.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// Reading the encoded tile failed
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// The encoded payload could not be decoded
    #[error("Image decode error: {message}")]
    Image { message: String },

    /// The decoded image does not fit in a tile
    #[error("Decoded tile is {width}x{height}, larger than the {tile_size}px tile size")]
    UnexpectedDimensions {
        width: u32,
        height: u32,
        tile_size: u32,
    },

    /// Assembling the output buffer failed
    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    /// The decode worker panicked or was aborted
    #[error("Decode worker failed: {0}")]
    Worker(String),
}

/// Errors reported to whoever requested a tile.
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// Requested layer does not exist in the pyramid
    #[error("Invalid layer {layer}: slide has {layer_count} layers")]
    InvalidLayer { layer: u32, layer_count: usize },

    /// Tile index is outside the layer's grid
    #[error("Tile {tile} out of bounds for layer {layer} ({tile_count} tiles)")]
    TileOutOfBounds {
        layer: u32,
        tile: u32,
        tile_count: u32,
    },

    /// The decoder failed for this tile
    #[error("Failed to decode tile {coord}: {source}")]
    DecodeFailure {
        coord: TileCoord,
        #[source]
        source: Arc<DecodeError>,
    },

    /// The tile failed recently and is not retried until the back-off expires
    #[error("Tile {coord} is backing off for {retry_in:?} after {failures} failure(s): {source}")]
    BackedOff {
        coord: TileCoord,
        failures: u32,
        retry_in: Duration,
        #[source]
        source: Arc<DecodeError>,
    },

    /// The load coordinator dropped the request before it completed
    #[error("Load of tile {coord} was abandoned")]
    Abandoned { coord: TileCoord },
}

impl TileError {
    /// The underlying decoder failure, if this error carries one.
    pub fn decode_cause(&self) -> Option<&DecodeError> {
        match self {
            TileError::DecodeFailure { source, .. } | TileError::BackedOff { source, .. } => {
                Some(source.as_ref())
            }
            _ => None,
        }
    }
}
