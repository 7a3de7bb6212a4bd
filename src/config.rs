//! Configuration management for the tile cache tools.
//!
//! This module provides the command-line interface:
//! - Command-line arguments via clap
//! - Environment variables with `WSI_` prefix
//! - Sensible defaults for all optional settings
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use wsi_tile_cache::config::{Cli, Command};
//!
//! let cli = Cli::parse();
//! match cli.command {
//!     Command::Simulate(config) => println!("{} layers", config.layers),
//!     Command::Load(config) => println!("loading {}", config.path.display()),
//!     Command::Check(config) => println!("checking {}", config.path.display()),
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `WSI_CACHE_TILES` - Max tiles to cache (default: 1000)
//! - `WSI_EVICTION_WINDOW` - LRU entries considered per eviction (default: 16)
//! - `WSI_WORKERS` - Concurrent decodes (default: available parallelism)
//! - `WSI_FORMAT` - Decoded pixel format (default: rgba)
//! - `WSI_LAYERS` - Simulated pyramid depth (default: 4)
//! - `WSI_BASE_TILES` - Simulated tiles per side of layer 0 (default: 2)
//! - `WSI_TILE_SIZE` - Simulated tile edge in pixels (default: 256)
//! - `WSI_DECODE_LATENCY_MS` - Simulated decode latency (default: 5)

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::slide::SlideOpenInfo;
use crate::tile::{
    Extent, Format, LoaderConfig, DEFAULT_EVICTION_WINDOW, DEFAULT_TILE_CACHE_CAPACITY, TILE_PIX_LENGTH,
};

// =============================================================================
// Default Values
// =============================================================================

/// Default number of simulated pyramid layers.
pub const DEFAULT_LAYERS: u32 = 4;

/// Default tiles per side of the simulated lowest-resolution layer.
pub const DEFAULT_BASE_TILES: u32 = 2;

/// Default number of zoom steps in a simulated session.
pub const DEFAULT_ZOOM_STEPS: u32 = 12;

/// Default simulated decode latency in milliseconds.
pub const DEFAULT_DECODE_LATENCY_MS: u64 = 5;

/// Default number of tiles loaded by the `load` command.
pub const DEFAULT_LOAD_LIMIT: usize = 256;

/// Deepest pyramid the simulation accepts.
pub const MAX_SIMULATED_LAYERS: u32 = 8;

/// Largest tile edge accepted, in pixels.
pub const MAX_TILE_SIZE: u32 = 4096;

// =============================================================================
// CLI Arguments
// =============================================================================

/// WSI Tile Cache - Decoded tile caching for Whole Slide Image viewers.
#[derive(Parser, Debug, Clone)]
#[command(name = "wsi-tile-cache")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run a simulated pan/zoom session against a synthetic pyramid
    Simulate(SimulateConfig),

    /// Load tiles from a tile directory through the cache
    Load(LoadConfig),

    /// Validate a tile directory's geometry and tile files
    Check(CheckConfig),
}

/// Cache settings shared by the commands that open a slide.
#[derive(Args, Debug, Clone)]
pub struct CacheArgs {
    /// Maximum number of decoded tiles to cache.
    #[arg(long, default_value_t = DEFAULT_TILE_CACHE_CAPACITY, env = "WSI_CACHE_TILES")]
    pub cache_tiles: usize,

    /// Least-recently-used entries considered on each eviction.
    #[arg(long, default_value_t = DEFAULT_EVICTION_WINDOW, env = "WSI_EVICTION_WINDOW")]
    pub eviction_window: usize,

    /// Maximum concurrent decodes.
    ///
    /// Defaults to the available parallelism.
    #[arg(long, env = "WSI_WORKERS")]
    pub workers: Option<usize>,

    /// Pixel format of decoded tiles (rgb, bgr, rgba, bgra).
    #[arg(long, default_value_t = Format::R8G8B8A8, env = "WSI_FORMAT")]
    pub format: Format,
}

impl CacheArgs {
    fn validate(&self) -> Result<(), String> {
        if self.cache_tiles == 0 {
            return Err("cache_tiles must be greater than 0".to_string());
        }
        if self.eviction_window == 0 {
            return Err("eviction_window must be greater than 0".to_string());
        }
        if self.workers == Some(0) {
            return Err("workers must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Slide options described by these arguments.
    pub fn open_info(&self) -> SlideOpenInfo {
        let mut loader = LoaderConfig::default();
        if let Some(workers) = self.workers {
            loader = loader.with_max_concurrent_decodes(workers);
        }
        SlideOpenInfo::new()
            .with_capacity(self.cache_tiles)
            .with_eviction_window(self.eviction_window)
            .with_loader(loader)
    }
}

/// Configuration for the `simulate` command.
#[derive(Args, Debug, Clone)]
pub struct SimulateConfig {
    /// Number of pyramid layers.
    #[arg(long, default_value_t = DEFAULT_LAYERS, env = "WSI_LAYERS")]
    pub layers: u32,

    /// Tiles per side of the lowest-resolution layer.
    #[arg(long, default_value_t = DEFAULT_BASE_TILES, env = "WSI_BASE_TILES")]
    pub base_tiles: u32,

    /// Edge length of generated tiles in pixels.
    #[arg(long, default_value_t = TILE_PIX_LENGTH, env = "WSI_TILE_SIZE")]
    pub tile_size: u32,

    /// Number of zoom steps in the session.
    #[arg(long, default_value_t = DEFAULT_ZOOM_STEPS)]
    pub zoom_steps: u32,

    /// Artificial latency of each decode in milliseconds.
    #[arg(long, default_value_t = DEFAULT_DECODE_LATENCY_MS, env = "WSI_DECODE_LATENCY_MS")]
    pub decode_latency_ms: u64,

    #[command(flatten)]
    pub cache: CacheArgs,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl SimulateConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.layers == 0 || self.layers > MAX_SIMULATED_LAYERS {
            return Err(format!(
                "layers must be between 1 and {}",
                MAX_SIMULATED_LAYERS
            ));
        }
        if self.base_tiles == 0 {
            return Err("base_tiles must be greater than 0".to_string());
        }
        if self.tile_size == 0 || self.tile_size > MAX_TILE_SIZE {
            return Err(format!("tile_size must be between 1 and {}", MAX_TILE_SIZE));
        }
        if self.zoom_steps == 0 {
            return Err("zoom_steps must be greater than 0".to_string());
        }
        // Deep pyramids over a wide base outgrow the u32 tile index
        self.pyramid().validate().map_err(|e| {
            format!(
                "{} layers over {} base tiles is not addressable: {}",
                self.layers, self.base_tiles, e
            )
        })?;
        self.cache.validate()
    }

    /// Pixel width and height of the lowest-resolution layer.
    pub fn base_extent(&self) -> u32 {
        self.base_tiles.saturating_mul(TILE_PIX_LENGTH)
    }

    /// The simulated pyramid.
    pub fn pyramid(&self) -> Extent {
        let base = self.base_extent();
        Extent::uniform(base, base, self.layers)
    }
}

/// Configuration for the `load` command.
#[derive(Args, Debug, Clone)]
pub struct LoadConfig {
    /// Tile directory containing extent.json and <layer>/<tile>.jpg files.
    pub path: PathBuf,

    /// Layer to load. Defaults to the layer with the fewest tiles.
    #[arg(long)]
    pub layer: Option<u32>,

    /// Maximum number of tiles to load.
    #[arg(long, default_value_t = DEFAULT_LOAD_LIMIT)]
    pub limit: usize,

    /// Load every tile a second time to measure cache hits.
    #[arg(long, default_value_t = false)]
    pub repeat: bool,

    #[command(flatten)]
    pub cache: CacheArgs,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl LoadConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.path.as_os_str().is_empty() {
            return Err("A tile directory path is required".to_string());
        }
        if self.limit == 0 {
            return Err("limit must be greater than 0".to_string());
        }
        self.cache.validate()
    }
}

/// Configuration for the `check` command.
#[derive(Args, Debug, Clone)]
pub struct CheckConfig {
    /// Tile directory to validate.
    pub path: PathBuf,

    /// Also decode every tile, not just check that it exists.
    #[arg(long, default_value_t = false)]
    pub decode: bool,

    /// Pixel format used when decoding.
    #[arg(long, default_value_t = Format::R8G8B8A8, env = "WSI_FORMAT")]
    pub format: Format,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl CheckConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.path.as_os_str().is_empty() {
            return Err("A tile directory path is required".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
