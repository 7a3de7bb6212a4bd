//! WSI Tile Cache - command-line tools for the decoded tile cache.
//!
//! `simulate` drives a synthetic pan/zoom session, `load` pulls tiles from a
//! tile directory through the cache and `check` validates a tile directory.

use clap::Parser;
use std::process::ExitCode;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wsi_tile_cache::{
    config::{CheckConfig, Cli, Command, LoadConfig, SimulateConfig},
    decode::{DirectoryTileSource, JpegTileDecoder, SyntheticDecoder, TileDecoder, TileSource},
    slide::Slide,
    tile::{CacheStats, Extent, RequestOutcome, TileCoord},
};

/// Tiles per side of the simulated viewport.
const VIEWPORT_TILES: u32 = 4;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::Simulate(config) => run_simulate(config).await,
        Command::Load(config) => run_load(config).await,
        Command::Check(config) => run_check(config).await,
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "wsi_tile_cache=debug"
    } else {
        "wsi_tile_cache=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn log_stats(stats: &CacheStats, decodes: u64) {
    info!(
        "  Cache: {}/{} tiles, {} hits, {} misses ({:.1}% hit rate)",
        stats.entries,
        stats.capacity,
        stats.hits,
        stats.misses,
        stats.hit_rate() * 100.0
    );
    info!(
        "  Inserted {} tile(s), evicted {}, decoded {}",
        stats.insertions, stats.evictions, decodes
    );
}

// =============================================================================
// Simulate Command
// =============================================================================

async fn run_simulate(config: SimulateConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let extent = config.pyramid();
    let mut decoder = SyntheticDecoder::new(config.cache.format, config.tile_size);
    if config.decode_latency_ms > 0 {
        decoder = decoder.with_latency(Duration::from_millis(config.decode_latency_ms));
    }

    let active_layer = Arc::new(AtomicU32::new(0));
    let info = config
        .cache
        .open_info()
        .with_high_resolution_index(active_layer.clone());

    info!("Simulating {} zoom step(s)", config.zoom_steps);
    info!(
        "  Pyramid: {} layer(s), {} tiles total, {} {}px tiles",
        extent.layer_count(),
        extent.total_tiles(),
        config.cache.format,
        config.tile_size
    );

    let slide = match Slide::open(extent, Arc::new(decoder), info) {
        Ok(slide) => slide,
        Err(e) => {
            error!("Failed to open slide: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let started = Instant::now();
    let top = config.layers - 1;
    for step in 0..config.zoom_steps {
        // Zoom in to the top layer, then back out
        let cycle = step % (2 * top).max(1);
        let layer = if cycle <= top { cycle } else { 2 * top - cycle };
        active_layer.store(layer, Ordering::Release);

        let viewport = viewport(slide.extent(), layer, step);
        let mut ready = 0;
        let mut pending = Vec::new();
        let mut rejected = 0;
        for coord in viewport.iter().copied() {
            match slide.request(coord) {
                Ok(RequestOutcome::Ready(_)) => ready += 1,
                Ok(RequestOutcome::Pending(handle)) => pending.push(handle),
                Ok(RequestOutcome::Rejected) => rejected += 1,
                Err(e) => warn!("Request for tile {} failed: {}", coord, e),
            }
        }

        // A tile from a layer the view has left behind is not worth decoding
        if layer >= 2 {
            if let Ok(RequestOutcome::Rejected) = slide.request(TileCoord::new(layer - 2, 0)) {
                rejected += 1;
            }
        }

        let decoded = pending.len();
        for handle in pending {
            if let Err(e) = handle.wait().await {
                warn!("Tile {} failed: {}", handle.coord(), e);
            }
        }

        info!(
            "Step {:>2}: layer {} | {} cached, {} decoded, {} rejected | {} resident",
            step,
            layer,
            ready,
            decoded,
            rejected,
            slide.cache().len()
        );
    }

    info!("");
    info!("Session finished in {:.2?}", started.elapsed());
    log_stats(&slide.stats(), slide.loader().decode_count());
    info!(
        "  Resident: {:.1} MiB",
        slide.cache().resident_bytes() as f64 / (1024.0 * 1024.0)
    );

    ExitCode::SUCCESS
}

/// Tiles visible at `step`, panning one column per step.
fn viewport(extent: &Extent, layer: u32, step: u32) -> Vec<TileCoord> {
    let Some(grid) = extent.layer(layer) else {
        return Vec::new();
    };
    let width = VIEWPORT_TILES.min(grid.x_tiles);
    let height = VIEWPORT_TILES.min(grid.y_tiles);
    let left = (grid.x_tiles - width) / 2 + step % (grid.x_tiles - width + 1);
    let left = left.min(grid.x_tiles - width);
    let top = (grid.y_tiles - height) / 2;

    (top..top + height)
        .flat_map(|y| (left..left + width).map(move |x| (x, y)))
        .filter_map(|(x, y)| extent.coord_at(layer, x, y))
        .collect()
}

// =============================================================================
// Load Command
// =============================================================================

async fn run_load(config: LoadConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let slide = match Slide::open_directory(
        &config.path,
        config.cache.format,
        config.cache.open_info(),
    )
    .await
    {
        Ok(slide) => slide,
        Err(e) => {
            error!("Failed to open {}: {}", config.path.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let extent = slide.extent().clone();
    let layer = match config.layer {
        Some(layer) => layer,
        None => (0..extent.layer_count() as u32)
            .min_by_key(|&layer| extent.tile_count(layer).unwrap_or(u32::MAX))
            .unwrap_or(0),
    };
    let Some(tile_count) = extent.tile_count(layer) else {
        error!(
            "Layer {} does not exist (slide has {} layers)",
            layer,
            extent.layer_count()
        );
        return ExitCode::FAILURE;
    };

    let coords: Vec<TileCoord> = (0..tile_count)
        .take(config.limit)
        .map(|tile| TileCoord::new(layer, tile))
        .collect();
    info!(
        "Loading {} of {} tile(s) from layer {}",
        coords.len(),
        tile_count,
        layer
    );

    let passes = if config.repeat { 2 } else { 1 };
    let mut failures = 0;
    for pass in 1..=passes {
        let started = Instant::now();
        let mut pending = Vec::new();
        for coord in coords.iter().copied() {
            match slide.request(coord) {
                Ok(RequestOutcome::Pending(handle)) => pending.push(handle),
                Ok(_) => {}
                Err(e) => {
                    warn!("Tile {}: {}", coord, e);
                    failures += 1;
                }
            }
        }

        let mut bytes = 0;
        for handle in pending {
            match handle.wait().await {
                Ok(buffer) => bytes += buffer.size(),
                Err(e) => {
                    warn!("Tile {}: {}", handle.coord(), e);
                    failures += 1;
                }
            }
        }

        info!(
            "Pass {}: {:.2?}, {:.1} MiB decoded",
            pass,
            started.elapsed(),
            bytes as f64 / (1024.0 * 1024.0)
        );
    }

    log_stats(&slide.stats(), slide.loader().decode_count());

    if failures > 0 {
        error!("{} tile(s) failed", failures);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

// =============================================================================
// Check Command
// =============================================================================

async fn run_check(config: CheckConfig) -> ExitCode {
    // Initialize minimal logging for check command
    if config.verbose {
        init_logging(true);
    }

    println!("WSI Tile Directory Check");
    println!("════════════════════════");
    println!();

    if let Err(e) = config.validate() {
        println!("✗ {}", e);
        return ExitCode::FAILURE;
    }

    let source = DirectoryTileSource::new(&config.path);
    let extent = match source.read_extent().await {
        Ok(extent) => {
            println!("✓ Geometry: {}x{}", extent.width, extent.height);
            extent
        }
        Err(e) => {
            println!("✗ Geometry: {}", e);
            return ExitCode::FAILURE;
        }
    };

    for (index, layer) in extent.layers.iter().enumerate() {
        println!(
            "  Layer {}: {}x{} tiles, scale {}, downsample {}",
            index, layer.x_tiles, layer.y_tiles, layer.scale, layer.downsample
        );
    }
    println!();

    let decoder = JpegTileDecoder::new(source.clone()).with_format(config.format);
    let mut missing = Vec::new();
    let mut corrupt = Vec::new();

    for (layer, grid) in extent.layers.iter().enumerate() {
        for tile in 0..grid.tile_count() {
            let coord = TileCoord::new(layer as u32, tile);
            if tokio::fs::metadata(source.tile_path(coord)).await.is_err() {
                missing.push(coord);
                continue;
            }
            if config.decode {
                if let Err(e) = decoder.decode(coord, &extent).await {
                    corrupt.push((coord, e));
                }
            }
        }
    }

    let total = extent.total_tiles();
    if missing.is_empty() {
        println!("✓ Tiles: all {} present in {}", total, source.identifier());
    } else {
        println!("✗ Tiles: {} of {} missing", missing.len(), total);
        for coord in missing.iter().take(10) {
            println!("  {}", source.tile_path(*coord).display());
        }
    }

    if config.decode {
        if corrupt.is_empty() {
            println!("✓ Decode: all present tiles decode as {}", config.format);
        } else {
            println!("✗ Decode: {} tile(s) failed", corrupt.len());
            for (coord, e) in corrupt.iter().take(10) {
                println!("  {}: {}", coord, e);
            }
        }
    }

    println!();
    println!("════════════════════════");
    if missing.is_empty() && corrupt.is_empty() {
        println!("✓ All checks passed!");
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
