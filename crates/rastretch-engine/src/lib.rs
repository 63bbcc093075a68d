//! rastretch-engine: Segmented, parallel raster transforms (sans-IO).
//!
//! Applies contrast stretches and neighbourhood filters to rasters too
//! large to hold in memory at once:
//! tile -> load -> mask no-data -> normalize -> parallel transform ->
//! denormalize -> scale -> restore no-data -> write.
//!
//! Each tile is staged in a single [`SharedBuffer`] that a fixed-size
//! [`WorkerPool`] mutates in place, one disjoint row block per worker.
//! Memory use is bounded by one tile; CPU use by the worker count.
//!
//! This crate has **no file I/O** -- rasters are read and written through
//! the [`RasterSource`] and [`RasterSink`] traits. [`MemoryRaster`]
//! implements both for in-memory bands.

pub mod buffer;
pub mod config;
pub mod diagnostics;
pub mod filter;
pub mod mask;
pub mod pool;
pub mod raster;
pub mod runner;
pub mod stats;
pub mod stretch;
pub mod tiler;
pub mod transform;
pub mod types;

pub use buffer::{BufferRegion, BufferView, RowBlock, SharedBuffer, partition_rows};
pub use config::{EngineConfig, ScaleRange, StatisticsScope};
pub use diagnostics::{Clock, RunDiagnostics, StdClock, TileDiagnostics};
pub use mask::NoDataMask;
pub use pool::{PoolReport, WorkerPool};
pub use raster::{BandImage, MemoryRaster, RasterSink, RasterSource};
pub use runner::{BandPlan, TileRunner};
pub use stats::BandStatistics;
pub use tiler::segment_image;
pub use transform::{CancelToken, RowTransform, Transform, TransformContext, TransformParameters};
pub use types::{
    ConfigError, Dimensions, EngineError, PoolError, RasterError, RowRange, Tile, TransformError,
};

/// Transform every band of `source` into `sink`.
///
/// # Steps
///
/// 1. Validate `config` (before anything is allocated)
/// 2. Segment the image into tiles
/// 3. Per band: collect sentinels and, for band scope, statistics
/// 4. Per tile: run the [`TileRunner`] lifecycle on the worker pool
///
/// # Errors
///
/// Returns [`EngineError::Config`] if `config` is invalid or the image is
/// empty, [`EngineError::Allocation`] if a tile buffer cannot be
/// allocated, [`EngineError::Raster`] if the source or sink fails, and
/// [`EngineError::Tile`] if a worker fails, panics, or times out.
pub fn run<S, K>(
    source: &S,
    sink: &mut K,
    config: &EngineConfig,
) -> Result<RunDiagnostics, EngineError>
where
    S: RasterSource + ?Sized,
    K: RasterSink + ?Sized,
{
    run_with_clock(source, sink, config, &StdClock)
}

/// [`run`] with a caller-supplied [`Clock`] for diagnostics.
///
/// # Errors
///
/// See [`run`].
pub fn run_with_clock<S, K, C>(
    source: &S,
    sink: &mut K,
    config: &EngineConfig,
    clock: &C,
) -> Result<RunDiagnostics, EngineError>
where
    S: RasterSource + ?Sized,
    K: RasterSink + ?Sized,
    C: Clock,
{
    TileRunner::new(config.clone())?.run(source, sink, clock)
}
