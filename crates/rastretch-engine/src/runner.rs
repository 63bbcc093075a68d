//! Per-tile lifecycle: read, mask, normalize, transform, restore, write.
//!
//! Bands are processed one after another and, within a band, tiles in
//! the tiler's row-major order. Exactly one tile buffer is alive at a
//! time: it is allocated when the tile starts and released once the tile
//! has been written, before the next allocation.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::buffer::SharedBuffer;
use crate::config::{EngineConfig, StatisticsScope};
use crate::diagnostics::{Clock, RunDiagnostics, TileDiagnostics};
use crate::mask::NoDataMask;
use crate::pool::WorkerPool;
use crate::raster::{RasterSink, RasterSource};
use crate::stats::{
    BandStatistics, StatisticsAccumulator, denormalize, histogram_cdf, normalize,
    percentile_bounds, scale_to_range,
};
use crate::tiler::segment_image;
use crate::transform::{RowTransform, TransformParameters};
use crate::types::{ConfigError, EngineError, PoolError, RasterError, Tile};

/// Per-band inputs shared by every tile of the band.
#[derive(Debug, Clone, PartialEq)]
pub struct BandPlan {
    /// Band index.
    pub band: usize,
    /// Values masked as no-data on input (NaN is always masked).
    pub sentinels: Vec<f32>,
    /// Value written at masked positions on output.
    pub output_sentinel: f32,
    /// Band-wide statistics, when the statistics scope is
    /// [`StatisticsScope::Band`].
    pub statistics: Option<BandStatistics>,
}

/// Drives the worker pool over every tile of every band.
#[derive(Debug, Clone)]
pub struct TileRunner {
    config: EngineConfig,
    pool: WorkerPool,
}

impl TileRunner {
    /// Validate `config` and build the runner.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] in `config`.
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let pool = config.pool()?;
        Ok(Self { config, pool })
    }

    /// The validated configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The pool every tile runs on.
    #[must_use]
    pub const fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Process every band of `source` into `sink`.
    ///
    /// Stops at the first failing tile; tiles already written stay
    /// written.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] for an empty image,
    /// [`EngineError::Allocation`] if a tile buffer cannot be allocated,
    /// [`EngineError::Raster`] for source or sink failures, and
    /// [`EngineError::Tile`] if the pool fails on a tile.
    pub fn run<S, K, C>(
        &self,
        source: &S,
        sink: &mut K,
        clock: &C,
    ) -> Result<RunDiagnostics, EngineError>
    where
        S: RasterSource + ?Sized,
        K: RasterSink + ?Sized,
        C: Clock,
    {
        let start = clock.now();
        let dimensions = source.dimensions();
        let tiles = segment_image(
            dimensions.width,
            dimensions.height,
            self.config.vertical_segments,
            self.config.horizontal_segments,
        )?;
        let segment_count = tiles.len();
        let band_count = source.band_count();
        info!(
            width = dimensions.width,
            height = dimensions.height,
            band_count,
            segment_count,
            transform = self.config.transform.name(),
            workers = self.pool.workers(),
            "image segmented"
        );

        let mut diagnostics = Vec::with_capacity(segment_count * band_count);
        for band in 0..band_count {
            let plan = self.plan_band(source, band)?;
            if let Some(value) = self.output_no_data(source, band) {
                sink.set_no_data(band, value)?;
            }
            for (index, &tile) in tiles.iter().enumerate() {
                let segment = index + 1;
                info!(band, "processing segment {segment} of {segment_count}");
                diagnostics.push(self.process_tile(
                    source,
                    sink,
                    &plan,
                    segment,
                    segment_count,
                    tile,
                    clock,
                )?);
            }
        }

        Ok(RunDiagnostics {
            transform: self.config.transform.name().to_string(),
            dimensions,
            band_count,
            segment_count,
            workers: self.pool.workers(),
            tiles: diagnostics,
            total_duration: clock.elapsed(&start),
        })
    }

    /// No-data value for output: the configured one, else the band's.
    fn output_no_data<S: RasterSource + ?Sized>(&self, source: &S, band: usize) -> Option<f64> {
        self.config.no_data.or_else(|| source.no_data(band))
    }

    /// Gather the sentinels and (for band scope) statistics of `band`.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] if streaming the band fails.
    #[allow(clippy::cast_possible_truncation)]
    pub fn plan_band<S: RasterSource + ?Sized>(
        &self,
        source: &S,
        band: usize,
    ) -> Result<BandPlan, EngineError> {
        let sentinels: Vec<f32> = [source.no_data(band), self.config.no_data]
            .into_iter()
            .flatten()
            .filter(|v| !v.is_nan())
            .map(|v| v as f32)
            .collect();
        let output_sentinel = self
            .output_no_data(source, band)
            .map_or(f32::NAN, |v| v as f32);
        let statistics = match self.config.statistics_scope {
            StatisticsScope::Band => {
                let stats = source.band_statistics(band, &sentinels)?;
                if stats.is_none() {
                    warn!(band, "band has no valid samples");
                }
                stats
            }
            StatisticsScope::Tile => None,
        };
        debug!(band, ?sentinels, ?statistics, "band planned");
        Ok(BandPlan {
            band,
            sentinels,
            output_sentinel,
            statistics,
        })
    }

    /// Run the full lifecycle for one tile of one band.
    ///
    /// # Errors
    ///
    /// See [`run`](Self::run).
    #[allow(clippy::too_many_arguments)]
    pub fn process_tile<S, K, C>(
        &self,
        source: &S,
        sink: &mut K,
        plan: &BandPlan,
        segment: usize,
        segment_count: usize,
        tile: Tile,
        clock: &C,
    ) -> Result<TileDiagnostics, EngineError>
    where
        S: RasterSource + ?Sized,
        K: RasterSink + ?Sized,
        C: Clock,
    {
        let start = clock.now();
        let band = plan.band;
        let transform = &self.config.transform;
        let window = tile.expand(transform.halo(), source.dimensions());
        let row_offset = tile.y_start - window.y_start;
        let col_offset = tile.x_start - window.x_start;

        // 1. Load.
        let mut buffer = SharedBuffer::create(window.height, window.width)?;
        source.read_window(band, window, &mut buffer)?;

        // 2. Mask.
        let mask = NoDataMask::apply(buffer.as_mut_slice(), &plan.sentinels);

        // 3-7. Transform, unless every sample is no-data.
        let (workers, pool_duration) = if mask.masked_count() == buffer.as_slice().len() {
            debug!(band, segment, "tile is entirely no-data; skipping transform");
            (0, Duration::ZERO)
        } else {
            self.transform_tile(&mut buffer, plan, tile, (row_offset, col_offset), clock)
                .map_err(|error| EngineError::Tile {
                    band,
                    segment,
                    segment_count,
                    tile,
                    source: error,
                })?
        };

        // 8. Restore no-data.
        mask.restore(buffer.as_mut_slice(), plan.output_sentinel);

        // 9. Write the core tile and release.
        let region = buffer
            .region(row_offset, col_offset, tile.height, tile.width)
            .ok_or_else(|| RasterError::ShapeMismatch {
                tile,
                rows: buffer.rows(),
                cols: buffer.cols(),
            })?;
        sink.write_window(band, tile, region)?;
        buffer.release();

        Ok(TileDiagnostics {
            band,
            segment,
            tile,
            window,
            workers,
            masked: mask.masked_count(),
            pool_duration,
            duration: clock.elapsed(&start),
        })
    }

    /// Steps 3 to 7 of the tile lifecycle: normalize, derive tile
    /// parameters, run the pool, denormalize, and scale. Returns the
    /// number of workers used and the time spent in the pool.
    fn transform_tile<C: Clock>(
        &self,
        buffer: &mut SharedBuffer,
        plan: &BandPlan,
        tile: Tile,
        (row_offset, col_offset): (usize, usize),
        clock: &C,
    ) -> Result<(usize, Duration), PoolError> {
        let transform = &self.config.transform;

        let statistics = match plan.statistics {
            Some(stats) => stats,
            None => tile_statistics(buffer, row_offset, col_offset, tile)
                .unwrap_or(BandStatistics::EMPTY),
        };
        let normalized = transform.requires_normalization();
        let mut params = if normalized {
            normalize(buffer.as_mut_slice(), statistics.minimum, statistics.maximum);
            TransformParameters::normalized(&statistics)
        } else {
            TransformParameters::raw(&statistics)
        };

        if let Some(clip) = transform.clip()
            && clip > 0.0
            && let Some((lower, upper)) = percentile_bounds(buffer.as_slice(), clip)
        {
            params.lower_bound = lower;
            params.upper_bound = upper;
        }
        if let Some(bins) = transform.histogram_bins() {
            params.histogram = histogram_cdf(buffer.as_slice(), bins);
        }

        let pool_start = clock.now();
        let report = self.pool.run(buffer, transform, &params)?;
        let pool_duration = clock.elapsed(&pool_start);

        if normalized {
            denormalize(buffer.as_mut_slice(), statistics.minimum, statistics.maximum);
        }
        if let Some(scale) = self.config.scale {
            scale_to_range(
                buffer.as_mut_slice(),
                transform.output_range(&statistics),
                (scale.min, scale.max),
            );
        }
        Ok((report.worker_count(), pool_duration))
    }
}

/// Statistics over the valid samples of the tile's core (the window
/// without its halo).
fn tile_statistics(
    buffer: &SharedBuffer,
    row_offset: usize,
    col_offset: usize,
    tile: Tile,
) -> Option<BandStatistics> {
    let region = buffer.region(row_offset, col_offset, tile.height, tile.width)?;
    let mut accumulator = StatisticsAccumulator::default();
    for row in region.rows() {
        accumulator.extend(row);
    }
    accumulator.finish()
}
