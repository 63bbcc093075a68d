//! Shared types for the rastretch engine: geometry, row ranges, and the
//! error taxonomy.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels (number of columns).
    pub width: usize,
    /// Height in pixels (number of rows).
    pub height: usize,
}

impl Dimensions {
    /// Create new dimensions.
    #[must_use]
    pub const fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    /// Total number of pixels.
    #[must_use]
    pub const fn pixel_count(self) -> usize {
        self.width * self.height
    }
}

/// An axis-aligned rectangle in image pixel coordinates.
///
/// Produced by [`segment_image`](crate::tiler::segment_image) and consumed
/// in order by the tile runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tile {
    /// First column covered by the tile.
    pub x_start: usize,
    /// First row covered by the tile.
    pub y_start: usize,
    /// Number of columns.
    pub width: usize,
    /// Number of rows.
    pub height: usize,
}

impl Tile {
    /// Create a new tile.
    #[must_use]
    pub const fn new(x_start: usize, y_start: usize, width: usize, height: usize) -> Self {
        Self {
            x_start,
            y_start,
            width,
            height,
        }
    }

    /// A tile covering the whole image.
    #[must_use]
    pub const fn full(dimensions: Dimensions) -> Self {
        Self::new(0, 0, dimensions.width, dimensions.height)
    }

    /// One past the last column.
    #[must_use]
    pub const fn x_end(self) -> usize {
        self.x_start + self.width
    }

    /// One past the last row.
    #[must_use]
    pub const fn y_end(self) -> usize {
        self.y_start + self.height
    }

    /// Number of pixels covered.
    #[must_use]
    pub const fn pixel_count(self) -> usize {
        self.width * self.height
    }

    /// Returns `true` if the tile lies entirely inside `dimensions`.
    #[must_use]
    pub const fn fits_within(self, dimensions: Dimensions) -> bool {
        self.x_end() <= dimensions.width && self.y_end() <= dimensions.height
    }

    /// Grow the tile by `halo` pixels on every side, clamped to the image.
    ///
    /// Neighbourhood transforms read the grown window so that pixels on
    /// the tile edge see their true neighbours instead of a clamped edge.
    #[must_use]
    pub fn expand(self, halo: usize, dimensions: Dimensions) -> Self {
        let x_start = self.x_start.saturating_sub(halo);
        let y_start = self.y_start.saturating_sub(halo);
        let x_end = (self.x_end() + halo).min(dimensions.width);
        let y_end = (self.y_end() + halo).min(dimensions.height);
        Self::new(x_start, y_start, x_end - x_start, y_end - y_start)
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "x {}..{}, y {}..{}",
            self.x_start,
            self.x_end(),
            self.y_start,
            self.y_end()
        )
    }
}

/// Half-open interval `[start, end)` over a buffer's rows.
///
/// Each range is owned by exactly one worker during a pool run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowRange {
    /// First row (inclusive).
    pub start: usize,
    /// Last row (exclusive).
    pub end: usize,
}

impl RowRange {
    /// Create a new row range.
    #[must_use]
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Number of rows in the range.
    #[must_use]
    pub const fn len(self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// Returns `true` if the range holds no rows.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if the two ranges share at least one row.
    #[must_use]
    pub const fn overlaps(self, other: Self) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Display for RowRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rows {}..{}", self.start, self.end)
    }
}

// ───────────────────────── Errors ──────────────────────────

/// Invalid engine configuration.
///
/// Raised before any tile buffer is allocated; always fatal for the run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// A segment count of zero was requested.
    #[error("{axis} segment count must be positive")]
    ZeroSegments {
        /// `"vertical"` or `"horizontal"`.
        axis: &'static str,
    },

    /// The image has no pixels.
    #[error("image dimensions must be positive, got {width}x{height}")]
    EmptyImage {
        /// Requested width.
        width: usize,
        /// Requested height.
        height: usize,
    },

    /// A worker count of zero was requested.
    #[error("worker count must be positive")]
    ZeroWorkers,

    /// Kernel sizes must be positive, odd, and at most
    /// [`Transform::MAX_KERNEL_SIZE`](crate::Transform::MAX_KERNEL_SIZE).
    #[error("kernel size must be a positive odd integer no larger than 255, got {0}")]
    KernelSize(usize),

    /// Clip percentage outside `[0, 50)`.
    #[error("clip percentage must be in [0, 50), got {0}")]
    Clip(f64),

    /// Histogram equalization needs at least two bins.
    #[error("histogram bin count must be at least 2, got {0}")]
    Bins(usize),

    /// A scalar option is not finite or outside its domain.
    #[error("invalid {name} {value}: {reason}")]
    InvalidValue {
        /// Option name.
        name: &'static str,
        /// Offending value.
        value: f64,
        /// What the option requires.
        reason: &'static str,
    },

    /// Output scale range with `min >= max`.
    #[error("output scale range is empty: [{min}, {max}]")]
    ScaleRange {
        /// Lower end of the requested range.
        min: f64,
        /// Upper end of the requested range.
        max: f64,
    },
}

/// Failure raised by a transform while mutating its row block.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    /// A sample fell outside the transform's numeric domain.
    #[error("{reason} at row {row}, column {col} (value {value})")]
    Domain {
        /// Buffer row of the offending sample.
        row: usize,
        /// Buffer column of the offending sample.
        col: usize,
        /// The offending sample.
        value: f32,
        /// What went wrong.
        reason: &'static str,
    },

    /// A derived parameter makes the transform undefined.
    #[error("parameter {name} = {value} leaves the transform undefined")]
    Parameter {
        /// Parameter name.
        name: &'static str,
        /// Offending value.
        value: f32,
    },

    /// A neighbourhood transform was run without a source snapshot.
    #[error("neighbourhood transform requires a source snapshot")]
    MissingSource,

    /// The pool asked workers to stop.
    #[error("transform cancelled")]
    Cancelled,
}

/// Failure of a whole worker-pool run.
///
/// Only produced after every sibling worker has been joined.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PoolError {
    /// A worker's transform returned an error.
    #[error("worker for {range} failed: {source}")]
    WorkerFailed {
        /// Rows owned by the failing worker.
        range: RowRange,
        /// The transform's error.
        #[source]
        source: TransformError,
    },

    /// A worker panicked.
    #[error("worker for {range} panicked: {message}")]
    WorkerPanicked {
        /// Rows owned by the panicking worker.
        range: RowRange,
        /// Panic payload, when it was a string.
        message: String,
    },

    /// The deadline passed before every worker finished.
    #[error("pool timed out after {timeout:?} with {completed} of {total} workers finished")]
    TimedOut {
        /// Configured timeout.
        timeout: Duration,
        /// Workers that finished before the deadline.
        completed: usize,
        /// Workers spawned.
        total: usize,
    },
}

/// Failure reported by a raster source or sink.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RasterError {
    /// Band index past the raster's band count.
    #[error("band {band} is out of range for a raster with {band_count} bands")]
    BandOutOfRange {
        /// Requested band.
        band: usize,
        /// Bands available.
        band_count: usize,
    },

    /// Window not contained in the raster.
    #[error("window {tile} is outside a {width}x{height} raster")]
    OutOfBounds {
        /// Requested window.
        tile: Tile,
        /// Raster width.
        width: usize,
        /// Raster height.
        height: usize,
    },

    /// Buffer shape does not match the requested window.
    #[error("buffer is {rows}x{cols} but window {tile} was requested")]
    ShapeMismatch {
        /// Requested window.
        tile: Tile,
        /// Buffer rows.
        rows: usize,
        /// Buffer columns.
        cols: usize,
    },

    /// Bands of differing sizes were supplied.
    #[error("band {band} is {found:?}, expected {expected:?}")]
    BandSize {
        /// Offending band.
        band: usize,
        /// Size of band 0.
        expected: Dimensions,
        /// Size of the offending band.
        found: Dimensions,
    },

    /// Backend-specific failure.
    #[error("{0}")]
    Backend(String),
}

/// Top-level error of an engine run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration rejected before processing started.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Tile buffer could not be allocated.
    #[error("cannot allocate a {rows}x{cols} tile buffer; use more segments to shrink tiles")]
    Allocation {
        /// Requested rows.
        rows: usize,
        /// Requested columns.
        cols: usize,
    },

    /// The raster source or sink failed.
    #[error("raster I/O failed: {0}")]
    Raster(#[from] RasterError),

    /// A worker pool run failed while processing a tile.
    #[error("band {band}, segment {segment} of {segment_count} ({tile}): {source}")]
    Tile {
        /// Zero-based band index.
        band: usize,
        /// One-based segment number.
        segment: usize,
        /// Segments per band.
        segment_count: usize,
        /// The tile being processed.
        tile: Tile,
        /// The pool failure.
        #[source]
        source: PoolError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_ends() {
        let tile = Tile::new(3, 4, 10, 20);
        assert_eq!(tile.x_end(), 13);
        assert_eq!(tile.y_end(), 24);
        assert_eq!(tile.pixel_count(), 200);
    }

    #[test]
    fn expand_interior_tile_adds_halo_on_all_sides() {
        let dims = Dimensions::new(100, 100);
        let tile = Tile::new(20, 30, 10, 10).expand(2, dims);
        assert_eq!(tile, Tile::new(18, 28, 14, 14));
    }

    #[test]
    fn expand_clamps_at_image_border() {
        let dims = Dimensions::new(50, 40);
        let tile = Tile::new(0, 30, 50, 10).expand(3, dims);
        assert_eq!(tile, Tile::new(0, 27, 50, 13));
        assert!(tile.fits_within(dims));
    }

    #[test]
    fn expand_by_zero_is_identity() {
        let dims = Dimensions::new(50, 40);
        let tile = Tile::new(5, 5, 10, 10);
        assert_eq!(tile.expand(0, dims), tile);
    }

    #[test]
    fn row_range_overlap() {
        let a = RowRange::new(0, 5);
        assert!(a.overlaps(RowRange::new(4, 8)));
        assert!(!a.overlaps(RowRange::new(5, 8)));
        assert!(RowRange::new(3, 3).is_empty());
    }

    #[test]
    fn tile_error_names_band_segment_and_range() {
        let err = EngineError::Tile {
            band: 2,
            segment: 3,
            segment_count: 4,
            tile: Tile::new(0, 50, 50, 50),
            source: PoolError::WorkerFailed {
                range: RowRange::new(10, 20),
                source: TransformError::Cancelled,
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("band 2"), "{msg}");
        assert!(msg.contains("segment 3 of 4"), "{msg}");
        assert!(msg.contains("rows 10..20"), "{msg}");
    }
}
