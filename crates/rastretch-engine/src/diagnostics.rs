//! Run diagnostics: per-tile timing and counts.
//!
//! Every engine run collects a [`RunDiagnostics`]. Timestamps come from
//! a caller-supplied [`Clock`] so tests can run against a fake clock and
//! hosts without `std::time::Instant` can plug in their own.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::types::{Dimensions, Tile};

/// Source of timestamps for diagnostics.
pub trait Clock {
    /// Opaque timestamp.
    type Instant;

    /// The current time.
    fn now(&self) -> Self::Instant;

    /// Time passed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// What happened to one tile of one band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileDiagnostics {
    /// Band index.
    pub band: usize,
    /// 1-based segment number within the band.
    pub segment: usize,
    /// The tile written to the sink.
    pub tile: Tile,
    /// The window read from the source (the tile plus any halo).
    pub window: Tile,
    /// Workers the pool actually used.
    pub workers: usize,
    /// Samples masked as no-data in the window.
    pub masked: usize,
    /// Time spent in the worker pool.
    #[serde(with = "duration_serde")]
    pub pool_duration: Duration,
    /// Time for the whole tile lifecycle, read to write.
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

/// Diagnostics collected from a single engine run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunDiagnostics {
    /// Name of the transform that ran.
    pub transform: String,
    /// Raster dimensions.
    pub dimensions: Dimensions,
    /// Bands processed.
    pub band_count: usize,
    /// Tiles per band.
    pub segment_count: usize,
    /// Configured worker count.
    pub workers: usize,
    /// Per-tile diagnostics, in processing order.
    pub tiles: Vec<TileDiagnostics>,
    /// Wall-clock time for the whole run, including band statistics.
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
}

impl RunDiagnostics {
    /// Sum of per-tile pool time.
    #[must_use]
    pub fn pool_duration(&self) -> Duration {
        self.tiles.iter().map(|t| t.pool_duration).sum()
    }

    /// Total masked samples across every tile window.
    #[must_use]
    pub fn masked_count(&self) -> usize {
        self.tiles.iter().map(|t| t.masked).sum()
    }

    /// Human-readable summary table.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Engine Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Raster: {}x{} ({} pixels), {} band(s)",
            self.dimensions.width,
            self.dimensions.height,
            self.dimensions.pixel_count(),
            self.band_count,
        ));
        lines.push(format!(
            "Transform: {}  |  Segments per band: {}  |  Workers: {}",
            self.transform, self.segment_count, self.workers,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<6} {:<9} {:<28} {:>8} {:>10} {:>10}",
            "Band", "Segment", "Tile", "Masked", "Pool", "Total"
        ));
        lines.push("-".repeat(80));
        for tile in &self.tiles {
            lines.push(format!(
                "{:<6} {:<9} {:<28} {:>8} {:>8.3}ms {:>8.3}ms",
                tile.band,
                format!("{}/{}", tile.segment, self.segment_count),
                tile.tile.to_string(),
                tile.masked,
                duration_ms(tile.pool_duration),
                duration_ms(tile.duration),
            ));
        }

        lines.push(String::new());
        let total_ms = duration_ms(self.total_duration);
        let pool_ms = duration_ms(self.pool_duration());
        let pct = if total_ms > 0.0 {
            pool_ms / total_ms * 100.0
        } else {
            0.0
        };
        lines.push(format!(
            "Pool time: {pool_ms:.3}ms ({pct:.1}% of total)  |  Masked samples: {}",
            self.masked_count(),
        ));

        lines.join("\n")
    }
}

/// Convert a duration to fractional milliseconds.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
