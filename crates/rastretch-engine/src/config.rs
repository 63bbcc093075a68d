//! Engine configuration.
//!
//! [`EngineConfig`] is plain data: serde-serializable, JSON-loadable, with
//! defaults for everything. [`EngineConfig::validate`] checks it as a
//! whole and is called by the engine before any tile buffer exists.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pool::WorkerPool;
use crate::transform::Transform;
use crate::types::ConfigError;

/// Where the statistics that drive normalization and parameters come
/// from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatisticsScope {
    /// One set of statistics per band, computed over the whole band.
    #[default]
    Band,
    /// Fresh statistics per tile, computed over the tile's own samples.
    Tile,
}

/// Target range for output scaling, in output sample units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleRange {
    /// Value the transform's output minimum maps to.
    pub min: f64,
    /// Value the transform's output maximum maps to.
    pub max: f64,
}

impl ScaleRange {
    /// The conventional 8-bit display range.
    pub const BYTE: Self = Self {
        min: 0.0,
        max: 255.0,
    };
}

/// Everything the engine needs besides the raster itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Transform to run, with its options.
    pub transform: Transform,

    /// Number of vertical segments: tile columns, cut along the x axis.
    pub vertical_segments: usize,

    /// Number of horizontal segments: tile rows, cut along the y axis.
    pub horizontal_segments: usize,

    /// Worker count per tile. `None` means
    /// [`WorkerPool::default_worker_count`].
    pub workers: Option<usize>,

    /// User no-data value. Masked on input alongside the band's own
    /// sentinel and written on output in preference to it.
    pub no_data: Option<f64>,

    /// Rescale the transform's output to this range.
    pub scale: Option<ScaleRange>,

    /// Band-wide or per-tile statistics.
    pub statistics_scope: StatisticsScope,

    /// Per-tile pool timeout, as fractional seconds in JSON.
    #[serde(with = "option_duration_serde")]
    pub timeout: Option<Duration>,
}

impl EngineConfig {
    /// Default number of tile columns.
    pub const DEFAULT_VERTICAL_SEGMENTS: usize = 1;
    /// Default number of tile rows.
    pub const DEFAULT_HORIZONTAL_SEGMENTS: usize = 1;

    /// Check every option.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vertical_segments == 0 {
            return Err(ConfigError::ZeroSegments { axis: "vertical" });
        }
        if self.horizontal_segments == 0 {
            return Err(ConfigError::ZeroSegments { axis: "horizontal" });
        }
        if self.workers == Some(0) {
            return Err(ConfigError::ZeroWorkers);
        }
        if let Some(value) = self.no_data
            && value.is_infinite()
        {
            return Err(ConfigError::InvalidValue {
                name: "no-data value",
                value,
                reason: "must be finite or NaN",
            });
        }
        if let Some(ScaleRange { min, max }) = self.scale
            && !(min.is_finite() && max.is_finite() && min < max)
        {
            return Err(ConfigError::ScaleRange { min, max });
        }
        self.transform.validate()
    }

    /// Worker count to use, resolving the default.
    #[must_use]
    pub fn resolved_workers(&self) -> usize {
        self.workers
            .unwrap_or_else(WorkerPool::default_worker_count)
    }

    /// Build the worker pool this configuration describes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroWorkers`] for an explicit worker count
    /// of zero.
    pub fn pool(&self) -> Result<WorkerPool, ConfigError> {
        Ok(WorkerPool::new(self.resolved_workers())?.with_timeout(self.timeout))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            transform: Transform::default(),
            vertical_segments: Self::DEFAULT_VERTICAL_SEGMENTS,
            horizontal_segments: Self::DEFAULT_HORIZONTAL_SEGMENTS,
            workers: None,
            no_data: None,
            scale: None,
            statistics_scope: StatisticsScope::default(),
            timeout: None,
        }
    }
}

/// Serde support for `Option<Duration>` as optional fractional seconds.
mod option_duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        duration: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        duration.map(|d| d.as_secs_f64()).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(deserializer)?
            .map(|secs| {
                Duration::try_from_secs_f64(secs).map_err(|_| {
                    serde::de::Error::custom(
                        "timeout seconds must be finite, non-negative, and representable as a Duration",
                    )
                })
            })
            .transpose()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid_single_tile_linear() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.vertical_segments, 1);
        assert_eq!(config.transform, Transform::default());
        assert_eq!(config.statistics_scope, StatisticsScope::Band);
    }

    #[test]
    fn zero_segments_are_rejected() {
        let config = EngineConfig {
            horizontal_segments: 0,
            ..EngineConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroSegments { axis: "horizontal" })
        );
    }

    #[test]
    fn zero_workers_are_rejected() {
        let config = EngineConfig {
            workers: Some(0),
            ..EngineConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroWorkers));
        assert_eq!(config.pool(), Err(ConfigError::ZeroWorkers));
    }

    #[test]
    fn inverted_scale_range_is_rejected() {
        let config = EngineConfig {
            scale: Some(ScaleRange {
                min: 10.0,
                max: 10.0,
            }),
            ..EngineConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ScaleRange {
                min: 10.0,
                max: 10.0
            })
        );
    }

    #[test]
    fn transform_options_are_validated() {
        let config = EngineConfig {
            transform: Transform::Mean { kernel_size: 2 },
            ..EngineConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::KernelSize(2)));
    }

    #[test]
    fn resolved_workers_defaults_to_pool_default() {
        assert_eq!(
            EngineConfig::default().resolved_workers(),
            WorkerPool::default_worker_count()
        );
        let config = EngineConfig {
            workers: Some(3),
            ..EngineConfig::default()
        };
        assert_eq!(config.resolved_workers(), 3);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let json = r#"{
            "transform": {"kind": "standard_deviation", "sigma": 2.5},
            "vertical_segments": 4,
            "no_data": -9999.0,
            "timeout": 1.5
        }"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.transform, Transform::StandardDeviation { sigma: 2.5 });
        assert_eq!(config.vertical_segments, 4);
        assert_eq!(config.horizontal_segments, 1);
        assert_eq!(config.no_data, Some(-9999.0));
        assert_eq!(config.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.statistics_scope, StatisticsScope::Band);
    }

    #[test]
    fn negative_timeout_is_a_deserialization_error() {
        let result: Result<EngineConfig, _> = serde_json::from_str(r#"{"timeout": -1.0}"#);
        assert!(result.is_err());
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = EngineConfig {
            transform: Transform::HistogramEqualization { bins: 64 },
            scale: Some(ScaleRange::BYTE),
            statistics_scope: StatisticsScope::Tile,
            timeout: Some(Duration::from_secs(2)),
            ..EngineConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
