//! The transform contract and the closed set of built-in transforms.
//!
//! # Strategy pattern
//!
//! Every stretch and filter implements [`RowTransform`]: given exclusive
//! access to a block of buffer rows and a read-only [`TransformContext`],
//! mutate the block in place. The engine is otherwise transform-agnostic.
//!
//! [`Transform`] is the runtime selector. Each variant carries its own
//! options and delegates to an implementation in [`crate::stretch`] or
//! [`crate::filter`]. Adding a transform means adding a variant and an
//! implementation; no dispatch chain elsewhere needs to change.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::buffer::{BufferView, RowBlock};
use crate::stats::{BandStatistics, Histogram};
use crate::types::{ConfigError, TransformError};
use crate::{filter, stretch};

/// A pixel transform that can run on any disjoint block of rows.
///
/// Implementations must only write into `block` and must only read
/// `ctx`, never shared mutable state. They should call
/// [`TransformContext::checkpoint`] once per row so a timed-out pool can
/// stop them.
pub trait RowTransform: Sync {
    /// Neighbourhood radius in pixels. Point transforms return `0`.
    ///
    /// A non-zero halo makes the engine read tiles with that many extra
    /// pixels on each side and provide a read-only snapshot in
    /// [`TransformContext::source`].
    fn halo(&self) -> usize {
        0
    }

    /// Mutate `block` in place.
    ///
    /// # Errors
    ///
    /// Returns a [`TransformError`] if a sample or parameter is outside
    /// the transform's domain, or [`TransformError::Cancelled`] if the
    /// pool asked workers to stop.
    fn apply(&self, block: &mut RowBlock<'_>, ctx: &TransformContext<'_>)
    -> Result<(), TransformError>;
}

/// Cooperative stop flag shared by all workers of one pool run.
#[derive(Debug, Default)]
pub struct CancelToken(AtomicBool);

impl CancelToken {
    /// Ask every worker to stop at its next checkpoint.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Read-only inputs shared by every worker of a pool run.
#[derive(Debug, Clone, Copy)]
pub struct TransformContext<'a> {
    /// Tile- and band-local parameters.
    pub params: &'a TransformParameters,
    /// Snapshot of the whole tile taken before any worker started.
    /// Present when the transform has a non-zero halo.
    pub source: Option<BufferView<'a>>,
    /// Stop flag.
    pub cancel: &'a CancelToken,
}

impl<'a> TransformContext<'a> {
    /// Context with no snapshot.
    #[must_use]
    pub const fn new(params: &'a TransformParameters, cancel: &'a CancelToken) -> Self {
        Self {
            params,
            source: None,
            cancel,
        }
    }

    /// Return [`TransformError::Cancelled`] if the pool asked to stop.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError::Cancelled`] after cancellation.
    pub fn checkpoint(&self) -> Result<(), TransformError> {
        if self.cancel.is_cancelled() {
            Err(TransformError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// The neighbourhood snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError::MissingSource`] if the engine did not
    /// provide one.
    pub fn source(&self) -> Result<BufferView<'a>, TransformError> {
        self.source.ok_or(TransformError::MissingSource)
    }
}

/// Immutable per-tile, per-band parameters handed to every worker.
///
/// Values are expressed in the working space the transform sees:
/// `[0, 1]` when [`normalized`](Self::normalized) is set, raw sample
/// units otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformParameters {
    /// Minimum valid sample.
    pub minimum: f32,
    /// Maximum valid sample.
    pub maximum: f32,
    /// Mean of valid samples.
    pub mean: f32,
    /// Population standard deviation of valid samples.
    pub standard_deviation: f32,
    /// Lower clip bound (percentile `clip`).
    pub lower_bound: f32,
    /// Upper clip bound (percentile `100 - clip`).
    pub upper_bound: f32,
    /// Histogram edges and CDF, for histogram equalization.
    pub histogram: Option<Histogram>,
    /// Raw minimum of the statistics the tile was normalized against.
    pub raw_minimum: f32,
    /// Raw maximum of the statistics the tile was normalized against.
    pub raw_maximum: f32,
    /// Whether samples were rescaled to `[0, 1]`.
    pub normalized: bool,
}

impl TransformParameters {
    /// Parameters over raw (non-normalized) samples.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn raw(stats: &BandStatistics) -> Self {
        let (minimum, maximum) = (stats.minimum as f32, stats.maximum as f32);
        Self {
            minimum,
            maximum,
            mean: stats.mean as f32,
            standard_deviation: stats.standard_deviation as f32,
            lower_bound: minimum,
            upper_bound: maximum,
            histogram: None,
            raw_minimum: minimum,
            raw_maximum: maximum,
            normalized: false,
        }
    }

    /// Parameters over samples rescaled from `[stats.minimum,
    /// stats.maximum]` to `[0, 1]`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn normalized(stats: &BandStatistics) -> Self {
        let span = stats.span();
        let scale = if span > 0.0 { 1.0 / span } else { 0.0 };
        Self {
            minimum: 0.0,
            maximum: 1.0,
            mean: ((stats.mean - stats.minimum) * scale) as f32,
            standard_deviation: (stats.standard_deviation * scale) as f32,
            lower_bound: 0.0,
            upper_bound: 1.0,
            histogram: None,
            raw_minimum: stats.minimum as f32,
            raw_maximum: stats.maximum as f32,
            normalized: true,
        }
    }

    /// Map a raw-unit value (a user threshold, say) into working space.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_working(&self, raw: f64) -> f32 {
        if !self.normalized {
            return raw as f32;
        }
        let min = f64::from(self.raw_minimum);
        let span = f64::from(self.raw_maximum) - min;
        if span > 0.0 {
            ((raw - min) / span) as f32
        } else {
            0.0
        }
    }
}

/// Selects which transform to run, with its options.
///
/// Stretches (everything up to [`Logarithmic`](Self::Logarithmic)) remap
/// values pointwise; filters read a neighbourhood.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transform {
    /// Linear stretch between the clip percentiles, with optional
    /// brightness reduction.
    Linear {
        /// Percentage clipped from each tail of the histogram, in `[0, 50)`.
        clip: f64,
        /// Fraction of the output range subtracted after stretching.
        reduction: f64,
    },
    /// Linear stretch over `mean ± sigma · stddev`.
    StandardDeviation {
        /// Number of standard deviations on each side of the mean.
        sigma: f64,
    },
    /// Invert values so the maximum becomes the minimum.
    Inverse,
    /// Two-level output split at a raw threshold.
    Binary {
        /// Threshold in raw sample units.
        threshold: f64,
    },
    /// Clamp values above a raw cut value to the cut.
    HiCut {
        /// Cut value in raw sample units.
        cut_value: f64,
    },
    /// Clamp values below a raw cut value to the cut.
    LowCut {
        /// Cut value in raw sample units.
        cut_value: f64,
    },
    /// Power-law stretch `x^(1/gamma)`.
    Gamma {
        /// Gamma value; applied as `1 / gamma`.
        gamma: f64,
    },
    /// Histogram equalization against the tile's cumulative distribution.
    HistogramEqualization {
        /// Number of histogram bins.
        bins: usize,
    },
    /// Logarithmic compression to roughly `[0, 255]`.
    Logarithmic {
        /// Offset added before taking the logarithm.
        epsilon: f64,
    },
    /// Mean (box) filter.
    Mean {
        /// Kernel edge length; positive and odd.
        kernel_size: usize,
    },
    /// Median filter.
    Median {
        /// Kernel edge length; positive and odd.
        kernel_size: usize,
    },
    /// Conservative smoothing: clamp each sample to its neighbours' range.
    Conservative {
        /// Kernel edge length; positive and odd.
        kernel_size: usize,
    },
    /// Gaussian low-pass filter with `sigma = kernel_size / 6`.
    Gaussian {
        /// Kernel edge length; positive and odd.
        kernel_size: usize,
    },
    /// Sample minus its Gaussian low-pass.
    GaussianHiPass {
        /// Kernel edge length; positive and odd.
        kernel_size: usize,
    },
    /// 3×3 Laplacian edge filter.
    Laplacian,
    /// 3×3 high-pass filter.
    HiPass3,
    /// 5×5 high-pass filter.
    HiPass5,
}

impl Default for Transform {
    fn default() -> Self {
        Self::Linear {
            clip: 0.0,
            reduction: 0.0,
        }
    }
}

impl Transform {
    /// Default standard deviation multiplier.
    pub const DEFAULT_SIGMA: f64 = 2.0;
    /// Default gamma.
    pub const DEFAULT_GAMMA: f64 = 1.6;
    /// Default histogram bin count.
    pub const DEFAULT_BINS: usize = 128;
    /// Default logarithm offset.
    pub const DEFAULT_EPSILON: f64 = 1.0;
    /// Default binary threshold.
    pub const DEFAULT_THRESHOLD: f64 = 128.0;
    /// Default filter kernel size.
    pub const DEFAULT_KERNEL_SIZE: usize = 3;
    /// Largest accepted filter kernel size.
    pub const MAX_KERNEL_SIZE: usize = 255;

    /// Short identifier, used in logs and diagnostics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Linear { .. } => "linear",
            Self::StandardDeviation { .. } => "standard_deviation",
            Self::Inverse => "inverse",
            Self::Binary { .. } => "binary",
            Self::HiCut { .. } => "hi_cut",
            Self::LowCut { .. } => "low_cut",
            Self::Gamma { .. } => "gamma",
            Self::HistogramEqualization { .. } => "histogram_equalization",
            Self::Logarithmic { .. } => "logarithmic",
            Self::Mean { .. } => "mean",
            Self::Median { .. } => "median",
            Self::Conservative { .. } => "conservative",
            Self::Gaussian { .. } => "gaussian",
            Self::GaussianHiPass { .. } => "gaussian_hi_pass",
            Self::Laplacian => "laplacian",
            Self::HiPass3 => "hi_pass_3",
            Self::HiPass5 => "hi_pass_5",
        }
    }

    /// Whether samples must be rescaled to `[0, 1]` before the transform
    /// runs (and rescaled back afterwards).
    #[must_use]
    pub const fn requires_normalization(&self) -> bool {
        matches!(
            self,
            Self::Linear { .. }
                | Self::StandardDeviation { .. }
                | Self::Inverse
                | Self::Binary { .. }
                | Self::HiCut { .. }
                | Self::LowCut { .. }
                | Self::Gamma { .. }
                | Self::HistogramEqualization { .. }
        )
    }

    /// Percentage clipped from each histogram tail, if the transform
    /// uses percentile bounds.
    #[must_use]
    pub const fn clip(&self) -> Option<f64> {
        match *self {
            Self::Linear { clip, .. } => Some(clip),
            _ => None,
        }
    }

    /// Histogram bin count, if the transform needs a histogram.
    #[must_use]
    pub const fn histogram_bins(&self) -> Option<usize> {
        match *self {
            Self::HistogramEqualization { bins } => Some(bins),
            _ => None,
        }
    }

    /// Raw-unit range of the transform's output, given the statistics the
    /// tile was processed with. Used as the source range for output
    /// scaling.
    #[must_use]
    pub fn output_range(&self, stats: &BandStatistics) -> (f64, f64) {
        match self {
            Self::Logarithmic { .. } => (0.0, 255.0),
            _ => (stats.minimum, stats.maximum),
        }
    }

    /// Check the transform's options.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] describing the first invalid option.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            Self::Linear { clip, reduction } => {
                if !(0.0..50.0).contains(&clip) {
                    return Err(ConfigError::Clip(clip));
                }
                if !(0.0..=1.0).contains(&reduction) {
                    return Err(ConfigError::InvalidValue {
                        name: "reduction",
                        value: reduction,
                        reason: "must be a fraction in [0, 1]",
                    });
                }
            }
            Self::StandardDeviation { sigma } => {
                require_positive("sigma", sigma)?;
            }
            Self::Binary { threshold } => require_finite("threshold", threshold)?,
            Self::HiCut { cut_value } | Self::LowCut { cut_value } => {
                require_finite("cut value", cut_value)?;
            }
            Self::Gamma { gamma } => require_positive("gamma", gamma)?,
            Self::HistogramEqualization { bins } => {
                if bins < 2 {
                    return Err(ConfigError::Bins(bins));
                }
            }
            Self::Logarithmic { epsilon } => require_finite("epsilon", epsilon)?,
            Self::Mean { kernel_size }
            | Self::Median { kernel_size }
            | Self::Conservative { kernel_size }
            | Self::Gaussian { kernel_size }
            | Self::GaussianHiPass { kernel_size } => {
                if kernel_size == 0
                    || kernel_size % 2 == 0
                    || kernel_size > Self::MAX_KERNEL_SIZE
                {
                    return Err(ConfigError::KernelSize(kernel_size));
                }
            }
            Self::Inverse | Self::Laplacian | Self::HiPass3 | Self::HiPass5 => {}
        }
        Ok(())
    }
}

fn require_finite(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            name,
            value,
            reason: "must be finite",
        })
    }
}

fn require_positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            name,
            value,
            reason: "must be finite and positive",
        })
    }
}

impl RowTransform for Transform {
    fn halo(&self) -> usize {
        match *self {
            Self::Mean { kernel_size }
            | Self::Median { kernel_size }
            | Self::Conservative { kernel_size }
            | Self::Gaussian { kernel_size }
            | Self::GaussianHiPass { kernel_size } => kernel_size / 2,
            Self::Laplacian | Self::HiPass3 => 1,
            Self::HiPass5 => 2,
            _ => 0,
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn apply(
        &self,
        block: &mut RowBlock<'_>,
        ctx: &TransformContext<'_>,
    ) -> Result<(), TransformError> {
        match *self {
            Self::Linear { reduction, .. } => stretch::linear(block, ctx, reduction as f32),
            Self::StandardDeviation { sigma } => {
                stretch::standard_deviation(block, ctx, sigma as f32)
            }
            Self::Inverse => stretch::inverse(block, ctx),
            Self::Binary { threshold } => stretch::binary(block, ctx, threshold),
            Self::HiCut { cut_value } => stretch::hi_cut(block, ctx, cut_value),
            Self::LowCut { cut_value } => stretch::low_cut(block, ctx, cut_value),
            Self::Gamma { gamma } => stretch::gamma(block, ctx, gamma as f32),
            Self::HistogramEqualization { .. } => stretch::histogram_equalization(block, ctx),
            Self::Logarithmic { epsilon } => stretch::logarithmic(block, ctx, epsilon as f32),
            Self::Mean { kernel_size } => filter::mean(block, ctx, kernel_size),
            Self::Median { kernel_size } => filter::median(block, ctx, kernel_size),
            Self::Conservative { kernel_size } => filter::conservative(block, ctx, kernel_size),
            Self::Gaussian { kernel_size } => filter::gaussian(block, ctx, kernel_size),
            Self::GaussianHiPass { kernel_size } => {
                filter::gaussian_hi_pass(block, ctx, kernel_size)
            }
            Self::Laplacian => filter::convolve(block, ctx, &filter::LAPLACIAN_3X3, 3),
            Self::HiPass3 => filter::convolve(block, ctx, &filter::HIPASS_3X3, 3),
            Self::HiPass5 => filter::convolve(block, ctx, &filter::HIPASS_5X5, 5),
        }
    }
}
