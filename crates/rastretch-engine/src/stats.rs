//! Sample statistics that supply transform parameters.
//!
//! All functions skip NaN samples, which is how masked no-data samples
//! are represented inside a tile buffer. Moments are accumulated in `f64`
//! with Welford's update so that large bands do not lose precision.

use serde::{Deserialize, Serialize};

/// Minimum, maximum, mean, and population standard deviation of the
/// valid samples of a band or tile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandStatistics {
    /// Smallest valid sample.
    pub minimum: f64,
    /// Largest valid sample.
    pub maximum: f64,
    /// Mean of valid samples.
    pub mean: f64,
    /// Population standard deviation of valid samples.
    pub standard_deviation: f64,
    /// Number of valid samples.
    pub valid_count: u64,
}

impl BandStatistics {
    /// Placeholder for a band with no valid samples.
    pub const EMPTY: Self = Self {
        minimum: 0.0,
        maximum: 0.0,
        mean: 0.0,
        standard_deviation: 0.0,
        valid_count: 0,
    };

    /// Compute statistics over the non-NaN values.
    ///
    /// Returns `None` if there are no such values.
    #[must_use]
    pub fn from_samples(samples: &[f32]) -> Option<Self> {
        let mut accumulator = StatisticsAccumulator::default();
        accumulator.extend(samples);
        accumulator.finish()
    }

    /// `maximum - minimum`.
    #[must_use]
    pub fn span(&self) -> f64 {
        self.maximum - self.minimum
    }
}

/// Streaming accumulator for [`BandStatistics`].
///
/// Feed it strip by strip so a whole band never has to be resident.
#[derive(Debug, Clone, Copy)]
pub struct StatisticsAccumulator {
    count: u64,
    mean: f64,
    m2: f64,
    minimum: f64,
    maximum: f64,
}

impl Default for StatisticsAccumulator {
    fn default() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            minimum: f64::INFINITY,
            maximum: f64::NEG_INFINITY,
        }
    }
}

impl StatisticsAccumulator {
    /// Add one sample; NaN is ignored.
    #[allow(clippy::cast_precision_loss)]
    pub fn push(&mut self, sample: f32) {
        if sample.is_nan() {
            return;
        }
        let x = f64::from(sample);
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
        self.minimum = self.minimum.min(x);
        self.maximum = self.maximum.max(x);
    }

    /// Add every sample of a slice.
    pub fn extend(&mut self, samples: &[f32]) {
        for &sample in samples {
            self.push(sample);
        }
    }

    /// Final statistics, or `None` if nothing valid was pushed.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn finish(&self) -> Option<BandStatistics> {
        (self.count > 0).then(|| BandStatistics {
            minimum: self.minimum,
            maximum: self.maximum,
            mean: self.mean,
            standard_deviation: (self.m2 / self.count as f64).sqrt(),
            valid_count: self.count,
        })
    }
}

/// Percentile of sorted, NaN-free values, linearly interpolated between
/// the closest ranks. `percent` is in `[0, 100]`.
///
/// Returns `None` for an empty slice.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn percentile(sorted: &[f32], percent: f64) -> Option<f32> {
    let last = sorted.len().checked_sub(1)?;
    let rank = (percent.clamp(0.0, 100.0) / 100.0) * last as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - lower as f64;
    let (a, b) = (f64::from(sorted[lower]), f64::from(sorted[upper]));
    Some((a + (b - a) * fraction) as f32)
}

/// Clip bounds at percentiles `clip` and `100 - clip` of the valid samples.
///
/// Returns `None` if there are no valid samples.
#[must_use]
pub fn percentile_bounds(samples: &[f32], clip: f64) -> Option<(f32, f32)> {
    let mut valid: Vec<f32> = samples.iter().copied().filter(|v| !v.is_nan()).collect();
    valid.sort_by(f32::total_cmp);
    Some((percentile(&valid, clip)?, percentile(&valid, 100.0 - clip)?))
}

/// Histogram bin edges and the normalized cumulative distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    /// `bins + 1` ascending edges spanning `[min, max]`.
    pub edges: Vec<f32>,
    /// `bins` cumulative fractions; the last is `1.0`.
    pub cdf: Vec<f32>,
}

impl Histogram {
    /// Interpolate `value` against the CDF using each bin's lower edge
    /// as its abscissa. Values below the first edge map to the first CDF
    /// entry and values above the last lower edge map to the last.
    #[must_use]
    pub fn equalize(&self, value: f32) -> f32 {
        let Some(xs) = self.edges.get(..self.cdf.len()) else {
            return value;
        };
        let ys = &self.cdf;
        let (Some(&first_x), Some(&last_x)) = (xs.first(), xs.last()) else {
            return value;
        };
        if value <= first_x {
            return ys[0];
        }
        if value >= last_x {
            return ys[ys.len() - 1];
        }
        // First index with xs[i] > value; value lies in [xs[i-1], xs[i]).
        let i = xs.partition_point(|&x| x <= value);
        let (x0, x1) = (xs[i - 1], xs[i]);
        let (y0, y1) = (ys[i - 1], ys[i]);
        if x1 > x0 {
            y0 + (y1 - y0) * (value - x0) / (x1 - x0)
        } else {
            y0
        }
    }
}

/// Equal-width histogram of the valid samples over their own range, with
/// its normalized cumulative distribution.
///
/// Returns `None` if there are no valid samples or `bins` is zero.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn histogram_cdf(samples: &[f32], bins: usize) -> Option<Histogram> {
    if bins == 0 {
        return None;
    }
    let stats = BandStatistics::from_samples(samples)?;
    let (min, max) = (stats.minimum, stats.maximum);
    let width = if max > min { (max - min) / bins as f64 } else { 1.0 };

    let mut counts = vec![0u64; bins];
    for &v in samples.iter().filter(|v| !v.is_nan()) {
        let bin = ((f64::from(v) - min) / width) as usize;
        counts[bin.min(bins - 1)] += 1;
    }

    let edges = (0..=bins)
        .map(|i| (min + width * i as f64) as f32)
        .collect();
    let total = stats.valid_count as f64;
    let mut running = 0u64;
    let cdf = counts
        .iter()
        .map(|&c| {
            running += c;
            (running as f64 / total) as f32
        })
        .collect();
    Some(Histogram { edges, cdf })
}

/// Rescale valid samples from `[min, max]` to `[0, 1]` in place.
///
/// A flat range maps every valid sample to `0`.
#[allow(clippy::cast_possible_truncation)]
pub fn normalize(samples: &mut [f32], min: f64, max: f64) {
    let span = max - min;
    let scale = if span > 0.0 { 1.0 / span } else { 0.0 };
    for v in samples.iter_mut().filter(|v| !v.is_nan()) {
        *v = ((f64::from(*v) - min) * scale) as f32;
    }
}

/// Reverse of [`normalize`]: map `[0, 1]` back to `[min, max]`.
#[allow(clippy::cast_possible_truncation)]
pub fn denormalize(samples: &mut [f32], min: f64, max: f64) {
    let span = max - min;
    for v in samples.iter_mut().filter(|v| !v.is_nan()) {
        *v = f64::from(*v).mul_add(span, min) as f32;
    }
}

/// Linearly map valid samples from `from` to `to`, clamping to `to`.
///
/// A flat source range maps every valid sample to `to.0`.
#[allow(clippy::cast_possible_truncation)]
pub fn scale_to_range(samples: &mut [f32], from: (f64, f64), to: (f64, f64)) {
    let span = from.1 - from.0;
    let factor = if span > 0.0 { (to.1 - to.0) / span } else { 0.0 };
    for v in samples.iter_mut().filter(|v| !v.is_nan()) {
        let scaled = (f64::from(*v) - from.0).mul_add(factor, to.0);
        *v = scaled.clamp(to.0, to.1) as f32;
    }
}
