//! Pointwise contrast stretches.
//!
//! Every function here satisfies the [`RowTransform`] contract: it walks
//! the rows of its block, skips NaN (no-data) samples, and rewrites the
//! rest using only [`TransformParameters`].
//!
//! Unless noted, stretches run on samples normalized to `[0, 1]`; the
//! tile runner rescales the result back to the band's range afterwards.
//!
//! [`RowTransform`]: crate::transform::RowTransform
//! [`TransformParameters`]: crate::transform::TransformParameters

use crate::buffer::RowBlock;
use crate::transform::TransformContext;
use crate::types::TransformError;

/// Apply `f` to every valid sample, checking for cancellation per row.
fn map_valid(
    block: &mut RowBlock<'_>,
    ctx: &TransformContext<'_>,
    mut f: impl FnMut(f32) -> f32,
) -> Result<(), TransformError> {
    for (_, row) in block.rows_mut() {
        ctx.checkpoint()?;
        for v in row.iter_mut().filter(|v| !v.is_nan()) {
            *v = f(*v);
        }
    }
    Ok(())
}

/// Linear stretch between the clip bounds.
///
/// `(x - lower) / (upper - lower)` scaled to `[minimum, maximum]`, shifted
/// down by `reduction` of the output range, and clamped. See
/// <http://homepages.inf.ed.ac.uk/rbf/HIPR2/stretch.htm>.
pub fn linear(
    block: &mut RowBlock<'_>,
    ctx: &TransformContext<'_>,
    reduction: f32,
) -> Result<(), TransformError> {
    let p = ctx.params;
    let (min, max) = (p.minimum, p.maximum);
    let range = max - min;
    let span = (p.upper_bound - p.lower_bound).max(f32::EPSILON);
    let gain = range / span;
    let offset = reduction.mul_add(-range, min);
    map_valid(block, ctx, |x| {
        (x - p.lower_bound).mul_add(gain, offset).clamp(min, max)
    })
}

/// Linear stretch over `mean ± sigma · stddev`, clamped to `[0, 1]`.
pub fn standard_deviation(
    block: &mut RowBlock<'_>,
    ctx: &TransformContext<'_>,
    sigma: f32,
) -> Result<(), TransformError> {
    let p = ctx.params;
    let low = sigma.mul_add(-p.standard_deviation, p.mean);
    let high = sigma.mul_add(p.standard_deviation, p.mean);
    let span = (high - low).max(f32::EPSILON);
    map_valid(block, ctx, |x| ((x - low) / span).clamp(p.minimum, p.maximum))
}

/// `|x - maximum|`: the brightest sample becomes the darkest.
pub fn inverse(block: &mut RowBlock<'_>, ctx: &TransformContext<'_>) -> Result<(), TransformError> {
    let max = ctx.params.maximum;
    map_valid(block, ctx, |x| (x - max).abs())
}

/// Samples at or above the raw threshold become the maximum, the rest
/// the minimum.
pub fn binary(
    block: &mut RowBlock<'_>,
    ctx: &TransformContext<'_>,
    threshold: f64,
) -> Result<(), TransformError> {
    let p = ctx.params;
    let t = p.to_working(threshold);
    map_valid(block, ctx, |x| if x >= t { p.maximum } else { p.minimum })
}

/// Samples above the raw cut value are set to the cut.
pub fn hi_cut(
    block: &mut RowBlock<'_>,
    ctx: &TransformContext<'_>,
    cut_value: f64,
) -> Result<(), TransformError> {
    let t = ctx.params.to_working(cut_value);
    map_valid(block, ctx, |x| if x > t { t } else { x })
}

/// Samples below the raw cut value are set to the cut.
pub fn low_cut(
    block: &mut RowBlock<'_>,
    ctx: &TransformContext<'_>,
    cut_value: f64,
) -> Result<(), TransformError> {
    let t = ctx.params.to_working(cut_value);
    map_valid(block, ctx, |x| if x < t { t } else { x })
}

/// Power-law stretch `x^(1/gamma)`.
///
/// # Errors
///
/// Negative samples have no real root and yield
/// [`TransformError::Domain`].
pub fn gamma(
    block: &mut RowBlock<'_>,
    ctx: &TransformContext<'_>,
    gamma: f32,
) -> Result<(), TransformError> {
    let exponent = 1.0 / gamma;
    for (row, samples) in block.rows_mut() {
        ctx.checkpoint()?;
        for (col, v) in samples.iter_mut().enumerate() {
            if v.is_nan() {
                continue;
            }
            if *v < 0.0 {
                return Err(TransformError::Domain {
                    row,
                    col,
                    value: *v,
                    reason: "gamma stretch of a negative sample",
                });
            }
            *v = v.powf(exponent);
        }
    }
    Ok(())
}

/// Map each sample through the tile's cumulative distribution.
///
/// # Errors
///
/// Returns [`TransformError::Parameter`] if the tile runner did not
/// supply a histogram.
pub fn histogram_equalization(
    block: &mut RowBlock<'_>,
    ctx: &TransformContext<'_>,
) -> Result<(), TransformError> {
    let histogram = ctx
        .params
        .histogram
        .as_ref()
        .ok_or(TransformError::Parameter {
            name: "histogram",
            value: f32::NAN,
        })?;
    map_valid(block, ctx, |x| histogram.equalize(x))
}

/// Logarithmic compression of raw samples:
/// `255 / log10(1 + |maximum|) · log10(epsilon + |x|)`.
///
/// # Errors
///
/// Returns [`TransformError::Parameter`] when the band maximum is zero
/// (no logarithmic range) and [`TransformError::Domain`] when
/// `epsilon + |x|` is not positive.
pub fn logarithmic(
    block: &mut RowBlock<'_>,
    ctx: &TransformContext<'_>,
    epsilon: f32,
) -> Result<(), TransformError> {
    let maximum = ctx.params.maximum;
    let denominator = maximum.abs().ln_1p() / std::f32::consts::LN_10;
    if denominator <= 0.0 || !denominator.is_finite() {
        return Err(TransformError::Parameter {
            name: "maximum",
            value: maximum,
        });
    }
    let c = 255.0 / denominator;
    for (row, samples) in block.rows_mut() {
        ctx.checkpoint()?;
        for (col, v) in samples.iter_mut().enumerate() {
            if v.is_nan() {
                continue;
            }
            let argument = epsilon + v.abs();
            if argument <= 0.0 {
                return Err(TransformError::Domain {
                    row,
                    col,
                    value: *v,
                    reason: "logarithm of a non-positive value",
                });
            }
            *v = c * argument.log10();
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::buffer::SharedBuffer;
    use crate::stats::{BandStatistics, histogram_cdf};
    use crate::transform::{CancelToken, TransformParameters};

    fn normalized_params() -> TransformParameters {
        TransformParameters::normalized(&BandStatistics {
            minimum: 0.0,
            maximum: 100.0,
            mean: 50.0,
            standard_deviation: 10.0,
            valid_count: 5,
        })
    }

    fn run(
        samples: Vec<f32>,
        params: &TransformParameters,
        f: impl Fn(&mut RowBlock<'_>, &TransformContext<'_>) -> Result<(), TransformError>,
    ) -> Result<Vec<f32>, TransformError> {
        let cols = samples.len();
        let mut buffer = SharedBuffer::from_vec(1, cols, samples).unwrap();
        let cancel = CancelToken::default();
        let ctx = TransformContext::new(params, &cancel);
        f(&mut buffer.view_mut(), &ctx)?;
        Ok(buffer.as_slice().to_vec())
    }

    #[test]
    fn linear_without_clip_is_identity_on_normalized_data() {
        let params = normalized_params();
        let out = run(vec![0.0, 0.25, 1.0], &params, |b, c| linear(b, c, 0.0)).unwrap();
        assert_eq!(out, vec![0.0, 0.25, 1.0]);
    }

    #[test]
    fn linear_clips_to_bounds() {
        let mut params = normalized_params();
        params.lower_bound = 0.2;
        params.upper_bound = 0.6;
        let out = run(vec![0.1, 0.4, 0.9], &params, |b, c| linear(b, c, 0.0)).unwrap();
        assert_eq!(out[0], 0.0);
        assert!((out[1] - 0.5).abs() < 1e-6);
        assert_eq!(out[2], 1.0);
    }

    #[test]
    fn linear_reduction_darkens() {
        let params = normalized_params();
        let out = run(vec![0.5], &params, |b, c| linear(b, c, 0.1)).unwrap();
        assert!((out[0] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn linear_skips_nan() {
        let params = normalized_params();
        let out = run(vec![f32::NAN, 0.5], &params, |b, c| linear(b, c, 0.0)).unwrap();
        assert!(out[0].is_nan());
    }

    #[test]
    fn standard_deviation_maps_window_to_unit_range() {
        // mean 0.5, stddev 0.1 in normalized space; sigma 2 -> [0.3, 0.7].
        let params = normalized_params();
        let out = run(vec![0.3, 0.5, 0.7, 0.9], &params, |b, c| {
            standard_deviation(b, c, 2.0)
        })
        .unwrap();
        assert!(out[0].abs() < 1e-6);
        assert!((out[1] - 0.5).abs() < 1e-5);
        assert!((out[2] - 1.0).abs() < 1e-5);
        assert_eq!(out[3], 1.0);
    }

    #[test]
    fn inverse_flips() {
        let params = normalized_params();
        let out = run(vec![0.0, 0.25, 1.0], &params, inverse).unwrap();
        assert_eq!(out, vec![1.0, 0.75, 0.0]);
    }

    #[test]
    fn binary_uses_raw_threshold() {
        // Raw threshold 40 on a 0..100 band is 0.4 normalized.
        let params = normalized_params();
        let out = run(vec![0.1, 0.4, 0.8], &params, |b, c| binary(b, c, 40.0)).unwrap();
        assert_eq!(out, vec![0.0, 1.0, 1.0]);
    }

    #[test]
    fn cuts_clamp_one_side() {
        let params = normalized_params();
        let hi = run(vec![0.1, 0.9], &params, |b, c| hi_cut(b, c, 50.0)).unwrap();
        assert_eq!(hi, vec![0.1, 0.5]);
        let lo = run(vec![0.1, 0.9], &params, |b, c| low_cut(b, c, 50.0)).unwrap();
        assert_eq!(lo, vec![0.5, 0.9]);
    }

    #[test]
    fn gamma_brightens_midtones() {
        let params = normalized_params();
        let out = run(vec![0.25, 1.0], &params, |b, c| gamma(b, c, 2.0)).unwrap();
        assert!((out[0] - 0.5).abs() < 1e-6);
        assert_eq!(out[1], 1.0);
    }

    #[test]
    fn gamma_of_negative_is_domain_error() {
        let params = normalized_params();
        let err = run(vec![0.5, -0.1], &params, |b, c| gamma(b, c, 2.0)).unwrap_err();
        assert!(matches!(
            err,
            TransformError::Domain { row: 0, col: 1, .. }
        ));
    }

    #[test]
    fn histogram_equalization_flattens_distribution() {
        let samples: Vec<f32> = (0..100).map(|i| (i as f32 / 99.0).powi(3)).collect();
        let mut params = normalized_params();
        params.histogram = histogram_cdf(&samples, 16);
        let out = run(samples, &params, histogram_equalization).unwrap();
        assert!(out.windows(2).all(|w| w[0] <= w[1] + 1e-6));
        // The cubic pushes most samples into the first bins; equalization
        // spreads them out so the median lands well above its input.
        assert!(out[50] > 0.3, "median after equalization = {}", out[50]);
    }

    #[test]
    fn histogram_equalization_without_histogram_fails() {
        let params = normalized_params();
        assert!(matches!(
            run(vec![0.5], &params, histogram_equalization),
            Err(TransformError::Parameter { .. })
        ));
    }

    #[test]
    fn logarithmic_maps_maximum_near_255() {
        let params = TransformParameters::raw(&BandStatistics {
            minimum: 0.0,
            maximum: 999.0,
            mean: 10.0,
            standard_deviation: 1.0,
            valid_count: 5,
        });
        let out = run(vec![0.0, 999.0], &params, |b, c| logarithmic(b, c, 1.0)).unwrap();
        assert!(out[0].abs() < 1e-4);
        assert!((out[1] - 255.0).abs() < 1e-2);
    }

    #[test]
    fn logarithmic_of_zero_with_zero_epsilon_is_domain_error() {
        let params = TransformParameters::raw(&BandStatistics {
            minimum: 0.0,
            maximum: 10.0,
            mean: 5.0,
            standard_deviation: 1.0,
            valid_count: 5,
        });
        let err = run(vec![3.0, 0.0], &params, |b, c| logarithmic(b, c, 0.0)).unwrap_err();
        assert!(matches!(err, TransformError::Domain { col: 1, .. }));
    }

    #[test]
    fn cancelled_token_stops_at_first_row() {
        let params = normalized_params();
        let mut buffer = SharedBuffer::from_vec(2, 1, vec![0.5, 0.5]).unwrap();
        let cancel = CancelToken::default();
        cancel.cancel();
        let ctx = TransformContext::new(&params, &cancel);
        let result = inverse(&mut buffer.view_mut(), &ctx);
        assert_eq!(result, Err(TransformError::Cancelled));
        assert_eq!(buffer.as_slice(), &[0.5, 0.5]);
    }
}
