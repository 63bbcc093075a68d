//! Neighbourhood (kernel) filters.
//!
//! Filters read neighbours from the read-only snapshot in
//! [`TransformContext::source`] and write only their own block, so the
//! result does not depend on how rows were split among workers. Window
//! coordinates are clamped at the buffer edge; the tile runner expands
//! each tile by the filter's halo so that clamping only ever happens at
//! the true image border.
//!
//! The kernels are hand-written rather than taken from `imageproc`, whose
//! filters cannot skip masked neighbours or write a single row block.
//!
//! No-data (NaN) centres stay NaN. NaN neighbours are skipped by the
//! order-statistic and averaging filters, and replaced by the centre
//! value in fixed-kernel convolutions.

use crate::buffer::{BufferView, RowBlock};
use crate::transform::TransformContext;
use crate::types::TransformError;

/// 3×3 Laplacian.
#[rustfmt::skip]
pub const LAPLACIAN_3X3: [f32; 9] = [
     0.0, -1.0,  0.0,
    -1.0,  4.0, -1.0,
     0.0, -1.0,  0.0,
];

/// 3×3 high-pass.
#[rustfmt::skip]
pub const HIPASS_3X3: [f32; 9] = [
    -1.0, -1.0, -1.0,
    -1.0,  8.0, -1.0,
    -1.0, -1.0, -1.0,
];

/// 5×5 high-pass.
#[rustfmt::skip]
pub const HIPASS_5X5: [f32; 25] = [
    -1.0, -1.0, -1.0, -1.0, -1.0,
    -1.0, -1.0, -1.0, -1.0, -1.0,
    -1.0, -1.0, 24.0, -1.0, -1.0,
    -1.0, -1.0, -1.0, -1.0, -1.0,
    -1.0, -1.0, -1.0, -1.0, -1.0,
];

/// Run `f(source, row, col, centre)` for every valid sample of the block.
fn for_each_valid(
    block: &mut RowBlock<'_>,
    ctx: &TransformContext<'_>,
    mut f: impl FnMut(&BufferView<'_>, usize, usize, f32) -> f32,
) -> Result<(), TransformError> {
    let source = ctx.source()?;
    for (row, samples) in block.rows_mut() {
        ctx.checkpoint()?;
        for (col, v) in samples.iter_mut().enumerate() {
            let Some(centre) = source.get(row, col) else {
                continue;
            };
            if centre.is_nan() {
                continue;
            }
            *v = f(&source, row, col, centre);
        }
    }
    Ok(())
}

/// Collect the valid samples of the `size × size` window around
/// `(row, col)` into `out`.
#[allow(clippy::cast_possible_wrap)]
fn gather(source: &BufferView<'_>, row: usize, col: usize, size: usize, out: &mut Vec<f32>) {
    out.clear();
    let radius = (size / 2) as isize;
    let (r, c) = (row as isize, col as isize);
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let v = source.get_clamped(r + dy, c + dx);
            if !v.is_nan() {
                out.push(v);
            }
        }
    }
}

/// Box mean over the valid samples of each window.
#[allow(clippy::cast_precision_loss)]
pub fn mean(
    block: &mut RowBlock<'_>,
    ctx: &TransformContext<'_>,
    kernel_size: usize,
) -> Result<(), TransformError> {
    let mut window = Vec::with_capacity(kernel_size * kernel_size);
    for_each_valid(block, ctx, |source, row, col, centre| {
        gather(source, row, col, kernel_size, &mut window);
        if window.is_empty() {
            centre
        } else {
            window.iter().sum::<f32>() / window.len() as f32
        }
    })
}

/// Median of the valid samples of each window; even counts average the
/// two middle values.
pub fn median(
    block: &mut RowBlock<'_>,
    ctx: &TransformContext<'_>,
    kernel_size: usize,
) -> Result<(), TransformError> {
    let mut window = Vec::with_capacity(kernel_size * kernel_size);
    for_each_valid(block, ctx, |source, row, col, centre| {
        gather(source, row, col, kernel_size, &mut window);
        window.sort_by(f32::total_cmp);
        let n = window.len();
        match n {
            0 => centre,
            _ if n % 2 == 1 => window[n / 2],
            _ => (window[n / 2 - 1] + window[n / 2]) / 2.0,
        }
    })
}

/// Conservative smoothing: clamp each sample to the range of its
/// neighbours (the window without the centre).
#[allow(clippy::cast_possible_wrap)]
pub fn conservative(
    block: &mut RowBlock<'_>,
    ctx: &TransformContext<'_>,
    kernel_size: usize,
) -> Result<(), TransformError> {
    let radius = (kernel_size / 2) as isize;
    for_each_valid(block, ctx, |source, row, col, centre| {
        let (r, c) = (row as isize, col as isize);
        let mut low = f32::INFINITY;
        let mut high = f32::NEG_INFINITY;
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if dy == 0 && dx == 0 {
                    continue;
                }
                let v = source.get_clamped(r + dy, c + dx);
                if !v.is_nan() {
                    low = low.min(v);
                    high = high.max(v);
                }
            }
        }
        if low > high { centre } else { centre.clamp(low, high) }
    })
}

/// Normalized Gaussian weights for a `size × size` kernel,
/// `sigma = size / 6`.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)]
fn gaussian_kernel(size: usize) -> Vec<f32> {
    let sigma = (size as f32 / 6.0).max(0.5);
    let radius = (size / 2) as isize;
    let denominator = 2.0 * sigma * sigma;
    let mut weights = Vec::with_capacity(size * size);
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let d2 = (dy * dy + dx * dx) as f32;
            weights.push((-d2 / denominator).exp());
        }
    }
    weights
}

/// Weighted average of the valid window samples under `weights`.
#[allow(clippy::cast_possible_wrap)]
fn weighted_mean(
    source: &BufferView<'_>,
    row: usize,
    col: usize,
    size: usize,
    weights: &[f32],
    centre: f32,
) -> f32 {
    let radius = (size / 2) as isize;
    let (r, c) = (row as isize, col as isize);
    let mut sum = 0.0;
    let mut total = 0.0;
    let mut w = weights.iter();
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let weight = w.next().copied().unwrap_or(0.0);
            let v = source.get_clamped(r + dy, c + dx);
            if !v.is_nan() {
                sum += weight * v;
                total += weight;
            }
        }
    }
    if total > 0.0 { sum / total } else { centre }
}

/// Gaussian low-pass.
pub fn gaussian(
    block: &mut RowBlock<'_>,
    ctx: &TransformContext<'_>,
    kernel_size: usize,
) -> Result<(), TransformError> {
    let weights = gaussian_kernel(kernel_size);
    for_each_valid(block, ctx, |source, row, col, centre| {
        weighted_mean(source, row, col, kernel_size, &weights, centre)
    })
}

/// Sample minus its Gaussian low-pass.
pub fn gaussian_hi_pass(
    block: &mut RowBlock<'_>,
    ctx: &TransformContext<'_>,
    kernel_size: usize,
) -> Result<(), TransformError> {
    let weights = gaussian_kernel(kernel_size);
    for_each_valid(block, ctx, |source, row, col, centre| {
        centre - weighted_mean(source, row, col, kernel_size, &weights, centre)
    })
}

/// Convolve with a fixed `size × size` kernel. NaN neighbours contribute
/// the centre value.
#[allow(clippy::cast_possible_wrap)]
pub fn convolve(
    block: &mut RowBlock<'_>,
    ctx: &TransformContext<'_>,
    kernel: &[f32],
    size: usize,
) -> Result<(), TransformError> {
    let radius = (size / 2) as isize;
    for_each_valid(block, ctx, |source, row, col, centre| {
        let (r, c) = (row as isize, col as isize);
        let mut k = kernel.iter();
        let mut acc = 0.0;
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                let weight = k.next().copied().unwrap_or(0.0);
                let v = source.get_clamped(r + dy, c + dx);
                acc += weight * if v.is_nan() { centre } else { v };
            }
        }
        acc
    })
}
