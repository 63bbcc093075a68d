//! Shared tile buffer and its disjoint per-worker row blocks.
//!
//! A [`SharedBuffer`] is one contiguous `rows × cols` arena of `f32`
//! samples. Workers never see the whole arena mutably: they receive
//! [`RowBlock`]s from [`SharedBuffer::partition`], each a `&mut` slice
//! over a distinct [`RowRange`]. The borrow checker guarantees that no two
//! blocks alias, so workers mutate the tile in place without copies,
//! locks, or `unsafe`.
//!
//! Neighbourhood transforms that need to look past their own rows read a
//! read-only [`BufferView`] snapshot instead (see
//! [`WorkerPool::run`](crate::pool::WorkerPool::run)).

use crate::types::{EngineError, RowRange};

/// A zero-initialized, mutable 2-D buffer of samples for one tile.
///
/// Created fresh per tile and released (consumed) before the next tile
/// is allocated, which bounds peak memory to one tile's worth of samples.
#[derive(Debug, Clone, PartialEq)]
pub struct SharedBuffer {
    data: Vec<f32>,
    rows: usize,
    cols: usize,
}

impl SharedBuffer {
    /// Allocate a zero-filled `rows × cols` buffer.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Allocation`] if the sample count overflows
    /// or the allocator cannot satisfy the request. Allocation failure is
    /// reported, never aborted on.
    pub fn create(rows: usize, cols: usize) -> Result<Self, EngineError> {
        let len = rows
            .checked_mul(cols)
            .ok_or(EngineError::Allocation { rows, cols })?;
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| EngineError::Allocation { rows, cols })?;
        data.resize(len, 0.0);
        Ok(Self { data, rows, cols })
    }

    /// Build a buffer from existing samples laid out row-major.
    ///
    /// Returns `None` if `data.len() != rows * cols`.
    #[must_use]
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f32>) -> Option<Self> {
        (rows.checked_mul(cols) == Some(data.len())).then_some(Self { data, rows, cols })
    }

    /// Number of rows.
    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    #[must_use]
    pub const fn cols(&self) -> usize {
        self.cols
    }

    /// All samples, row-major.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// All samples, row-major, mutably.
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// One row of samples.
    ///
    /// Returns `None` if `row` is out of range.
    #[must_use]
    pub fn row(&self, row: usize) -> Option<&[f32]> {
        (row < self.rows).then(|| &self.data[row * self.cols..(row + 1) * self.cols])
    }

    /// One row of samples, mutably.
    ///
    /// Returns `None` if `row` is out of range.
    pub fn row_mut(&mut self, row: usize) -> Option<&mut [f32]> {
        if row >= self.rows {
            return None;
        }
        let cols = self.cols;
        Some(&mut self.data[row * cols..(row + 1) * cols])
    }

    /// Read-only handle over the whole buffer.
    #[must_use]
    pub fn view(&self) -> BufferView<'_> {
        BufferView {
            data: &self.data,
            rows: self.rows,
            cols: self.cols,
        }
    }

    /// A single mutable block spanning every row.
    pub fn view_mut(&mut self) -> RowBlock<'_> {
        RowBlock {
            range: RowRange::new(0, self.rows),
            cols: self.cols,
            data: &mut self.data,
        }
    }

    /// Split the buffer into disjoint mutable row blocks, one per worker.
    ///
    /// Block ranges follow [`partition_rows`]: contiguous, non-overlapping,
    /// in ascending order, and together covering `[0, rows)`.
    pub fn partition(&mut self, workers: usize) -> Vec<RowBlock<'_>> {
        let cols = self.cols;
        let ranges = partition_rows(self.rows, workers);
        let mut blocks = Vec::with_capacity(ranges.len());
        let mut rest: &mut [f32] = &mut self.data;
        for range in ranges {
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(range.len() * cols);
            blocks.push(RowBlock {
                range,
                cols,
                data: head,
            });
            rest = tail;
        }
        blocks
    }

    /// Read-only view of a sub-rectangle, used to hand a tile's core
    /// (without halo) to a raster sink.
    ///
    /// Returns `None` if the rectangle does not fit in the buffer.
    #[must_use]
    pub fn region(
        &self,
        row_offset: usize,
        col_offset: usize,
        height: usize,
        width: usize,
    ) -> Option<BufferRegion<'_>> {
        let fits = row_offset + height <= self.rows && col_offset + width <= self.cols;
        fits.then_some(BufferRegion {
            buffer: self,
            row_offset,
            col_offset,
            height,
            width,
        })
    }

    /// Free the backing storage now.
    ///
    /// Equivalent to dropping the buffer; spelled out so the per-tile
    /// release point is visible at the call site.
    pub fn release(self) {
        drop(self);
    }
}

/// Split `[0, rows)` into contiguous ranges for `workers` workers.
///
/// Ranges are `ceil(rows / workers)` rows long, the last one possibly
/// shorter, so every range is non-empty and there are at most `workers`
/// of them. When there are fewer rows than workers (or a single worker)
/// the whole buffer is returned as one range and the pool runs the
/// transform as a single pass.
#[must_use]
pub fn partition_rows(rows: usize, workers: usize) -> Vec<RowRange> {
    if rows == 0 {
        return Vec::new();
    }
    if workers <= 1 || rows < workers {
        return vec![RowRange::new(0, rows)];
    }
    let step = rows.div_ceil(workers);
    (0..rows)
        .step_by(step)
        .map(|start| RowRange::new(start, (start + step).min(rows)))
        .collect()
}

/// Exclusive, mutable access to a contiguous range of buffer rows.
#[derive(Debug)]
pub struct RowBlock<'a> {
    range: RowRange,
    cols: usize,
    data: &'a mut [f32],
}

impl RowBlock<'_> {
    /// Buffer rows owned by this block (absolute indices).
    #[must_use]
    pub const fn range(&self) -> RowRange {
        self.range
    }

    /// Number of columns per row.
    #[must_use]
    pub const fn cols(&self) -> usize {
        self.cols
    }

    /// The block's samples, row-major.
    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut *self.data
    }

    /// Iterate rows as `(absolute_row, samples)`.
    pub fn rows_mut(&mut self) -> impl Iterator<Item = (usize, &mut [f32])> {
        let start = self.range.start;
        self.data
            .chunks_exact_mut(self.cols.max(1))
            .enumerate()
            .map(move |(i, row)| (start + i, row))
    }
}

/// Read-only handle over a whole buffer (or a snapshot of one).
#[derive(Debug, Clone, Copy)]
pub struct BufferView<'a> {
    data: &'a [f32],
    rows: usize,
    cols: usize,
}

impl<'a> BufferView<'a> {
    /// Wrap row-major samples.
    ///
    /// Returns `None` if `data.len() != rows * cols`.
    #[must_use]
    pub fn new(rows: usize, cols: usize, data: &'a [f32]) -> Option<Self> {
        (rows.checked_mul(cols) == Some(data.len())).then_some(Self { data, rows, cols })
    }

    /// Number of rows.
    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    #[must_use]
    pub const fn cols(&self) -> usize {
        self.cols
    }

    /// All samples, row-major.
    #[must_use]
    pub const fn as_slice(&self) -> &'a [f32] {
        self.data
    }

    /// Sample at `(row, col)`, or `None` outside the buffer.
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        (row < self.rows && col < self.cols).then(|| self.data[row * self.cols + col])
    }

    /// Sample at a signed position, with coordinates clamped to the
    /// buffer edge.
    ///
    /// Callers must not use this on an empty buffer.
    #[must_use]
    pub fn get_clamped(&self, row: isize, col: isize) -> f32 {
        let r = clamp_index(row, self.rows);
        let c = clamp_index(col, self.cols);
        self.data[r * self.cols + c]
    }
}

/// Clamp a signed index into `[0, len)`.
fn clamp_index(index: isize, len: usize) -> usize {
    usize::try_from(index).map_or(0, |i| i.min(len.saturating_sub(1)))
}

/// Read-only sub-rectangle of a [`SharedBuffer`].
#[derive(Debug, Clone, Copy)]
pub struct BufferRegion<'a> {
    buffer: &'a SharedBuffer,
    row_offset: usize,
    col_offset: usize,
    height: usize,
    width: usize,
}

impl<'a> BufferRegion<'a> {
    /// Rows in the region.
    #[must_use]
    pub const fn height(&self) -> usize {
        self.height
    }

    /// Columns in the region.
    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Iterate the region's rows, top to bottom.
    pub fn rows(&self) -> impl Iterator<Item = &'a [f32]> + use<'a> {
        let Self {
            buffer,
            row_offset,
            col_offset,
            height,
            width,
        } = *self;
        let cols = buffer.cols;
        (row_offset..row_offset + height).map(move |r| {
            let start = r * cols + col_offset;
            &buffer.data[start..start + width]
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn create_is_zero_initialized() {
        let buffer = SharedBuffer::create(3, 4).unwrap();
        assert_eq!(buffer.rows(), 3);
        assert_eq!(buffer.cols(), 4);
        assert!(buffer.as_slice().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn create_overflowing_shape_reports_allocation_error() {
        let result = SharedBuffer::create(usize::MAX, 2);
        assert!(matches!(
            result,
            Err(EngineError::Allocation {
                rows: usize::MAX,
                cols: 2
            })
        ));
    }

    #[test]
    fn create_oversized_buffer_reports_allocation_error() {
        let result = SharedBuffer::create(usize::MAX / 8, 1);
        assert!(matches!(result, Err(EngineError::Allocation { .. })));
    }

    #[test]
    fn partition_ranges_cover_rows_disjointly() {
        for rows in 1..=40 {
            for workers in 1..=12 {
                let ranges = partition_rows(rows, workers);
                assert!(ranges.len() <= workers.max(1));
                let mut next = 0;
                for range in &ranges {
                    assert_eq!(range.start, next, "gap or overlap at {range}");
                    assert!(!range.is_empty());
                    next = range.end;
                }
                assert_eq!(next, rows);
                for (i, a) in ranges.iter().enumerate() {
                    for b in &ranges[i + 1..] {
                        assert!(!a.overlaps(*b));
                    }
                }
            }
        }
    }

    #[test]
    fn fewer_rows_than_workers_is_single_pass() {
        assert_eq!(partition_rows(3, 8), vec![RowRange::new(0, 3)]);
    }

    #[test]
    fn partition_uses_ceil_sized_chunks() {
        assert_eq!(
            partition_rows(10, 4),
            vec![
                RowRange::new(0, 3),
                RowRange::new(3, 6),
                RowRange::new(6, 9),
                RowRange::new(9, 10),
            ]
        );
    }

    #[test]
    fn zero_rows_yield_no_ranges() {
        assert!(partition_rows(0, 4).is_empty());
    }

    #[test]
    fn blocks_write_through_to_the_buffer() {
        let mut buffer = SharedBuffer::create(5, 2).unwrap();
        for mut block in buffer.partition(2) {
            let range = block.range();
            for (row, samples) in block.rows_mut() {
                assert!(row >= range.start && row < range.end);
                for (col, v) in samples.iter_mut().enumerate() {
                    *v = (row * 10 + col) as f32;
                }
            }
        }
        assert_eq!(buffer.row(4).unwrap(), &[40.0, 41.0]);
        assert_eq!(buffer.row(0).unwrap(), &[0.0, 1.0]);
    }

    #[test]
    fn view_mut_spans_all_rows() {
        let mut buffer = SharedBuffer::create(4, 3).unwrap();
        let mut block = buffer.view_mut();
        assert_eq!(block.range(), RowRange::new(0, 4));
        block.samples_mut().fill(1.5);
        assert!(buffer.as_slice().iter().all(|&v| v == 1.5));
    }

    #[test]
    fn view_clamps_out_of_range_reads() {
        let buffer = SharedBuffer::from_vec(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let view = buffer.view();
        assert_eq!(view.get_clamped(-1, -1), 1.0);
        assert_eq!(view.get_clamped(5, 0), 3.0);
        assert_eq!(view.get_clamped(1, 9), 4.0);
        assert_eq!(view.get(2, 0), None);
    }

    #[test]
    fn region_yields_sub_rectangle() {
        let data: Vec<f32> = (0..16).map(|v| v as f32).collect();
        let buffer = SharedBuffer::from_vec(4, 4, data).unwrap();
        let region = buffer.region(1, 1, 2, 2).unwrap();
        let rows: Vec<&[f32]> = region.rows().collect();
        assert_eq!(rows, vec![&[5.0, 6.0][..], &[9.0, 10.0][..]]);
        assert!(buffer.region(3, 0, 2, 1).is_none());
    }

    #[test]
    fn from_vec_rejects_wrong_length() {
        assert!(SharedBuffer::from_vec(2, 3, vec![0.0; 5]).is_none());
    }
}
