//! Fixed-size worker pool that runs one transform over one tile buffer.
//!
//! The buffer is split into disjoint row blocks (see
//! [`SharedBuffer::partition`]) and each block is handed to its own scoped
//! thread. The pool returns only after every worker has been joined, so a
//! failure in one worker never leaves siblings running against a buffer
//! the caller is about to reuse. A buffer with fewer rows than workers is
//! processed as one block on the calling thread unless a timeout needs a
//! watcher.
//!
//! With a timeout configured, the pool waits on a completion channel. When
//! the deadline passes it raises the shared [`CancelToken`]; workers stop
//! at their next per-row checkpoint and the pool reports
//! [`PoolError::TimedOut`].

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::buffer::{BufferView, SharedBuffer};
use crate::transform::{CancelToken, RowTransform, TransformContext, TransformParameters};
use crate::types::{ConfigError, PoolError, RowRange, TransformError};

/// Runs a [`RowTransform`] across a [`SharedBuffer`] with a fixed number
/// of workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPool {
    workers: usize,
    timeout: Option<Duration>,
}

/// What one pool run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolReport {
    /// Row ranges handed to workers, in ascending order.
    pub ranges: Vec<RowRange>,
    /// Wall-clock time from first spawn to last join.
    pub elapsed: Duration,
}

impl PoolReport {
    /// Number of workers actually spawned.
    #[must_use]
    pub const fn worker_count(&self) -> usize {
        self.ranges.len()
    }
}

/// Sent by each worker when it finishes, including by unwinding.
struct DoneGuard(mpsc::Sender<()>);

impl Drop for DoneGuard {
    fn drop(&mut self) {
        // The receiver only goes away once the pool stops waiting.
        let _ = self.0.send(());
    }
}

impl WorkerPool {
    /// A pool with `workers` workers and no timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroWorkers`] if `workers == 0`.
    pub const fn new(workers: usize) -> Result<Self, ConfigError> {
        if workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        Ok(Self {
            workers,
            timeout: None,
        })
    }

    /// Abort each run that takes longer than `timeout`.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Twice the number of available CPUs, or 2 if that cannot be
    /// determined.
    #[must_use]
    pub fn default_worker_count() -> usize {
        thread::available_parallelism().map_or(1, std::num::NonZero::get) * 2
    }

    /// Configured worker count.
    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Configured timeout.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Run `transform` over every row of `buffer`, mutating it in place.
    ///
    /// Transforms with a non-zero [`halo`](RowTransform::halo) receive a
    /// read-only snapshot of the whole buffer taken before any worker
    /// starts, so neighbourhood reads never observe a sibling's output.
    ///
    /// # Errors
    ///
    /// Returns a [`PoolError`] if a worker's transform fails, a worker
    /// panics, or the run exceeds the timeout. When several workers fail,
    /// the first failure in row order is reported; a real transform error
    /// wins over cancellation.
    pub fn run<T: RowTransform + ?Sized>(
        &self,
        buffer: &mut SharedBuffer,
        transform: &T,
        params: &TransformParameters,
    ) -> Result<PoolReport, PoolError> {
        let started = Instant::now();
        let cancel = CancelToken::default();
        let (rows, cols) = (buffer.rows(), buffer.cols());
        let snapshot = (transform.halo() > 0).then(|| buffer.as_slice().to_vec());
        let ctx = TransformContext {
            params,
            source: snapshot
                .as_deref()
                .and_then(|data| BufferView::new(rows, cols, data)),
            cancel: &cancel,
        };

        let blocks = buffer.partition(self.workers);
        let ranges: Vec<RowRange> = blocks.iter().map(crate::buffer::RowBlock::range).collect();
        debug!(
            workers = ranges.len(),
            rows,
            cols,
            halo = transform.halo(),
            "starting pool run"
        );

        // A single block without a deadline runs on the calling thread.
        if blocks.len() == 1 && self.timeout.is_none() {
            let results: Vec<_> = blocks
                .into_iter()
                .map(|mut block| {
                    panic::catch_unwind(AssertUnwindSafe(|| transform.apply(&mut block, &ctx)))
                })
                .collect();
            let report = PoolReport {
                ranges,
                elapsed: started.elapsed(),
            };
            self.collect(results, &report, false)?;
            return Ok(report);
        }

        let (done_tx, done_rx) = mpsc::channel();
        let (results, timed_out) = thread::scope(|scope| {
            let handles: Vec<_> = blocks
                .into_iter()
                .map(|mut block| {
                    let guard = DoneGuard(done_tx.clone());
                    let ctx = &ctx;
                    scope.spawn(move || {
                        let _guard = guard;
                        transform.apply(&mut block, ctx)
                    })
                })
                .collect();
            drop(done_tx);

            let timed_out = self.wait(&done_rx, handles.len(), &cancel);
            let results: Vec<_> = handles.into_iter().map(thread::ScopedJoinHandle::join).collect();
            (results, timed_out)
        });

        let elapsed = started.elapsed();
        let report = PoolReport { ranges, elapsed };
        self.collect(results, &report, timed_out)?;
        debug!(?elapsed, "pool run finished");
        Ok(report)
    }

    /// Block until every worker has signalled completion. Returns whether
    /// the deadline passed first, in which case `cancel` has been raised.
    fn wait(&self, done: &mpsc::Receiver<()>, total: usize, cancel: &CancelToken) -> bool {
        let Some((timeout, deadline)) = self
            .timeout
            .and_then(|t| Some((t, Instant::now().checked_add(t)?)))
        else {
            while done.recv().is_ok() {}
            return false;
        };
        let mut finished = 0;
        while finished < total {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match done.recv_timeout(remaining) {
                Ok(()) => finished += 1,
                Err(mpsc::RecvTimeoutError::Disconnected) => return false,
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    warn!(
                        ?timeout,
                        finished, total, "pool deadline passed; cancelling workers"
                    );
                    cancel.cancel();
                    while done.recv().is_ok() {}
                    return true;
                }
            }
        }
        false
    }

    /// Turn joined worker results into the run's outcome.
    fn collect(
        &self,
        results: Vec<thread::Result<Result<(), TransformError>>>,
        report: &PoolReport,
        timed_out: bool,
    ) -> Result<(), PoolError> {
        let total = results.len();
        let mut completed = 0;
        let mut cancelled = false;
        let mut failure = None;
        for (range, result) in report.ranges.iter().copied().zip(results) {
            match result {
                Ok(Ok(())) => completed += 1,
                Ok(Err(TransformError::Cancelled)) => cancelled = true,
                Ok(Err(source)) => {
                    failure.get_or_insert(PoolError::WorkerFailed { range, source });
                }
                Err(payload) => {
                    failure.get_or_insert(PoolError::WorkerPanicked {
                        range,
                        message: panic_message(payload.as_ref()),
                    });
                }
            }
        }
        if let Some(error) = failure {
            warn!(%error, "pool run failed");
            return Err(error);
        }
        if cancelled {
            return Err(PoolError::TimedOut {
                timeout: self.timeout.unwrap_or_default(),
                completed,
                total,
            });
        }
        if timed_out {
            warn!("deadline passed but every worker finished; keeping results");
        }
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::buffer::RowBlock;
    use crate::stats::BandStatistics;
    use crate::transform::Transform;

    fn params() -> TransformParameters {
        TransformParameters::raw(&BandStatistics {
            minimum: 0.0,
            maximum: 100.0,
            mean: 50.0,
            standard_deviation: 10.0,
            valid_count: 100,
        })
    }

    fn ramp(rows: usize, cols: usize) -> SharedBuffer {
        #[allow(clippy::cast_precision_loss)]
        let data = (0..rows * cols).map(|i| ((i * 37) % 101) as f32).collect();
        SharedBuffer::from_vec(rows, cols, data).unwrap()
    }

    /// Adds the absolute row index to every sample.
    struct AddRow;

    impl RowTransform for AddRow {
        #[allow(clippy::cast_precision_loss)]
        fn apply(
            &self,
            block: &mut RowBlock<'_>,
            ctx: &TransformContext<'_>,
        ) -> Result<(), TransformError> {
            for (row, samples) in block.rows_mut() {
                ctx.checkpoint()?;
                for v in samples {
                    *v += row as f32;
                }
            }
            Ok(())
        }
    }

    /// Fails on a given row.
    struct FailAt(usize);

    impl RowTransform for FailAt {
        fn apply(
            &self,
            block: &mut RowBlock<'_>,
            _ctx: &TransformContext<'_>,
        ) -> Result<(), TransformError> {
            if block.range().start <= self.0 && self.0 < block.range().end {
                return Err(TransformError::Parameter {
                    name: "test",
                    value: 1.0,
                });
            }
            Ok(())
        }
    }

    /// Panics in the block holding row 0.
    struct PanicFirst;

    impl RowTransform for PanicFirst {
        #[allow(clippy::panic)]
        fn apply(
            &self,
            block: &mut RowBlock<'_>,
            _ctx: &TransformContext<'_>,
        ) -> Result<(), TransformError> {
            if block.range().start == 0 {
                panic!("boom");
            }
            Ok(())
        }
    }

    /// Sleeps per row, checking for cancellation.
    struct Slow(Duration);

    impl RowTransform for Slow {
        fn apply(
            &self,
            block: &mut RowBlock<'_>,
            ctx: &TransformContext<'_>,
        ) -> Result<(), TransformError> {
            for _ in block.rows_mut() {
                ctx.checkpoint()?;
                thread::sleep(self.0);
            }
            Ok(())
        }
    }

    #[test]
    fn zero_workers_is_rejected() {
        assert_eq!(WorkerPool::new(0), Err(ConfigError::ZeroWorkers));
    }

    #[test]
    fn default_worker_count_is_positive_and_even() {
        let n = WorkerPool::default_worker_count();
        assert!(n >= 2);
        assert_eq!(n % 2, 0);
    }

    #[test]
    fn every_row_is_visited_exactly_once() {
        let mut buffer = SharedBuffer::create(17, 3).unwrap();
        let report = WorkerPool::new(4)
            .unwrap()
            .run(&mut buffer, &AddRow, &params())
            .unwrap();
        assert_eq!(report.worker_count(), 4);
        for row in 0..17 {
            #[allow(clippy::cast_precision_loss)]
            let expected = row as f32;
            assert!(buffer.row(row).unwrap().iter().all(|&v| v == expected));
        }
    }

    #[test]
    fn fewer_rows_than_workers_runs_single_block() {
        let mut buffer = SharedBuffer::create(2, 5).unwrap();
        let report = WorkerPool::new(8)
            .unwrap()
            .run(&mut buffer, &AddRow, &params())
            .unwrap();
        assert_eq!(report.ranges, vec![RowRange::new(0, 2)]);
    }

    #[test]
    fn worker_count_does_not_change_point_transform_output() {
        let transform = Transform::Inverse;
        let mut single = ramp(23, 7);
        WorkerPool::new(1)
            .unwrap()
            .run(&mut single, &transform, &params())
            .unwrap();
        for workers in [2, 3, 5, 16] {
            let mut many = ramp(23, 7);
            WorkerPool::new(workers)
                .unwrap()
                .run(&mut many, &transform, &params())
                .unwrap();
            assert_eq!(many, single, "{workers} workers");
        }
    }

    #[test]
    fn worker_count_does_not_change_filter_output() {
        let transform = Transform::Median { kernel_size: 5 };
        let mut single = ramp(19, 11);
        WorkerPool::new(1)
            .unwrap()
            .run(&mut single, &transform, &params())
            .unwrap();
        for workers in [2, 4, 7] {
            let mut many = ramp(19, 11);
            WorkerPool::new(workers)
                .unwrap()
                .run(&mut many, &transform, &params())
                .unwrap();
            assert_eq!(many, single, "{workers} workers");
        }
    }

    #[test]
    fn worker_failure_names_its_range() {
        let mut buffer = SharedBuffer::create(12, 2).unwrap();
        let err = WorkerPool::new(3)
            .unwrap()
            .run(&mut buffer, &FailAt(5), &params())
            .unwrap_err();
        assert_eq!(
            err,
            PoolError::WorkerFailed {
                range: RowRange::new(4, 8),
                source: TransformError::Parameter {
                    name: "test",
                    value: 1.0
                },
            }
        );
    }

    #[test]
    fn worker_panic_is_reported_not_propagated() {
        let mut buffer = SharedBuffer::create(8, 2).unwrap();
        let err = WorkerPool::new(2)
            .unwrap()
            .run(&mut buffer, &PanicFirst, &params())
            .unwrap_err();
        assert_eq!(
            err,
            PoolError::WorkerPanicked {
                range: RowRange::new(0, 4),
                message: "boom".to_string(),
            }
        );
    }

    #[test]
    fn single_pass_panic_is_reported_too() {
        let mut buffer = SharedBuffer::create(3, 2).unwrap();
        let err = WorkerPool::new(1)
            .unwrap()
            .run(&mut buffer, &PanicFirst, &params())
            .unwrap_err();
        assert!(matches!(err, PoolError::WorkerPanicked { range, .. } if range == RowRange::new(0, 3)));
    }

    #[test]
    fn slow_workers_time_out() {
        let mut buffer = SharedBuffer::create(200, 1).unwrap();
        let pool = WorkerPool::new(2)
            .unwrap()
            .with_timeout(Some(Duration::from_millis(20)));
        let err = pool
            .run(&mut buffer, &Slow(Duration::from_millis(5)), &params())
            .unwrap_err();
        assert!(matches!(
            err,
            PoolError::TimedOut {
                total: 2,
                completed: 0,
                ..
            }
        ));
    }

    #[test]
    fn fast_run_within_timeout_succeeds() {
        let mut buffer = SharedBuffer::create(6, 6).unwrap();
        let pool = WorkerPool::new(3)
            .unwrap()
            .with_timeout(Some(Duration::from_secs(30)));
        assert!(pool.run(&mut buffer, &AddRow, &params()).is_ok());
    }

    #[test]
    fn unrepresentable_deadline_waits_without_one() {
        let mut buffer = SharedBuffer::create(8, 4).unwrap();
        let pool = WorkerPool::new(4)
            .unwrap()
            .with_timeout(Some(Duration::from_secs_f64(1e19)));
        let report = pool.run(&mut buffer, &AddRow, &params()).unwrap();
        assert_eq!(report.worker_count(), 4);
        assert_eq!(buffer.row(7).unwrap()[0], 7.0);
    }
}
