//! No-data masking for tile buffers.
//!
//! Samples equal to a configured sentinel (or already NaN) are recorded
//! in a [`NoDataMask`] and replaced by NaN, which every statistic and
//! transform skips. After the transform the mask is replayed to write the
//! output sentinel back at exactly the recorded positions, regardless of
//! what the transform left there.

/// Positions of no-data samples in one tile buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoDataMask {
    flags: Vec<bool>,
    masked: usize,
}

impl NoDataMask {
    /// Mark every sample that is NaN or equal to one of `sentinels`, and
    /// overwrite the marked samples with NaN.
    #[allow(clippy::float_cmp)]
    pub fn apply(samples: &mut [f32], sentinels: &[f32]) -> Self {
        let mut masked = 0;
        let flags = samples
            .iter_mut()
            .map(|v| {
                let is_no_data = v.is_nan() || sentinels.iter().any(|s| *v == *s);
                if is_no_data {
                    *v = f32::NAN;
                    masked += 1;
                }
                is_no_data
            })
            .collect();
        Self { flags, masked }
    }

    /// Number of masked samples.
    #[must_use]
    pub const fn masked_count(&self) -> usize {
        self.masked
    }

    /// Whether the sample at `index` is masked.
    #[must_use]
    pub fn is_masked(&self, index: usize) -> bool {
        self.flags.get(index).copied().unwrap_or(false)
    }

    /// Write `sentinel` at every masked position.
    pub fn restore(&self, samples: &mut [f32], sentinel: f32) {
        if self.masked == 0 {
            return;
        }
        for (v, _) in samples
            .iter_mut()
            .zip(&self.flags)
            .filter(|(_, masked)| **masked)
        {
            *v = sentinel;
        }
    }
}
