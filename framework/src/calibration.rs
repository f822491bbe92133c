//! Online gyroscope bias calibration
//!
//! The calibrator never asks the wearer to hold still. Every raw gyro
//! sample is folded into a per-axis batch; when a batch is full the mean
//! residual is halved and added to that axis' offset. Batches with too many
//! out-of-range samples are treated as head motion and thrown away, so a
//! burst of real movement cannot drag a learned bias with it.
//!
//! Raw units are the driver's fixed-point micro-degrees per second. All the
//! thresholds below are tied to that scale and to the noise floor of the
//! LSM6DS3; a different part needs them re-derived.

use log::debug;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Calibration thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct GyroCalConfig {
    /// Samples per batch before an offset adjustment
    pub batch_size: u32,
    /// Residuals beyond this are clamped and counted as escapes (raw units)
    pub escape_threshold: i32,
    /// Max escapes per batch for the batch to still count
    pub escape_tolerance: u32,
    /// Batches applied unconditionally after power-on
    pub forced_batches: u32,
    /// Corrections below this on every axis mean "converged" (raw units)
    pub stable_threshold: i32,
    /// Largest single correction once stable (raw units)
    pub stable_correction_cap: i32,
}

impl Default for GyroCalConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            escape_threshold: 4_000_000, // 4 deg/s
            escape_tolerance: 30,        // 3% of a batch
            forced_batches: 10,
            stable_threshold: 100_000, // 0.1 deg/s
            stable_correction_cap: 25_000,
        }
    }
}

/// Per-axis bookkeeping
#[derive(Debug, Clone, Copy, Default)]
struct AxisState {
    offset: i32,
    correction_sum: i32,
    correction_last: i32,
    count_apply: u32,
    count_escape: u32,
    count_adjust: u32,
}

/// Continuous per-axis gyro bias estimator
#[derive(Debug, Clone)]
pub struct GyroCalibrator {
    config: GyroCalConfig,
    axes: [AxisState; 3],
    stable: bool,
}

impl Default for GyroCalibrator {
    fn default() -> Self {
        Self::new(GyroCalConfig::default())
    }
}

impl GyroCalibrator {
    /// Thresholds are forced into range: a batch of at least one sample,
    /// positive escape and stable bands, a non-negative correction cap
    pub fn new(config: GyroCalConfig) -> Self {
        Self {
            config: GyroCalConfig {
                batch_size: config.batch_size.clamp(1, i32::MAX as u32),
                escape_threshold: config.escape_threshold.max(1),
                stable_threshold: config.stable_threshold.max(1),
                stable_correction_cap: config.stable_correction_cap.max(0),
                ..config
            },
            axes: [AxisState::default(); 3],
            stable: false,
        }
    }

    pub fn config(&self) -> &GyroCalConfig {
        &self.config
    }

    /// Feed one raw gyro sample into the running batches
    pub fn apply(&mut self, sample: [i32; 3]) {
        for (axis, raw) in sample.into_iter().enumerate() {
            self.apply_axis(axis, raw);
        }

        // Latches: an axis that converges exactly to 0 must not clear it
        if !self.stable {
            let threshold = self.config.stable_threshold;
            self.stable = self
                .axes
                .iter()
                .all(|a| a.correction_last != 0 && a.correction_last.abs() < threshold);
        }
    }

    fn apply_axis(&mut self, axis: usize, raw: i32) {
        let threshold = self.config.escape_threshold;
        let batch = self.config.batch_size as i32;
        let state = &mut self.axes[axis];

        let mut value = raw.saturating_sub(state.offset);
        if value > threshold || value < -threshold {
            value = value.clamp(-threshold, threshold);
            state.count_escape += 1;
        }

        // Divide before summing so the i32 accumulator cannot overflow
        state.correction_sum += value / batch;

        state.count_apply += 1;
        if state.count_apply > self.config.batch_size {
            self.adjust_axis_offset(axis);
        }
    }

    fn adjust_axis_offset(&mut self, axis: usize) {
        let config = self.config;
        let stable = self.stable;
        let state = &mut self.axes[axis];

        if state.count_escape < config.escape_tolerance
            || state.count_adjust < config.forced_batches
        {
            // Half step damps oscillation around the true bias
            let mut correction = state.correction_sum / 2;
            if stable {
                let cap = config.stable_correction_cap;
                correction = correction.clamp(-cap, cap);
            }
            state.correction_last = correction;
            state.offset = state.offset.saturating_add(correction);
            if state.count_adjust < config.forced_batches {
                state.count_adjust += 1;
            }
        } else {
            debug!(
                "Gyro axis {}: batch discarded, {} escapes",
                axis, state.count_escape
            );
        }

        state.correction_sum = 0;
        state.count_apply = 0;
        state.count_escape = 0;
    }

    /// Bias-corrected copy of a sample, no bookkeeping
    pub fn get(&self, sample: [i32; 3]) -> [i32; 3] {
        [
            sample[0].saturating_sub(self.axes[0].offset),
            sample[1].saturating_sub(self.axes[1].offset),
            sample[2].saturating_sub(self.axes[2].offset),
        ]
    }

    /// Current bias estimate
    pub fn offsets(&self) -> [i32; 3] {
        [self.axes[0].offset, self.axes[1].offset, self.axes[2].offset]
    }

    /// Seed the bias estimate, e.g. from flash
    ///
    /// A non-zero seed counts as already converged at power-on, so the
    /// forced startup batches are skipped.
    pub fn set_offsets(&mut self, offsets: [i32; 3]) {
        let restored = offsets != [0, 0, 0];
        for (state, offset) in self.axes.iter_mut().zip(offsets) {
            state.offset = offset;
            if restored {
                state.count_adjust = self.config.forced_batches;
            }
        }
    }

    /// Last correction applied on each axis (progress feedback)
    pub fn last_corrections(&self) -> [i32; 3] {
        [
            self.axes[0].correction_last,
            self.axes[1].correction_last,
            self.axes[2].correction_last,
        ]
    }

    /// Fraction of axes whose last correction is within the stable band
    pub fn progress(&self) -> f32 {
        let threshold = self.config.stable_threshold;
        let converged = self
            .axes
            .iter()
            .filter(|a| a.correction_last != 0 && a.correction_last.abs() < threshold)
            .count();
        converged as f32 / 3.0
    }

    pub fn is_stable(&self) -> bool {
        self.stable
    }

    pub fn set_stable(&mut self, stable: bool) {
        self.stable = stable;
    }
}
