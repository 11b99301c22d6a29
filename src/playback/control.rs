//! Buffer-level error filtering and the resample-ratio controller.

use crate::tuning::Tuning;

/// Second-order smoother over the measured buffer-level error.
///
/// The raw offset between the producer position and the interpolated device
/// position moves rapidly, especially right after startup, and feeding it to
/// the rate controller directly would produce audible pitch wobble. The
/// smoother runs at the same bandwidth as the producer clock loop, so the two
/// estimates settle together.
#[derive(Debug, Default, Clone, Copy)]
pub struct OffsetFilter {
    offset_error: f64,
    integral: f64,
}

impl OffsetFilter {
    /// Current filtered offset error in frames.
    pub fn error(&self) -> f64 {
        self.offset_error
    }

    /// Fold a new raw offset-error observation into the filtered estimate,
    /// using the producer clock-loop coefficients `(b, c)`.
    pub fn update(&mut self, raw_error: f64, b: f64, c: f64) {
        let error = raw_error - self.offset_error;
        self.offset_error += b * error + self.integral;
        self.integral += c * error;
    }
}

/// PI controller mapping the filtered offset error to a resample ratio.
#[derive(Debug, Clone, Copy)]
pub struct RateController {
    proportional_gain: f64,
    integral_gain: f64,
    integral: f64,
}

impl RateController {
    pub fn new(tuning: &Tuning) -> Self {
        Self {
            proportional_gain: tuning.proportional_gain,
            integral_gain: tuning.integral_gain,
            integral: 0.0,
        }
    }

    /// Ratio to resample the next period at. `period_sec` weights the
    /// integral accumulation by the time the period represents.
    pub fn ratio(&mut self, offset_error: f64, period_sec: f64) -> f64 {
        self.integral += offset_error * period_sec;
        1.0 + (self.proportional_gain * offset_error + self.integral_gain * self.integral)
    }
}

/// Desired buffer level in frames between the producer write head and the
/// device read head.
///
/// A fixed jitter margin absorbs source pacing gaps; the device term scales
/// with the maximum period so the discipline tightens as periods shrink.
/// While the device runs below its maximum period size, the double-buffering
/// handoff parks extra data in the coupling buffer; the difference is added
/// to the target so that the controller does not speed up playback and then
/// underrun when the device restores its larger period.
pub fn target_latency_frames(
    tuning: &Tuning,
    sample_rate: u32,
    device_max_period: usize,
    device_period: usize,
) -> f64 {
    let mut target = tuning.jitter_margin_ms * sample_rate as f64 / 1000.0
        + device_max_period as f64 * tuning.device_jitter_factor;
    if device_period < device_max_period {
        target += (device_max_period - device_period) as f64;
    }
    target
}
