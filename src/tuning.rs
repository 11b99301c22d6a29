//! Tunable constants for the rate-matching control loops.

use serde::{Deserialize, Serialize};

/// Control-loop tuning for a playback stream.
///
/// The defaults are the values the engine ships with; they were arrived at
/// empirically against real devices and jittery network pacing, so treat
/// changes as something to verify with a long listening session rather than
/// a unit test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tuning {
    /// Fixed latency margin absorbing source packet-pacing jitter, in
    /// milliseconds.
    pub jitter_margin_ms: f64,
    /// Multiplier applied to the device's maximum period when deriving the
    /// target latency; keeps the margin proportionally stricter at small
    /// period sizes.
    pub device_jitter_factor: f64,
    /// Proportional gain of the resample-ratio controller.
    pub proportional_gain: f64,
    /// Integral gain of the resample-ratio controller.
    pub integral_gain: f64,
    /// Bandwidth of both clock tracking loops, in hertz.
    pub loop_bandwidth_hz: f64,
    /// Clock error beyond which the stream slews instead of filtering, in
    /// seconds.
    pub slew_threshold_sec: f64,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            jitter_margin_ms: 13.0,
            device_jitter_factor: 1.1,
            proportional_gain: 0.5e-6,
            integral_gain: 1.0e-16,
            loop_bandwidth_hz: 0.05,
            slew_threshold_sec: 0.2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_shipped_loop_constants() {
        let tuning = Tuning::default();
        assert_eq!(tuning.jitter_margin_ms, 13.0);
        assert_eq!(tuning.proportional_gain, 0.5e-6);
        assert_eq!(tuning.integral_gain, 1.0e-16);
        assert_eq!(tuning.slew_threshold_sec, 0.2);
    }
}
