//! Rolling window of end-to-end latency samples for display.

use dasp_ring_buffer::Bounded;

const WINDOW_LEN: usize = 1200;

/// Summary of the current latency window, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencyStats {
    pub min: f32,
    pub max: f32,
    pub avg: f32,
    pub last: f32,
}

/// Sliding window over the measured playback latency.
///
/// One value is pushed per source period; consumers poll [`stats`]
/// (LatencyMeter::stats) to render a timing graph or status line.
#[derive(Debug)]
pub struct LatencyMeter {
    window: Bounded<Vec<f32>>,
    last: f32,
}

impl LatencyMeter {
    pub fn new() -> Self {
        Self {
            window: Bounded::from(vec![0.0; WINDOW_LEN]),
            last: 0.0,
        }
    }

    /// Record one latency measurement in milliseconds.
    pub fn push(&mut self, latency_ms: f32) {
        if self.window.is_full() {
            self.window.pop();
        }
        self.window.push(latency_ms);
        self.last = latency_ms;
    }

    /// Summarize the current window. Empty windows report all zeros.
    pub fn stats(&self) -> LatencyStats {
        if self.window.len() == 0 {
            return LatencyStats::default();
        }

        let mut min = f32::MAX;
        let mut max = f32::MIN;
        let mut sum = 0.0;
        for value in self.window.iter() {
            min = min.min(*value);
            max = max.max(*value);
            sum += *value;
        }
        LatencyStats {
            min,
            max,
            avg: sum / self.window.len() as f32,
            last: self.last,
        }
    }
}

impl Default for LatencyMeter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_meter_reports_zeros() {
        let meter = LatencyMeter::new();
        assert_eq!(meter.stats(), LatencyStats::default());
    }

    #[test]
    fn tracks_min_max_avg_and_last() {
        let mut meter = LatencyMeter::new();
        meter.push(10.0);
        meter.push(30.0);
        meter.push(20.0);

        let stats = meter.stats();
        assert_eq!(stats.min, 10.0);
        assert_eq!(stats.max, 30.0);
        assert_eq!(stats.avg, 20.0);
        assert_eq!(stats.last, 20.0);
    }

    #[test]
    fn window_evicts_the_oldest_sample() {
        let mut meter = LatencyMeter::new();
        meter.push(1000.0);
        for _ in 0..WINDOW_LEN {
            meter.push(5.0);
        }
        assert_eq!(meter.stats().max, 5.0);
    }
}
