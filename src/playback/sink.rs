//! Device-thread half of the playback stream.

use std::sync::Arc;
use std::time::Instant;

use crossbeam_utils::CachePadded;

use crate::backend::PlaybackPull;
use crate::coupling::FrameReader;
use crate::timing::{nanos_since, ClockLoop, DeviceTick, TickSender};
use crate::tuning::Tuning;

use super::{SharedState, StreamState};

/// Sink half of a playback stream, owned by the backend's callback thread.
///
/// Every pull measures the device clock, publishes a timing tick for the
/// source thread, and drains the coupling buffer. The pull path never
/// allocates and never blocks.
pub struct SinkStream {
    clock: CachePadded<ClockLoop>,
    reader: FrameReader,
    ticks: TickSender,
    shared: Arc<SharedState>,
    channels: usize,
    sample_rate: u32,
    slew_threshold_sec: f64,
    epoch: Instant,
}

impl SinkStream {
    pub(crate) fn new(
        channels: usize,
        sample_rate: u32,
        tuning: &Tuning,
        reader: FrameReader,
        ticks: TickSender,
        shared: Arc<SharedState>,
        epoch: Instant,
    ) -> Self {
        Self {
            clock: CachePadded::new(ClockLoop::new(sample_rate, tuning.loop_bandwidth_hz)),
            reader,
            ticks,
            shared,
            channels,
            sample_rate,
            slew_threshold_sec: tuning.slew_threshold_sec,
            epoch,
        }
    }

    /// Pull path with an explicit timestamp; [`PlaybackPull`] supplies the
    /// monotonic clock.
    pub fn pull_frames_at(&mut self, now: i64, dst: &mut [f32]) -> usize {
        let frames = dst.len() / self.channels;
        if frames == 0 || self.shared.load() == StreamState::Stop {
            return 0;
        }

        self.track_device_clock(now, frames);
        self.publish_tick();

        let got = self.reader.consume(&mut dst[..frames * self.channels]);

        if self.shared.load() == StreamState::Drain
            && self.reader.count() == 0
            && self.shared.transition(StreamState::Drain, StreamState::Stop)
        {
            log::debug!("playback drained; stream stopped");
        }

        got
    }

    fn track_device_clock(&mut self, now: i64, frames: usize) {
        if frames != self.clock.period_frames {
            let new_period_sec = self.clock.nominal_period_sec(frames);
            if !self.clock.started() {
                self.clock.next_time = now + (new_period_sec * 1.0e9).round() as i64;
            } else {
                // The device is double buffered: it asks for the new period
                // size while the buffer at the old size is still playing, so
                // the next wakeup lands one *old* period away.
                self.clock.next_time += (self.clock.period_sec * 1.0e9).round() as i64;
            }
            self.clock.retune(frames);
            self.clock.next_position += frames as i64;
            return;
        }

        let error = self.clock.error_sec(now);
        if error.abs() >= self.slew_threshold_sec {
            // Too far out to filter; jump the read pointer instead and
            // restart the prediction from here.
            let slew = (error * self.sample_rate as f64).round() as i64;
            if slew > 0 {
                self.reader.discard(slew as usize);
            }
            self.clock.resync(now);
            self.clock.next_position += slew + frames as i64;
        } else {
            self.clock.advance(error);
            self.clock.next_position += frames as i64;
        }
    }

    fn publish_tick(&mut self) {
        let tick = DeviceTick {
            period_frames: self.clock.period_frames,
            next_time: self.clock.next_time,
            next_position: self.clock.next_position,
        };
        if self.ticks.push(tick).is_err() {
            let err = crate::error::AudioError::TickQueueFull;
            log::error!("{}; the stream producer has stalled", err);
        }
    }

    #[cfg(test)]
    pub(crate) fn clock(&self) -> &ClockLoop {
        &self.clock
    }
}

impl PlaybackPull for SinkStream {
    fn pull_frames(&mut self, dst: &mut [f32]) -> usize {
        let now = nanos_since(self.epoch);
        self.pull_frames_at(now, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coupling::coupling_buffer;
    use crate::timing::{tick_queue, TickReceiver};

    const RATE: u32 = 48_000;

    fn sink_with_buffer(
        prefill_frames: usize,
    ) -> (SinkStream, crate::coupling::FrameWriter, TickReceiver) {
        let (mut writer, reader) = coupling_buffer(RATE as usize, 2);
        let (tick_tx, tick_rx) = tick_queue();
        let shared = Arc::new(SharedState::new(StreamState::Run));
        let sink = SinkStream::new(
            2,
            RATE,
            &Tuning::default(),
            reader,
            tick_tx,
            shared,
            Instant::now(),
        );
        writer.append_silence(prefill_frames);
        (sink, writer, tick_rx)
    }

    #[test]
    fn first_pull_initializes_the_clock() {
        let (mut sink, _writer, mut ticks) = sink_with_buffer(4096);
        let mut dst = [0.0; 2048];

        let now = 1_000_000;
        assert_eq!(sink.pull_frames_at(now, &mut dst), 1024);

        let period_ns = (1024.0 / RATE as f64 * 1e9).round() as i64;
        assert_eq!(sink.clock().next_time, now + period_ns);
        assert_eq!(sink.clock().next_position, 1024);

        let tick = ticks.pop().expect("tick");
        assert_eq!(tick.period_frames, 1024);
        assert_eq!(tick.next_position, 1024);
    }

    #[test]
    fn period_change_advances_by_the_old_period() {
        let (mut sink, _writer, _ticks) = sink_with_buffer(8192);
        let mut dst = vec![0.0; 2048];

        let now = 0;
        sink.pull_frames_at(now, &mut dst);
        let old_period_ns = (1024.0 / RATE as f64 * 1e9).round() as i64;
        let next_before = sink.clock().next_time;

        // Smaller request: the next wakeup is still one old period away.
        sink.pull_frames_at(now + old_period_ns, &mut dst[..512]);
        assert_eq!(sink.clock().next_time, next_before + old_period_ns);
        assert_eq!(sink.clock().period_frames, 256);
        assert_eq!(sink.clock().next_position, 1024 + 256);
    }

    #[test]
    fn large_clock_error_slews_the_read_pointer() {
        let (mut sink, _writer, _ticks) = sink_with_buffer(16384);
        let mut dst = vec![0.0; 2048];

        sink.pull_frames_at(0, &mut dst);
        let available = sink.reader.count();

        // A quarter second late: 12000 frames are dropped on the floor.
        let now = sink.clock().next_time + 250_000_000;
        sink.pull_frames_at(now, &mut dst);

        assert_eq!(sink.reader.count(), available - 12_000 - 1024);
        let period_ns = (1024.0 / RATE as f64 * 1e9).round() as i64;
        assert_eq!(sink.clock().next_time, now + period_ns);
        assert_eq!(sink.clock().next_position, 1024 + 12_000 + 1024);
    }

    #[test]
    fn early_wakeup_slew_does_not_touch_the_buffer() {
        let (mut sink, _writer, _ticks) = sink_with_buffer(16384);
        let mut dst = vec![0.0; 2048];

        sink.pull_frames_at(0, &mut dst);
        let available = sink.reader.count();

        let now = sink.clock().next_time - 250_000_000;
        sink.pull_frames_at(now, &mut dst);

        // Only the pulled period left the buffer; the slew is accounted for
        // in the position alone.
        assert_eq!(sink.reader.count(), available - 1024);
        assert_eq!(sink.clock().next_position, 1024 - 12_000 + 1024);
    }

    #[test]
    fn drained_stream_stops_once() {
        let (mut sink, _writer, _ticks) = sink_with_buffer(1024);
        let mut dst = vec![0.0; 2048];

        sink.pull_frames_at(0, &mut dst);
        sink.shared.store(StreamState::Drain);

        let period_ns = (1024.0 / RATE as f64 * 1e9).round() as i64;
        assert_eq!(sink.pull_frames_at(period_ns, &mut dst), 0);
        assert_eq!(sink.shared.load(), StreamState::Stop);

        // A straggling callback after stop is a no-op.
        assert_eq!(sink.pull_frames_at(2 * period_ns, &mut dst), 0);
        assert_eq!(sink.shared.load(), StreamState::Stop);
    }

    #[test]
    fn underrun_returns_only_what_was_buffered() {
        let (mut sink, _writer, _ticks) = sink_with_buffer(256);
        let mut dst = vec![0.0; 2048];
        assert_eq!(sink.pull_frames_at(0, &mut dst), 256);
    }

    #[test]
    fn tick_overflow_is_survivable() {
        let (mut sink, _writer, _ticks) = sink_with_buffer(RATE as usize);
        // Pull more times than the queue has slots without draining it.
        let mut dst = vec![0.0; 512];
        let period_ns = (256.0 / RATE as f64 * 1e9).round() as i64;
        let mut now = 0;
        for _ in 0..(crate::timing::TICK_QUEUE_SLOTS + 4) {
            sink.pull_frames_at(now, &mut dst);
            now += period_ns;
        }
        assert_eq!(sink.clock().period_frames, 256);
    }
}
