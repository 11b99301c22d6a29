//! Source-thread half of the playback stream.

use std::sync::Arc;
use std::time::Instant;

use crossbeam_utils::CachePadded;

use crate::convert::widen_interleaved_s16;
use crate::coupling::FrameWriter;
use crate::error::AudioError;
use crate::timing::{nanos_since, ClockLoop, TickReceiver};
use crate::tuning::Tuning;

use super::control::{target_latency_frames, OffsetFilter, RateController};
use super::latency_meter::{LatencyMeter, LatencyStats};
use super::resample::RatioResampler;
use super::{SharedState, SourceParts, StreamState};

/// Most recent pair of device timing points, for position interpolation.
#[derive(Debug, Clone, Copy)]
struct TimingPoint {
    time: i64,
    position: i64,
}

/// What the engine must do after a period of source data was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceUpdate {
    /// Keep going; the device is already running (or still prefilling).
    Continue,
    /// The coupling buffer reached the start threshold: start the device and
    /// move the stream to [`StreamState::Run`].
    StartDevice,
}

/// Source half of a playback stream, owned by the network receive thread.
///
/// Each submitted period is widened to `f32`, clocked, compared against the
/// interpolated device position, resampled at the controller's ratio, and
/// appended to the coupling buffer.
pub struct SourceStream {
    clock: CachePadded<ClockLoop>,
    writer: FrameWriter,
    ticks: TickReceiver,
    shared: Arc<SharedState>,
    resampler: RatioResampler,
    offset: OffsetFilter,
    rate: RateController,
    meter: LatencyMeter,
    dev_period_frames: usize,
    dev_last: Option<TimingPoint>,
    dev_next: Option<TimingPoint>,
    tuning: Tuning,
    channels: usize,
    sample_rate: u32,
    device_max_period: usize,
    epoch: Instant,
}

impl SourceStream {
    pub(crate) fn new(
        parts: SourceParts,
        resampler: RatioResampler,
        channels: usize,
        sample_rate: u32,
        device_max_period: usize,
        tuning: Tuning,
    ) -> Self {
        Self {
            clock: CachePadded::new(ClockLoop::new(sample_rate, tuning.loop_bandwidth_hz)),
            writer: parts.writer,
            ticks: parts.ticks,
            shared: parts.shared,
            epoch: parts.epoch,
            resampler,
            offset: OffsetFilter::default(),
            rate: RateController::new(&tuning),
            meter: LatencyMeter::new(),
            dev_period_frames: 0,
            dev_last: None,
            dev_next: None,
            tuning,
            channels,
            sample_rate,
            device_max_period,
        }
    }

    pub(crate) fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }

    /// Latency window summary for display.
    pub fn latency_stats(&self) -> LatencyStats {
        self.meter.stats()
    }

    /// Submit one period of interleaved signed 16-bit samples.
    ///
    /// `backend_latency_frames` is the device's own reported latency, folded
    /// into the displayed total.
    pub fn handle_data(
        &mut self,
        data: &[u8],
        backend_latency_frames: usize,
    ) -> Result<SourceUpdate, AudioError> {
        let now = nanos_since(self.epoch);
        self.handle_data_at(now, data, backend_latency_frames)
    }

    pub(crate) fn handle_data_at(
        &mut self,
        now: i64,
        data: &[u8],
        backend_latency_frames: usize,
    ) -> Result<SourceUpdate, AudioError> {
        let stride = self.channels * 2;
        let frames = data.len() / stride;
        if frames == 0 {
            return Ok(SourceUpdate::Continue);
        }

        let period_changed = frames != self.clock.period_frames;
        let init = !self.clock.started();
        if period_changed {
            self.resampler.set_chunk_frames(frames)?;
        }
        widen_interleaved_s16(data, self.resampler.input_planes());

        self.drain_ticks();

        // Measure the producer clock.
        let cur_time;
        let cur_position;
        if period_changed {
            if init {
                self.clock.next_time = now;
            }
            cur_time = self.clock.next_time;
            cur_position = self.clock.next_position;
            self.clock.retune(frames);
            self.clock.next_time += (self.clock.period_sec * 1.0e9).round() as i64;
        } else {
            let error = self.clock.error_sec(now);
            if error.abs() >= self.tuning.slew_threshold_sec {
                // Too far out to filter; pad the write pointer with silence
                // and restart the prediction from here.
                let slew = (error * self.sample_rate as f64).round() as i64;
                if slew > 0 {
                    self.writer.append_silence(slew as usize);
                }
                cur_time = now;
                cur_position = self.clock.next_position + slew;
                self.clock.resync(now);
                self.clock.next_position = cur_position;
            } else {
                cur_time = self.clock.next_time;
                cur_position = self.clock.next_position;
                self.clock.advance(error);
            }
        }

        // Measure how far the buffer level sits from the target latency.
        // The raw value swings hard at startup, so the filtered estimate is
        // what drives the controller, and the ratio for *this* period uses
        // the estimate from before this measurement.
        let offset_error = self.offset.error();
        let mut actual_offset = 0.0;
        if let (Some(last), Some(next)) = (self.dev_last, self.dev_next) {
            let dev_position = last.position as f64
                + (next.position - last.position) as f64
                    * ((cur_time - last.time) as f64 / (next.time - last.time) as f64);
            let target = target_latency_frames(
                &self.tuning,
                self.sample_rate,
                self.device_max_period,
                self.dev_period_frames,
            );
            actual_offset = cur_position as f64 - dev_position;
            let (b, c) = self.clock.coefficients();
            self.offset.update(-(actual_offset - target), b, c);
        }

        let ratio = self.rate.ratio(offset_error, self.clock.period_sec);

        // Drive the resampler until the whole period is consumed.
        let mut consumed = 0;
        while consumed < frames {
            let (used, produced) = match self.resampler.process(ratio) {
                Ok(result) => result,
                Err(err) => {
                    log::error!("{}; discarding the current period", err);
                    return Err(err);
                }
            };
            self.writer.append(produced);
            self.clock.next_position += (produced.len() / self.channels) as i64;
            consumed += used;
            if used == 0 {
                break;
            }
        }

        let update = if self.shared.load() == StreamState::Setup && self.start_gate_reached() {
            SourceUpdate::StartDevice
        } else {
            SourceUpdate::Continue
        };

        let latency_frames = actual_offset + backend_latency_frames as f64;
        self.meter
            .push((latency_frames * 1000.0 / self.sample_rate as f64) as f32);

        Ok(update)
    }

    /// True once enough frames are buffered to survive the device's opening
    /// demand. The device may request two full buffers immediately, and the
    /// earliest source packets are the worst paced, so the gate also holds
    /// back two full source periods.
    fn start_gate_reached(&self) -> bool {
        let start_frames = 2 * self.clock.period_frames + 2 * self.device_max_period;
        self.clock.next_position >= start_frames as i64
    }

    fn drain_ticks(&mut self) {
        while let Ok(tick) = self.ticks.pop() {
            self.dev_period_frames = tick.period_frames;
            self.dev_last = self.dev_next.take();
            self.dev_next = Some(TimingPoint {
                time: tick.next_time,
                position: tick.next_position,
            });
        }
    }

    #[cfg(test)]
    pub(crate) fn clock(&self) -> &ClockLoop {
        &self.clock
    }

    #[cfg(test)]
    pub(crate) fn offset_error(&self) -> f64 {
        self.offset.error()
    }

    #[cfg(test)]
    pub(crate) fn device_window(&self) -> (usize, Option<i64>, Option<i64>) {
        (
            self.dev_period_frames,
            self.dev_last.map(|point| point.time),
            self.dev_next.map(|point| point.time),
        )
    }
}
