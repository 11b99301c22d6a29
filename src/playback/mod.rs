//! Playback stream: rate matching between the source and the device clock.
//!
//! One stream couples two pre-existing threads of control. The source thread
//! submits periods of 16-bit PCM; the device thread pulls `f32` frames
//! through the backend callback. Each side owns its half of the stream
//! ([`SourceStream`] and [`SinkStream`]); the halves communicate only over
//! the coupling buffer, the tick queue, and the shared lifecycle state.

pub mod control;
pub mod latency_meter;
pub mod resample;
pub mod sink;
pub mod source;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::coupling::coupling_buffer;
use crate::error::AudioError;
use crate::timing::tick_queue;
use crate::tuning::Tuning;

pub use sink::SinkStream;
pub use source::SourceStream;

/// Lifecycle state of the playback stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamState {
    Stop = 0,
    Setup = 1,
    Run = 2,
    Drain = 3,
}

impl StreamState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Setup,
            2 => Self::Run,
            3 => Self::Drain,
            _ => Self::Stop,
        }
    }

    /// True while the stream accepts source data.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Setup | Self::Run)
    }
}

/// Lifecycle state cell shared between the two stream halves.
///
/// The source thread drives Stop→Setup→Run, the sink thread drives
/// Drain→Stop; no transition is contended, and the drain transition is a
/// compare-exchange so a late sink callback cannot resurrect a stopped
/// stream.
#[derive(Debug)]
pub struct SharedState {
    state: AtomicU8,
}

impl SharedState {
    pub fn new(state: StreamState) -> Self {
        Self {
            state: AtomicU8::new(state as u8),
        }
    }

    pub fn load(&self) -> StreamState {
        StreamState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn store(&self, state: StreamState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn transition(&self, from: StreamState, to: StreamState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Everything the engine needs to finish wiring a stream once the backend
/// has reported its maximum period size.
pub(crate) struct SourceParts {
    pub writer: crate::coupling::FrameWriter,
    pub ticks: crate::timing::TickReceiver,
    pub shared: Arc<SharedState>,
    pub epoch: Instant,
}

/// Build the two halves of a playback stream.
///
/// The sink half is complete and ready to hand to the backend; the source
/// half is assembled by the engine from [`SourceParts`] after setup, when
/// the device's maximum period size is known.
pub(crate) fn open_stream(
    channels: usize,
    sample_rate: u32,
    tuning: &Tuning,
) -> Result<(SinkStream, SourceParts), AudioError> {
    if channels == 0 || sample_rate == 0 {
        return Err(AudioError::BackendSetup(
            "stream format must have nonzero channels and sample rate".into(),
        ));
    }

    // At least one second of audio before the producer has to spill.
    let (writer, reader) = coupling_buffer(sample_rate as usize, channels);
    let (tick_tx, tick_rx) = tick_queue();
    let shared = Arc::new(SharedState::new(StreamState::Setup));
    let epoch = Instant::now();

    let sink = SinkStream::new(
        channels,
        sample_rate,
        tuning,
        reader,
        tick_tx,
        Arc::clone(&shared),
        epoch,
    );
    let parts = SourceParts {
        writer,
        ticks: tick_rx,
        shared,
        epoch,
    };
    Ok((sink, parts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::ClockLoop;
    use crossbeam_utils::CachePadded;
    use std::mem::{align_of, size_of};

    #[test]
    fn stream_state_round_trips_through_the_cell() {
        let shared = SharedState::new(StreamState::Stop);
        assert_eq!(shared.load(), StreamState::Stop);

        shared.store(StreamState::Setup);
        assert!(shared.load().is_active());

        shared.store(StreamState::Run);
        assert!(shared.load().is_active());

        shared.store(StreamState::Drain);
        assert!(!shared.load().is_active());
    }

    #[test]
    fn drain_transition_fires_exactly_once() {
        let shared = SharedState::new(StreamState::Drain);
        assert!(shared.transition(StreamState::Drain, StreamState::Stop));
        assert!(!shared.transition(StreamState::Drain, StreamState::Stop));
        assert_eq!(shared.load(), StreamState::Stop);
    }

    /// Two-sided run with exact clocks: after the prefill gate opens, the
    /// device must never underrun and the stream must drain to a stop.
    #[test]
    fn matched_clocks_play_without_underrun() {
        let tuning = Tuning::default();
        let (mut sink, parts) = open_stream(2, 48_000, &tuning).expect("stream");
        let shared = Arc::clone(&parts.shared);
        let resampler =
            crate::playback::resample::RatioResampler::new(2, 960).expect("resampler");
        let mut source = SourceStream::new(parts, resampler, 2, 48_000, 1024, tuning);

        let src_period_ns = 20_000_000_i64;
        let dev_period_ns = 21_333_333_i64;
        let data = vec![0u8; 960 * 2 * 2];
        let mut dst = vec![0.0f32; 1024 * 2];

        let mut next_src = 0_i64;
        let mut next_dev = i64::MAX;
        let end_ns = 2_000_000_000_i64;

        while next_src < end_ns || next_dev < end_ns {
            if next_dev <= next_src {
                let got = sink.pull_frames_at(next_dev, &mut dst);
                assert_eq!(got, 1024, "device underrun at {} ns", next_dev);
                next_dev += dev_period_ns;
                continue;
            }

            let update = source
                .handle_data_at(next_src, &data, 0)
                .expect("source period");
            if update == source::SourceUpdate::StartDevice {
                assert_eq!(shared.load(), StreamState::Setup);
                shared.store(StreamState::Run);
                next_dev = next_src + dev_period_ns;
            }
            next_src += src_period_ns;
        }
        assert_eq!(shared.load(), StreamState::Run);

        // Stop the stream and let the device drain what is left.
        shared.store(StreamState::Drain);
        let mut guard = 0;
        while shared.load() != StreamState::Stop {
            sink.pull_frames_at(next_dev, &mut dst);
            next_dev += dev_period_ns;
            guard += 1;
            assert!(guard < 1_000, "stream failed to drain");
        }
    }

    #[test]
    fn clock_states_occupy_disjoint_cache_lines() {
        // Each stream half keeps its clock in a padded cell; two such cells
        // can never share a line regardless of how the halves are laid out.
        assert!(align_of::<CachePadded<ClockLoop>>() >= 64);
        assert!(size_of::<CachePadded<ClockLoop>>() >= align_of::<CachePadded<ClockLoop>>());
    }
}
