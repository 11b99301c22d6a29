//! Engine owning the backend and the playback and record state.

use std::sync::Arc;

use crate::backend::{default_backends, AudioBackend};
use crate::error::AudioError;
use crate::playback::latency_meter::LatencyStats;
use crate::playback::resample::RatioResampler;
use crate::playback::source::SourceUpdate;
use crate::playback::{open_stream, SourceStream, StreamState};
use crate::record::{RecordControl, RecordForwarder, RecordSink};
use crate::tuning::Tuning;

/// Advisory tag describing the submitted sample format. The engine assumes
/// interleaved signed 16-bit input regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    S16,
}

/// Most channels a cached volume vector can carry.
const MAX_VOLUME_CHANNELS: usize = 8;

struct Session {
    source: SourceStream,
    channels: usize,
    sample_rate: u32,
}

#[derive(Default)]
struct PlaybackControl {
    session: Option<Session>,
    volume: Vec<u16>,
    mute: bool,
}

/// One process-wide audio engine.
///
/// The engine owns at most one playback stream and one record stream. All
/// methods are synchronous; playback data is expected on a single producer
/// thread, while the backend drives the device callbacks on its own threads.
pub struct Engine {
    backend: Option<Box<dyn AudioBackend>>,
    tuning: Tuning,
    playback: PlaybackControl,
    record: RecordControl,
}

impl Engine {
    /// Probe `backends` in order and keep the first that initializes. With
    /// no usable backend the engine stays constructible but every call is a
    /// no-op.
    pub fn new(backends: Vec<Box<dyn AudioBackend>>) -> Self {
        let mut selected = None;
        for mut backend in backends {
            if backend.init() {
                log::info!("using audio backend: {}", backend.name());
                selected = Some(backend);
                break;
            }
        }
        if selected.is_none() {
            log::warn!("failed to initialize an audio backend");
        }

        Self {
            backend: selected,
            tuning: Tuning::default(),
            playback: PlaybackControl::default(),
            record: RecordControl::default(),
        }
    }

    pub fn with_default_backends() -> Self {
        Self::new(default_backends())
    }

    /// Replace the control-loop tuning for streams started after this call.
    pub fn set_tuning(&mut self, tuning: Tuning) {
        self.tuning = tuning;
    }

    pub fn tuning(&self) -> Tuning {
        self.tuning
    }

    /// Stop everything immediately and release the backend.
    pub fn free(&mut self) {
        if self.backend.is_none() {
            return;
        }
        // Immediate stop; no drain.
        self.playback_stop_now();
        self.record_stop();
        if let Some(mut backend) = self.backend.take() {
            backend.free();
        }
    }

    pub fn supports_playback(&self) -> bool {
        self.backend
            .as_ref()
            .map(|backend| backend.caps().playback)
            .unwrap_or(false)
    }

    pub fn supports_record(&self) -> bool {
        self.backend
            .as_ref()
            .map(|backend| backend.caps().record)
            .unwrap_or(false)
    }

    /// Start or restart the playback stream.
    ///
    /// A live stream is torn down first even when the format matches: the
    /// data remaining in its buffers cannot be trusted to cover the gap
    /// without underrunning.
    pub fn playback_start(
        &mut self,
        channels: usize,
        sample_rate: u32,
        format: SampleFormat,
        time: u32,
    ) -> Result<(), AudioError> {
        if self.backend.is_none() {
            return Err(AudioError::BackendUnavailable);
        }
        log::debug!(
            "playback start: {} ch @ {} Hz ({:?}, t={})",
            channels,
            sample_rate,
            format,
            time
        );

        if self.playback.session.is_some() {
            self.playback_stop_now();
        }

        // The resampler chunk follows the source period size; until the
        // first period arrives it holds a nominal 10 ms placeholder.
        let provisional_chunk = (sample_rate as usize / 100).max(1);
        let resampler = match RatioResampler::new(channels, provisional_chunk) {
            Ok(resampler) => resampler,
            Err(err) => {
                log::error!("failed to create resampler: {}", err);
                return Err(err);
            }
        };

        let (sink, parts) = open_stream(channels, sample_rate, &self.tuning)?;
        let shared = Arc::clone(&parts.shared);

        let backend = self.backend.as_mut().expect("backend present");
        let device_max_period = match backend.playback_setup(channels, sample_rate, Box::new(sink))
        {
            Ok(frames) => frames,
            Err(err) => {
                log::error!("backend playback setup failed: {}", err);
                shared.store(StreamState::Stop);
                return Err(err);
            }
        };
        if device_max_period == 0 {
            let err = AudioError::BackendSetup("backend reported a zero period size".into());
            log::error!("{}", err);
            shared.store(StreamState::Stop);
            backend.playback_stop();
            return Err(err);
        }

        // Restore cached device state before any data flows.
        let caps = backend.caps();
        if caps.playback_volume && !self.playback.volume.is_empty() {
            backend.playback_volume(&self.playback.volume);
        }
        if caps.playback_mute {
            backend.playback_mute(self.playback.mute);
        }

        let source = SourceStream::new(
            parts,
            resampler,
            channels,
            sample_rate,
            device_max_period,
            self.tuning,
        );
        self.playback.session = Some(Session {
            source,
            channels,
            sample_rate,
        });
        Ok(())
    }

    /// Let the stream play out what is buffered, then stop. The device
    /// thread performs the final transition when the buffer runs dry.
    pub fn playback_stop(&mut self) {
        if self.backend.is_none() {
            return;
        }
        if let Some(session) = &self.playback.session {
            let shared = session.source.shared();
            if shared.load() != StreamState::Stop {
                shared.store(StreamState::Drain);
                log::debug!("playback draining");
            }
        }
    }

    /// Set the playback volume, caching it for stream restarts.
    pub fn playback_volume(&mut self, volume: &[u16]) {
        let Some(backend) = self.backend.as_mut() else {
            return;
        };
        if !backend.caps().playback_volume {
            return;
        }

        let channels = volume.len().min(MAX_VOLUME_CHANNELS);
        self.playback.volume = volume[..channels].to_vec();

        let active = self
            .playback
            .session
            .as_ref()
            .map(|session| session.source.shared().load().is_active())
            .unwrap_or(false);
        if active {
            backend.playback_volume(&self.playback.volume);
        }
    }

    /// Set the playback mute state, caching it for stream restarts.
    pub fn playback_mute(&mut self, mute: bool) {
        let Some(backend) = self.backend.as_mut() else {
            return;
        };
        if !backend.caps().playback_mute {
            return;
        }

        self.playback.mute = mute;
        let active = self
            .playback
            .session
            .as_ref()
            .map(|session| session.source.shared().load().is_active())
            .unwrap_or(false);
        if active {
            backend.playback_mute(mute);
        }
    }

    /// Submit one period of interleaved signed 16-bit samples from the
    /// source. Data arriving while the stream is stopped or draining is
    /// dropped.
    pub fn playback_data(&mut self, data: &[u8]) {
        if self.backend.is_none() || data.is_empty() {
            return;
        }
        self.reap_stopped();

        let backend_latency = {
            let backend = self.backend.as_ref().expect("backend present");
            if backend.caps().playback_latency {
                backend.playback_latency()
            } else {
                0
            }
        };

        let (outcome, shared) = match self.playback.session.as_mut() {
            Some(session) => {
                let shared = Arc::clone(session.source.shared());
                if !shared.load().is_active() {
                    return;
                }
                (session.source.handle_data(data, backend_latency), shared)
            }
            None => return,
        };

        match outcome {
            Ok(SourceUpdate::Continue) => {}
            Ok(SourceUpdate::StartDevice) => {
                if let Some(backend) = self.backend.as_mut() {
                    backend.playback_start();
                }
                shared.store(StreamState::Run);
                log::debug!("playback running");
            }
            // The offending period was dropped; the stream keeps going.
            Err(AudioError::Resample(_)) => {}
            Err(err) => {
                log::error!("playback stream failed: {}", err);
                self.playback_stop_now();
            }
        }
    }

    /// Current lifecycle state of the playback stream.
    pub fn stream_state(&self) -> StreamState {
        self.playback
            .session
            .as_ref()
            .map(|session| session.source.shared().load())
            .unwrap_or(StreamState::Stop)
    }

    /// Latency window summary of the running stream.
    pub fn playback_latency_stats(&self) -> Option<LatencyStats> {
        self.playback
            .session
            .as_ref()
            .map(|session| session.source.latency_stats())
    }

    /// Register the destination for captured audio.
    pub fn set_record_sink(&mut self, sink: Arc<dyn RecordSink>) {
        self.record.sink = Some(sink);
    }

    /// Start capture, or reconfigure it when the format changed. A repeated
    /// start with the same format is a no-op.
    pub fn record_start(&mut self, channels: usize, sample_rate: u32, format: SampleFormat) {
        let Some(backend) = self.backend.as_mut() else {
            return;
        };
        if !backend.caps().record {
            return;
        }
        log::debug!(
            "record start: {} ch @ {} Hz ({:?})",
            channels,
            sample_rate,
            format
        );

        if self.record.started {
            if channels == self.record.channels && sample_rate == self.record.sample_rate {
                return;
            }
            backend.record_stop();
            self.record.started = false;
        }

        let Some(sink) = self.record.sink.clone() else {
            log::warn!("no record sink registered; capture not started");
            return;
        };

        let push = Arc::new(RecordForwarder::new(sink));
        if let Err(err) = backend.record_start(channels, sample_rate, push) {
            log::error!("backend record start failed: {}", err);
            return;
        }
        self.record.started = true;
        self.record.channels = channels;
        self.record.sample_rate = sample_rate;

        let caps = backend.caps();
        if caps.record_volume && !self.record.volume.is_empty() {
            backend.record_volume(&self.record.volume);
        }
        if caps.record_mute {
            backend.record_mute(self.record.mute);
        }
    }

    pub fn record_stop(&mut self) {
        let Some(backend) = self.backend.as_mut() else {
            return;
        };
        if !self.record.started {
            return;
        }
        backend.record_stop();
        self.record.started = false;
    }

    /// Set the record volume, caching it for capture restarts.
    pub fn record_volume(&mut self, volume: &[u16]) {
        let Some(backend) = self.backend.as_mut() else {
            return;
        };
        if !backend.caps().record_volume {
            return;
        }

        let channels = volume.len().min(MAX_VOLUME_CHANNELS);
        self.record.volume = volume[..channels].to_vec();

        if self.record.started {
            backend.record_volume(&self.record.volume);
        }
    }

    /// Set the record mute state, caching it for capture restarts.
    pub fn record_mute(&mut self, mute: bool) {
        let Some(backend) = self.backend.as_mut() else {
            return;
        };
        if !backend.caps().record_mute {
            return;
        }

        self.record.mute = mute;
        if self.record.started {
            backend.record_mute(mute);
        }
    }

    /// Stop and release the current playback session immediately.
    fn playback_stop_now(&mut self) {
        let Some(session) = self.playback.session.take() else {
            return;
        };
        session.source.shared().store(StreamState::Stop);
        if let Some(backend) = self.backend.as_mut() {
            backend.playback_stop();
        }
        log::debug!(
            "playback stopped: {} ch @ {} Hz",
            session.channels,
            session.sample_rate
        );
    }

    /// Release a session whose sink already drained it to a stop.
    fn reap_stopped(&mut self) {
        let stopped = self
            .playback
            .session
            .as_ref()
            .map(|session| session.source.shared().load() == StreamState::Stop)
            .unwrap_or(false);
        if stopped {
            self.playback_stop_now();
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.free();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_without_backend_is_a_no_op() {
        let mut engine = Engine::new(Vec::new());
        assert!(!engine.supports_playback());
        assert!(!engine.supports_record());
        assert!(matches!(
            engine.playback_start(2, 48_000, SampleFormat::S16, 0),
            Err(AudioError::BackendUnavailable)
        ));
        engine.playback_data(&[0u8; 64]);
        engine.playback_stop();
        engine.record_start(2, 48_000, SampleFormat::S16);
        assert_eq!(engine.stream_state(), StreamState::Stop);
    }

    #[test]
    fn failed_probes_leave_the_engine_empty() {
        struct RefusingBackend;
        impl AudioBackend for RefusingBackend {
            fn name(&self) -> &'static str {
                "refusing"
            }
            fn init(&mut self) -> bool {
                false
            }
            fn free(&mut self) {}
            fn caps(&self) -> crate::backend::BackendCaps {
                crate::backend::BackendCaps::default()
            }
            fn playback_setup(
                &mut self,
                _channels: usize,
                _sample_rate: u32,
                _pull: Box<dyn crate::backend::PlaybackPull>,
            ) -> Result<usize, AudioError> {
                unreachable!("init refused")
            }
            fn playback_start(&mut self) {}
            fn playback_stop(&mut self) {}
        }

        let engine = Engine::new(vec![Box::new(RefusingBackend)]);
        assert!(!engine.supports_playback());
    }
}
