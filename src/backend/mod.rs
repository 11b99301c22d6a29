//! Device backend contract consumed by the engine.
//!
//! A backend wraps one platform audio API. The engine probes the available
//! backends in order at construction and drives the first one that
//! initializes; everything after that flows through the callback objects
//! registered at setup time.

#[cfg(feature = "cpal-backend")]
pub mod cpal;

use std::sync::Arc;

use crate::error::AudioError;

/// Pull callback implemented by the playback core.
///
/// `dst` holds space for a whole number of interleaved frames. The return
/// value is the number of frames written; the backend is responsible for
/// zero-filling any shortfall.
pub trait PlaybackPull: Send {
    fn pull_frames(&mut self, dst: &mut [f32]) -> usize;
}

/// Push callback implemented by the record core. `data` holds `frames`
/// whole frames of interleaved signed 16-bit samples.
pub trait RecordPush: Send + Sync {
    fn push_frames(&self, data: &[u8], frames: usize);
}

/// Optional-capability map for a backend. The engine silently skips calls
/// the backend does not support, and does not cache state for them.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackendCaps {
    pub playback: bool,
    pub playback_volume: bool,
    pub playback_mute: bool,
    pub playback_latency: bool,
    pub record: bool,
    pub record_volume: bool,
    pub record_mute: bool,
}

/// One platform audio API.
///
/// Calls arrive on the engine's thread; the backend owns whatever device
/// threads it needs and must not invoke the callbacks after the matching
/// stop call returns.
pub trait AudioBackend: Send {
    fn name(&self) -> &'static str;

    /// Probe and claim the device API. Returning false makes the engine try
    /// the next backend.
    fn init(&mut self) -> bool;

    fn free(&mut self);

    fn caps(&self) -> BackendCaps;

    /// Open a playback stream and return the device's maximum period size
    /// in frames (strictly positive). The device does not run until
    /// [`playback_start`](Self::playback_start).
    fn playback_setup(
        &mut self,
        channels: usize,
        sample_rate: u32,
        pull: Box<dyn PlaybackPull>,
    ) -> Result<usize, AudioError>;

    fn playback_start(&mut self);

    /// Tear down the playback stream, dropping the pull callback.
    fn playback_stop(&mut self);

    fn playback_volume(&mut self, _volume: &[u16]) {}

    fn playback_mute(&mut self, _mute: bool) {}

    /// Device-side latency in frames, beyond what sits in the coupling
    /// buffer.
    fn playback_latency(&self) -> usize {
        0
    }

    fn record_start(
        &mut self,
        _channels: usize,
        _sample_rate: u32,
        _push: Arc<dyn RecordPush>,
    ) -> Result<(), AudioError> {
        Err(AudioError::BackendSetup("record is not supported".into()))
    }

    fn record_stop(&mut self) {}

    fn record_volume(&mut self, _volume: &[u16]) {}

    fn record_mute(&mut self, _mute: bool) {}
}

/// Backends to probe, in preference order.
pub fn default_backends() -> Vec<Box<dyn AudioBackend>> {
    #[allow(unused_mut)]
    let mut backends: Vec<Box<dyn AudioBackend>> = Vec::new();
    #[cfg(feature = "cpal-backend")]
    backends.push(Box::new(self::cpal::CpalBackend::new()));
    backends
}
