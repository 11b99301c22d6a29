//! # Driftlock
//!
//! Adaptive clock-recovery playback engine for an audio bridge: a remote
//! producer delivers 16-bit PCM at its own sample clock, a local device
//! pulls `f32` frames at another, and the engine keeps the two in step by
//! tracking both clocks, filtering the buffer-level error, and continuously
//! retuning a sinc resampler. A trivial record path forwards captured
//! frames back to the producer.

pub mod backend;
pub mod convert;
pub mod coupling;
pub mod engine;
pub mod error;
pub mod playback;
pub mod record;
pub mod timing;
pub mod tuning;

pub use engine::{Engine, SampleFormat};
pub use error::AudioError;
pub use playback::latency_meter::LatencyStats;
pub use playback::StreamState;
pub use record::RecordSink;
pub use tuning::Tuning;
