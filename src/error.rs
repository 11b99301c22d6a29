use std::fmt::{Display, Formatter};

/// Error type for engine setup and streaming failures.
#[derive(Debug)]
pub enum AudioError {
    /// No audio backend could be initialized; the engine is a no-op.
    BackendUnavailable,
    /// The selected backend failed to open or configure a stream.
    BackendSetup(String),
    /// The resampler could not be constructed for the requested format.
    ResamplerInit(String),
    /// The resampler failed while processing a period of source data.
    Resample(String),
    /// The sink published more timing ticks than the source consumed.
    TickQueueFull,
}

impl Display for AudioError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BackendUnavailable => write!(f, "no usable audio backend"),
            Self::BackendSetup(err) => write!(f, "backend setup error: {}", err),
            Self::ResamplerInit(err) => write!(f, "resampler init error: {}", err),
            Self::Resample(err) => write!(f, "resampling error: {}", err),
            Self::TickQueueFull => write!(f, "device tick queue overflowed"),
        }
    }
}

impl std::error::Error for AudioError {}
