//! Variable-ratio sinc resampler driving the coupling buffer.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::error::AudioError;

/// Widest ratio the controller is allowed to request, relative to unity.
/// The rate controller stays within a fraction of a percent of 1.0; this
/// bound exists to size the output scratch and to catch a runaway loop.
const MAX_RATIO_RELATIVE: f64 = 1.1;

fn sinc_parameters() -> SincInterpolationParameters {
    SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    }
}

/// A sinc resampler processing one source period per call at a ratio chosen
/// by the rate controller.
///
/// The inner resampler consumes fixed-size input chunks, so it is rebuilt
/// whenever the source period size changes; the per-channel scratch planes
/// and the interleave staging buffer are reallocated at the same time. All
/// of that happens on the source thread.
pub struct RatioResampler {
    inner: SincFixedIn<f32>,
    channels: usize,
    chunk_frames: usize,
    input: Vec<Vec<f32>>,
    output: Vec<Vec<f32>>,
    staging: Vec<f32>,
}

impl RatioResampler {
    /// Build a resampler for `channels` interleaved channels with an initial
    /// chunk size of `chunk_frames`.
    pub fn new(channels: usize, chunk_frames: usize) -> Result<Self, AudioError> {
        if channels == 0 {
            return Err(AudioError::ResamplerInit(
                "channel count must be nonzero".into(),
            ));
        }
        let chunk_frames = chunk_frames.max(1);
        let inner = SincFixedIn::new(
            1.0,
            MAX_RATIO_RELATIVE,
            sinc_parameters(),
            chunk_frames,
            channels,
        )
        .map_err(|err| AudioError::ResamplerInit(err.to_string()))?;

        let out_max = inner.output_frames_max();
        Ok(Self {
            inner,
            channels,
            chunk_frames,
            input: vec![vec![0.0; chunk_frames]; channels],
            output: vec![vec![0.0; out_max]; channels],
            staging: vec![0.0; out_max * channels],
        })
    }

    /// Current input chunk size in frames.
    pub fn chunk_frames(&self) -> usize {
        self.chunk_frames
    }

    /// Upper bound on frames produced by a single [`process`](Self::process).
    pub fn max_output_frames(&self) -> usize {
        self.inner.output_frames_max()
    }

    /// Rebuild for a new source period size. A no-op when the size matches.
    pub fn set_chunk_frames(&mut self, chunk_frames: usize) -> Result<(), AudioError> {
        if chunk_frames == self.chunk_frames {
            return Ok(());
        }
        *self = Self::new(self.channels, chunk_frames)?;
        Ok(())
    }

    /// Input planes for the next chunk, one per channel, each
    /// `chunk_frames` long.
    pub fn input_planes(&mut self) -> &mut [Vec<f32>] {
        &mut self.input
    }

    /// Resample the current input planes at `ratio`.
    ///
    /// Returns the number of input frames consumed and the produced output
    /// as interleaved samples; the slice borrows the staging buffer and is
    /// valid until the next call.
    pub fn process(&mut self, ratio: f64) -> Result<(usize, &[f32]), AudioError> {
        self.inner
            .set_resample_ratio(ratio, false)
            .map_err(|err| AudioError::Resample(err.to_string()))?;

        let (consumed, produced) = self
            .inner
            .process_into_buffer(&self.input, &mut self.output, None)
            .map_err(|err| AudioError::Resample(err.to_string()))?;

        for (channel, plane) in self.output.iter().enumerate() {
            for frame in 0..produced {
                self.staging[frame * self.channels + channel] = plane[frame];
            }
        }
        Ok((consumed, &self.staging[..produced * self.channels]))
    }
}
