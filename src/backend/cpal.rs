//! Reference backend on top of `cpal`.
//!
//! `cpal` streams are not `Send` on every platform, so each stream lives on
//! a dedicated thread that opens the device, builds the stream, reports the
//! negotiated period size back through a handshake channel, and then
//! services start/stop commands until it is told to shut down.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig, SupportedBufferSize};

use crate::error::AudioError;

use super::{AudioBackend, BackendCaps, PlaybackPull, RecordPush};

/// Period size reported when the device will not reveal its buffer limits.
const FALLBACK_MAX_PERIOD: usize = 2048;

enum StreamCommand {
    Start,
    Pause,
    Shutdown,
}

struct StreamHandle {
    commands: mpsc::Sender<StreamCommand>,
    thread: Option<JoinHandle<()>>,
}

impl StreamHandle {
    fn send(&self, command: StreamCommand) {
        let _ = self.commands.send(command);
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        let _ = self.commands.send(StreamCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Backend built on the platform's default `cpal` host.
pub struct CpalBackend {
    caps: BackendCaps,
    playback: Option<StreamHandle>,
    record: Option<StreamHandle>,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self {
            caps: BackendCaps::default(),
            playback: None,
            record: None,
        }
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn init(&mut self) -> bool {
        let host = cpal::default_host();
        if host.default_output_device().is_none() {
            return false;
        }
        self.caps = BackendCaps {
            playback: true,
            record: host.default_input_device().is_some(),
            ..BackendCaps::default()
        };
        true
    }

    fn free(&mut self) {
        self.playback = None;
        self.record = None;
        self.caps = BackendCaps::default();
    }

    fn caps(&self) -> BackendCaps {
        self.caps
    }

    fn playback_setup(
        &mut self,
        channels: usize,
        sample_rate: u32,
        mut pull: Box<dyn PlaybackPull>,
    ) -> Result<usize, AudioError> {
        self.playback = None;

        let (result_tx, result_rx) = mpsc::sync_channel(0);
        let (command_tx, command_rx) = mpsc::channel();
        let thread = std::thread::spawn(move || {
            let built = (|| -> Result<(cpal::Stream, usize), String> {
                let host = cpal::default_host();
                let device = host
                    .default_output_device()
                    .ok_or_else(|| "no output device".to_string())?;
                let supported = device.default_output_config().map_err(|e| e.to_string())?;

                // Pin the callback size where the device lets us; the
                // engine's latency target scales with whatever we report.
                let desired = (sample_rate / 50).max(256);
                let (buffer_size, max_period) = match supported.buffer_size() {
                    SupportedBufferSize::Range { min, max } => {
                        let frames = desired.clamp(*min, *max);
                        (BufferSize::Fixed(frames), frames as usize)
                    }
                    SupportedBufferSize::Unknown => (BufferSize::Default, FALLBACK_MAX_PERIOD),
                };
                let config = StreamConfig {
                    channels: channels as u16,
                    sample_rate: SampleRate(sample_rate),
                    buffer_size,
                };

                let stream = device
                    .build_output_stream(
                        &config,
                        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                            let frames = pull.pull_frames(data);
                            data[frames * channels..].fill(0.0);
                        },
                        |err| log::error!("playback stream error: {}", err),
                        None,
                    )
                    .map_err(|e| e.to_string())?;
                Ok((stream, max_period))
            })();

            let stream = match built {
                Ok((stream, max_period)) => {
                    let _ = result_tx.send(Ok(max_period));
                    stream
                }
                Err(err) => {
                    let _ = result_tx.send(Err(err));
                    return;
                }
            };

            while let Ok(command) = command_rx.recv() {
                match command {
                    StreamCommand::Start => {
                        if let Err(err) = stream.play() {
                            log::error!("failed to start playback stream: {}", err);
                        }
                    }
                    StreamCommand::Pause => {
                        if let Err(err) = stream.pause() {
                            log::warn!("failed to pause playback stream: {}", err);
                        }
                    }
                    StreamCommand::Shutdown => break,
                }
            }
        });

        match result_rx.recv() {
            Ok(Ok(max_period)) => {
                self.playback = Some(StreamHandle {
                    commands: command_tx,
                    thread: Some(thread),
                });
                log::debug!(
                    "cpal playback open: {} ch @ {} Hz, max period {} frames",
                    channels,
                    sample_rate,
                    max_period
                );
                Ok(max_period)
            }
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(AudioError::BackendSetup(err))
            }
            Err(_) => Err(AudioError::BackendSetup(
                "playback stream thread died".into(),
            )),
        }
    }

    fn playback_start(&mut self) {
        if let Some(handle) = &self.playback {
            handle.send(StreamCommand::Start);
        }
    }

    fn playback_stop(&mut self) {
        if let Some(handle) = &self.playback {
            handle.send(StreamCommand::Pause);
        }
        self.playback = None;
    }

    fn record_start(
        &mut self,
        channels: usize,
        sample_rate: u32,
        push: Arc<dyn RecordPush>,
    ) -> Result<(), AudioError> {
        self.record = None;

        let (result_tx, result_rx) = mpsc::sync_channel(0);
        let (command_tx, command_rx) = mpsc::channel();
        let thread = std::thread::spawn(move || {
            let built = (|| -> Result<cpal::Stream, String> {
                let host = cpal::default_host();
                let device = host
                    .default_input_device()
                    .ok_or_else(|| "no input device".to_string())?;
                let config = StreamConfig {
                    channels: channels as u16,
                    sample_rate: SampleRate(sample_rate),
                    buffer_size: BufferSize::Default,
                };

                let mut staging: Vec<u8> = Vec::new();
                let stream = device
                    .build_input_stream(
                        &config,
                        move |data: &[f32], _: &cpal::InputCallbackInfo| {
                            let frames = data.len() / channels;
                            staging.clear();
                            staging.reserve(data.len() * 2);
                            for sample in data {
                                let quantized =
                                    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                                staging.extend_from_slice(&quantized.to_ne_bytes());
                            }
                            push.push_frames(&staging, frames);
                        },
                        |err| log::error!("record stream error: {}", err),
                        None,
                    )
                    .map_err(|e| e.to_string())?;
                stream.play().map_err(|e| e.to_string())?;
                Ok(stream)
            })();

            let _stream = match built {
                Ok(stream) => {
                    let _ = result_tx.send(Ok(()));
                    stream
                }
                Err(err) => {
                    let _ = result_tx.send(Err(err));
                    return;
                }
            };

            while let Ok(command) = command_rx.recv() {
                if let StreamCommand::Shutdown = command {
                    break;
                }
            }
        });

        match result_rx.recv() {
            Ok(Ok(())) => {
                self.record = Some(StreamHandle {
                    commands: command_tx,
                    thread: Some(thread),
                });
                log::debug!("cpal record open: {} ch @ {} Hz", channels, sample_rate);
                Ok(())
            }
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(AudioError::BackendSetup(err))
            }
            Err(_) => Err(AudioError::BackendSetup("record stream thread died".into())),
        }
    }

    fn record_stop(&mut self) {
        self.record = None;
    }
}
