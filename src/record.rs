//! Record passthrough from the capture device to a registered sink.

use std::sync::Arc;

use crate::backend::RecordPush;

/// Destination for captured audio, registered by the application.
///
/// Frames arrive as interleaved signed 16-bit samples, exactly as the
/// backend produced them; the engine performs no processing on this path.
pub trait RecordSink: Send + Sync {
    fn write(&self, data: &[u8], frames: usize);
}

/// Adapter handed to the backend at record start.
pub(crate) struct RecordForwarder {
    sink: Arc<dyn RecordSink>,
}

impl RecordForwarder {
    pub(crate) fn new(sink: Arc<dyn RecordSink>) -> Self {
        Self { sink }
    }
}

impl RecordPush for RecordForwarder {
    fn push_frames(&self, data: &[u8], frames: usize) {
        self.sink.write(data, frames);
    }
}

/// Cached record-side state, kept across stream restarts.
#[derive(Default)]
pub(crate) struct RecordControl {
    pub started: bool,
    pub channels: usize,
    pub sample_rate: u32,
    pub volume: Vec<u16>,
    pub mute: bool,
    pub sink: Option<Arc<dyn RecordSink>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CollectingSink {
        frames: Mutex<usize>,
    }

    impl RecordSink for CollectingSink {
        fn write(&self, data: &[u8], frames: usize) {
            assert_eq!(data.len() % frames.max(1), 0);
            *self.frames.lock().unwrap() += frames;
        }
    }

    #[test]
    fn forwarder_passes_frames_through_unchanged() {
        let sink = Arc::new(CollectingSink {
            frames: Mutex::new(0),
        });
        let forwarder = RecordForwarder::new(sink.clone());

        forwarder.push_frames(&[0u8; 64], 16);
        forwarder.push_frames(&[0u8; 32], 8);
        assert_eq!(*sink.frames.lock().unwrap(), 24);
    }
}
