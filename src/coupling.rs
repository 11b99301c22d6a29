//! Coupling buffer between the stream producer and the device consumer.
//!
//! A frame-granular FIFO of interleaved `f32` samples with a single producer
//! (the network receive thread) and a single consumer (the device callback
//! thread). The hot path is a wait-free [`rtrb`] ring; when the ring is full
//! the producer parks the excess in a local spill queue and replays it ahead
//! of new data, so `append` never fails and never blocks. The consumer side
//! performs no allocation.

use std::collections::VecDeque;

use rtrb::{Consumer, Producer, RingBuffer};

/// Create a coupling buffer holding at least `capacity_frames` frames of
/// `channels` interleaved samples each.
pub fn coupling_buffer(capacity_frames: usize, channels: usize) -> (FrameWriter, FrameReader) {
    let channels = channels.max(1);
    let (producer, consumer) = RingBuffer::new(capacity_frames.max(1) * channels);
    (
        FrameWriter {
            ring: producer,
            spill: VecDeque::new(),
            spill_high_water: 0,
            channels,
        },
        FrameReader {
            ring: consumer,
            channels,
        },
    )
}

/// Producer endpoint of the coupling buffer.
pub struct FrameWriter {
    ring: Producer<f32>,
    spill: VecDeque<f32>,
    spill_high_water: usize,
    channels: usize,
}

impl FrameWriter {
    /// Append interleaved frames. Any trailing partial frame is dropped.
    pub fn append(&mut self, samples: &[f32]) {
        let whole = samples.len() - samples.len() % self.channels;
        self.push_samples(&samples[..whole]);
    }

    /// Append `frames` frames of silence.
    pub fn append_silence(&mut self, frames: usize) {
        self.flush_spill();
        let mut remaining = frames * self.channels;
        while remaining > 0 && self.spill.is_empty() {
            let n = self.ring.slots().min(remaining);
            if n == 0 {
                break;
            }
            match self.ring.write_chunk(n) {
                // `write_chunk` hands out default-initialized slots, which
                // for `f32` is already silence.
                Ok(chunk) => chunk.commit_all(),
                Err(_) => break,
            }
            remaining -= n;
        }
        if remaining > 0 {
            self.spill_samples_zero(remaining);
        }
    }

    /// Number of frames currently queued, including spilled frames.
    pub fn count(&self) -> usize {
        let queued = self.ring.buffer().capacity() - self.ring.slots();
        (queued + self.spill.len()) / self.channels
    }

    fn push_samples(&mut self, mut samples: &[f32]) {
        self.flush_spill();
        while !samples.is_empty() && self.spill.is_empty() {
            let n = self.ring.slots().min(samples.len());
            if n == 0 {
                break;
            }
            match self.ring.write_chunk(n) {
                Ok(mut chunk) => {
                    let (head, tail) = chunk.as_mut_slices();
                    head.copy_from_slice(&samples[..head.len()]);
                    tail.copy_from_slice(&samples[head.len()..n]);
                    chunk.commit_all();
                    samples = &samples[n..];
                }
                Err(_) => break,
            }
        }
        if !samples.is_empty() {
            self.spill.extend(samples.iter().copied());
            self.note_spill();
        }
    }

    fn spill_samples_zero(&mut self, count: usize) {
        self.spill.extend(std::iter::repeat(0.0).take(count));
        self.note_spill();
    }

    fn note_spill(&mut self) {
        if self.spill.len() > self.spill_high_water {
            self.spill_high_water = self.spill.len();
            log::warn!(
                "coupling buffer full; {} samples held back for the consumer to catch up",
                self.spill.len()
            );
        }
    }

    fn flush_spill(&mut self) {
        while !self.spill.is_empty() {
            let n = self.ring.slots().min(self.spill.len());
            if n == 0 {
                return;
            }
            match self.ring.write_chunk(n) {
                Ok(mut chunk) => {
                    let (head, tail) = chunk.as_mut_slices();
                    for slot in head.iter_mut().chain(tail.iter_mut()) {
                        *slot = self.spill.pop_front().unwrap_or(0.0);
                    }
                    chunk.commit_all();
                }
                Err(_) => return,
            }
        }
    }
}

/// Consumer endpoint of the coupling buffer.
pub struct FrameReader {
    ring: Consumer<f32>,
    channels: usize,
}

impl FrameReader {
    /// Copy up to `dst.len() / channels` frames into `dst` in FIFO order.
    /// Returns the number of frames copied.
    pub fn consume(&mut self, dst: &mut [f32]) -> usize {
        let n = self.ring.slots().min(dst.len());
        let n = n - n % self.channels;
        if n == 0 {
            return 0;
        }
        match self.ring.read_chunk(n) {
            Ok(chunk) => {
                let (head, tail) = chunk.as_slices();
                dst[..head.len()].copy_from_slice(head);
                dst[head.len()..n].copy_from_slice(tail);
                chunk.commit_all();
                n / self.channels
            }
            Err(_) => 0,
        }
    }

    /// Discard up to `frames` frames. Returns the number discarded.
    pub fn discard(&mut self, frames: usize) -> usize {
        let n = self.ring.slots().min(frames * self.channels);
        let n = n - n % self.channels;
        if n == 0 {
            return 0;
        }
        match self.ring.read_chunk(n) {
            Ok(chunk) => {
                chunk.commit_all();
                n / self.channels
            }
            Err(_) => 0,
        }
    }

    /// Number of whole frames available to consume.
    pub fn count(&self) -> usize {
        self.ring.slots() / self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_fifo_order_across_wrap() {
        let (mut writer, mut reader) = coupling_buffer(4, 2);

        for round in 0..5 {
            let base = (round * 6) as f32;
            writer.append(&[base, base + 1.0, base + 2.0, base + 3.0, base + 4.0, base + 5.0]);

            let mut out = [0.0; 6];
            assert_eq!(reader.consume(&mut out), 3);
            assert_eq!(out, [base, base + 1.0, base + 2.0, base + 3.0, base + 4.0, base + 5.0]);
        }
    }

    #[test]
    fn silence_append_produces_zero_frames() {
        let (mut writer, mut reader) = coupling_buffer(16, 2);
        writer.append(&[1.0, 1.0]);
        writer.append_silence(2);

        let mut out = [9.0; 6];
        assert_eq!(reader.consume(&mut out), 3);
        assert_eq!(out, [1.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn discard_advances_the_read_cursor() {
        let (mut writer, mut reader) = coupling_buffer(16, 1);
        writer.append(&[1.0, 2.0, 3.0, 4.0]);

        assert_eq!(reader.discard(2), 2);
        let mut out = [0.0; 2];
        assert_eq!(reader.consume(&mut out), 2);
        assert_eq!(out, [3.0, 4.0]);
    }

    #[test]
    fn discard_is_bounded_by_occupancy() {
        let (mut writer, mut reader) = coupling_buffer(16, 1);
        writer.append(&[1.0, 2.0]);
        assert_eq!(reader.discard(100), 2);
        assert_eq!(reader.count(), 0);
    }

    #[test]
    fn overflow_spills_and_replays_in_order() {
        let (mut writer, mut reader) = coupling_buffer(2, 1);
        writer.append(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(writer.count(), 4);

        let mut out = [0.0; 2];
        assert_eq!(reader.consume(&mut out), 2);
        assert_eq!(out, [1.0, 2.0]);

        // The next append flushes the spilled tail ahead of new data.
        writer.append(&[5.0]);
        assert_eq!(reader.consume(&mut out), 2);
        assert_eq!(out, [3.0, 4.0]);

        // 5.0 was respilled while the ring was still full; another append
        // replays it now that space is available.
        writer.append(&[6.0]);
        assert_eq!(reader.consume(&mut out), 2);
        assert_eq!(out, [5.0, 6.0]);
    }

    #[test]
    fn counts_agree_on_both_endpoints() {
        let (mut writer, reader) = coupling_buffer(8, 2);
        writer.append(&[0.0; 6]);
        assert_eq!(writer.count(), 3);
        assert_eq!(reader.count(), 3);
    }
}
