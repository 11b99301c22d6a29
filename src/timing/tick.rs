//! Device timing snapshots passed from the sink thread to the source thread.

use rtrb::{Consumer, Producer, RingBuffer};

/// Capacity of the tick queue. The source drains it on every period, so a
/// full queue means the source has stalled for this many device periods.
pub const TICK_QUEUE_SLOTS: usize = 16;

/// Snapshot of the device clock published once per device pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceTick {
    pub period_frames: usize,
    pub next_time: i64,
    pub next_position: i64,
}

/// Sink-side endpoint of the tick queue.
pub type TickSender = Producer<DeviceTick>;
/// Source-side endpoint of the tick queue.
pub type TickReceiver = Consumer<DeviceTick>;

/// Create the fixed-size tick queue.
pub fn tick_queue() -> (TickSender, TickReceiver) {
    RingBuffer::new(TICK_QUEUE_SLOTS)
}
