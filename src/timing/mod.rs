//! Clock tracking for the two independent sample clocks.

mod clock;
mod tick;

pub use clock::ClockLoop;
pub use tick::{tick_queue, DeviceTick, TickReceiver, TickSender, TICK_QUEUE_SLOTS};

use std::time::Instant;

/// Nanoseconds elapsed since the session epoch.
pub fn nanos_since(epoch: Instant) -> i64 {
    epoch.elapsed().as_nanos() as i64
}
