//! Monotonic millisecond clock for `created_at_ms`/`last_activity_ms`
//! (spec.md §9's "Clock source" design note). The wall clock is reserved
//! for the emitted message `timestamp`; see `sniffer_core::time`.

use std::time::Instant;

pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}
