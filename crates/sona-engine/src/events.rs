//! Session loop event bits
//!
//! A tiny event-group: producers set bits, the session loop blocks until any
//! bit in its mask is set and consumes them atomically.

use parking_lot::{Condvar, Mutex};

/// A deferred closure was scheduled onto the session loop.
pub const SCHEDULE: u32 = 1 << 0;

/// The outbound send queue has packets to publish.
pub const SEND_AUDIO: u32 = 1 << 1;

/// The engine is shutting down.
pub const STOP: u32 = 1 << 2;

#[derive(Default)]
pub struct EventBits {
    bits: Mutex<u32>,
    cv: Condvar,
}

impl EventBits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set bits and wake waiters.
    pub fn set(&self, bits: u32) {
        let mut current = self.bits.lock();
        *current |= bits;
        self.cv.notify_all();
    }

    /// Block until any bit in `mask` is set; returns and clears those bits.
    pub fn wait_any(&self, mask: u32) -> u32 {
        let mut current = self.bits.lock();
        loop {
            let hit = *current & mask;
            if hit != 0 {
                *current &= !hit;
                return hit;
            }
            self.cv.wait(&mut current);
        }
    }
}
