//! Playback task
//!
//! Single consumer of the PCM queue. Moves one frame out under the lock,
//! releases it, writes to the output device, and broadcasts a drain signal
//! when the queue empties — the "speech stop" handshake waits on that. No
//! allocation on the hot path beyond the frame it already owns.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sona_core::{AecMode, PcmFrame};

use crate::session::Session;

impl Session {
    pub(crate) fn playback_loop(self: Arc<Self>) {
        loop {
            let frame: PcmFrame = {
                let mut queue = self.playback.lock();
                loop {
                    if self.is_stopping() {
                        return;
                    }
                    if let Some(frame) = queue.pop_front() {
                        if queue.is_empty() {
                            // Drain signal for stop handshakes.
                            self.playback_cv.notify_all();
                        }
                        break frame;
                    }
                    self.playback_cv.wait(&mut queue);
                }
            };

            // Discard anything decoded before an abort landed.
            if self.aborted.load(Ordering::Acquire) {
                continue;
            }

            if let Err(e) = self.device.write(&frame) {
                tracing::warn!("playback write failed: {e}");
                continue;
            }

            *self.last_output.lock() = Instant::now();

            if self.aec_mode.load() == AecMode::OnServer {
                // Reference time for server-side echo cancellation.
                let elapsed = self.started_at.elapsed().as_millis() as u32;
                self.timestamps.lock().push_back(elapsed);
            }
        }
    }

    /// Block until the playback queue is empty or the timeout elapses.
    /// Returns true when the queue drained. Idempotent: with an already
    /// empty queue it returns immediately.
    pub fn wait_playback_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut queue = self.playback.lock();
        while !queue.is_empty() && !self.is_stopping() {
            if self.playback_cv.wait_until(&mut queue, deadline).timed_out() {
                return queue.is_empty();
            }
        }
        true
    }
}
