//! Inbound audio pipeline
//!
//! Opaque compressed frames arrive from the transport, are gated by session
//! state, decoded concurrently within a bound and pushed into the playback
//! queue under backpressure. Admission overflow is handled by thinning:
//! removing a sparse subset of older frames instead of a contiguous run, so
//! bursts degrade without a perceptible gap.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sona_core::{
    CompressedFrame, DeviceState, PcmFrame, MAX_CONCURRENT_DECODES, MAX_INBOUND_FRAMES,
    PLAYBACK_HARD_LIMIT, PLAYBACK_HIGH_WATERMARK, PLAYBACK_LOW_WATERMARK, SAMPLE_RATE_HZ,
    THINNING_MAX_REMOVED, THINNING_STRIDE,
};

use crate::session::Session;

/// Why an inbound frame was discarded. Counted, never surfaced.
#[derive(Default)]
pub struct DropCounters {
    pub aborted: AtomicU64,
    pub wrong_state: AtomicU64,
    pub overflow: AtomicU64,
}

/// Remove every `stride`-th frame (at most `max_removed` of them), scanning
/// from the oldest. Returns the number of frames removed.
pub(crate) fn thin_queue(
    queue: &mut VecDeque<CompressedFrame>,
    stride: usize,
    max_removed: usize,
) -> usize {
    debug_assert!(stride >= 2);
    let mut removed = 0;
    let mut index = stride - 1;
    while removed < max_removed && index < queue.len() {
        queue.remove(index);
        removed += 1;
        // The queue shifted left by one; step by stride relative to the
        // original positions.
        index += stride - 1;
    }
    removed
}

impl Session {
    /// Admission, called from the transport callback under the session mutex.
    pub(crate) fn on_incoming_audio(&self, frame: CompressedFrame) {
        let mut shared = self.shared.lock();

        if self.aborted.load(Ordering::Acquire) {
            self.drops.aborted.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if self.state.load() != DeviceState::Speaking {
            self.drops.wrong_state.fetch_add(1, Ordering::Relaxed);
            return;
        }

        if shared.inbound.len() < MAX_INBOUND_FRAMES {
            shared.inbound.push_back(frame);
            return;
        }

        let removed = thin_queue(&mut shared.inbound, THINNING_STRIDE, THINNING_MAX_REMOVED);
        if removed > 0 {
            shared.inbound.push_back(frame);
            tracing::debug!(removed, "inbound queue thinned to admit a new frame");
        } else {
            self.drops.overflow.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("inbound queue full, frame dropped");
        }
    }

    /// Decode scheduling, run on the playback-driver tick.
    ///
    /// Backpressure first: when the playback queue is at its high watermark
    /// no decode is scheduled and compressed frames accumulate instead
    /// (cheaper memory). Then the concurrency bound, then one frame is
    /// popped and submitted.
    pub(crate) fn decode_tick(self: &Arc<Self>) {
        let depth = self.playback.lock().len();
        if depth >= PLAYBACK_HIGH_WATERMARK {
            self.playback_backpressure.store(true, Ordering::Release);
            return;
        }
        if depth <= PLAYBACK_LOW_WATERMARK {
            self.playback_backpressure.store(false, Ordering::Release);
        }

        if self.active_decode_tasks.load(Ordering::Acquire) >= MAX_CONCURRENT_DECODES {
            return;
        }

        let frame = {
            let mut shared = self.shared.lock();

            let local = shared.local_frames > 0;
            let speaking =
                self.state.load() == DeviceState::Speaking && !self.aborted.load(Ordering::Acquire);
            if !speaking && !local {
                drop(shared);
                self.maybe_disable_idle_output();
                return;
            }

            match shared.inbound.pop_front() {
                Some(frame) => {
                    if shared.local_frames > 0 {
                        shared.local_frames -= 1;
                    }
                    if shared.inbound.is_empty() {
                        self.decode_cv.notify_all();
                    }
                    frame
                }
                None => {
                    drop(shared);
                    self.maybe_disable_idle_output();
                    return;
                }
            }
        };

        let seq = self.decode_seq.fetch_add(1, Ordering::Relaxed);
        let session = Arc::clone(self);
        self.worker.schedule(move || session.run_decode(seq, frame));
    }

    /// One decode job on the worker pool.
    pub(crate) fn run_decode(&self, seq: u64, frame: CompressedFrame) {
        self.active_decode_tasks.fetch_add(1, Ordering::AcqRel);

        // Frames must reach the player in submission order; jobs take their
        // turn before touching the decoder.
        self.wait_decode_turn(seq);

        if self.aborted.load(Ordering::Acquire) || self.is_stopping() {
            self.finish_decode();
            return;
        }

        let pcm = match self.decoder.lock().decode(&frame.0) {
            Ok(pcm) => pcm,
            Err(e) => {
                tracing::warn!("dropping frame: {e}");
                self.finish_decode();
                return;
            }
        };

        let pcm = if self.device.output_sample_rate() != SAMPLE_RATE_HZ {
            self.output_resampler.process(&pcm)
        } else {
            pcm
        };

        {
            let mut queue = self.playback.lock();
            if queue.len() >= PLAYBACK_HARD_LIMIT {
                // Backpressure should prevent this; drop rather than grow.
                tracing::warn!("playback queue at hard limit, decoded frame dropped");
            } else {
                queue.push_back(PcmFrame(pcm));
                self.playback_cv.notify_all();
            }
        }

        self.finish_decode();
    }

    fn wait_decode_turn(&self, seq: u64) {
        let mut turn = self.decode_turn.lock();
        while *turn != seq && !self.is_stopping() {
            self.decode_turn_cv.wait(&mut turn);
        }
    }

    fn finish_decode(&self) {
        {
            let mut turn = self.decode_turn.lock();
            *turn += 1;
        }
        self.decode_turn_cv.notify_all();
        self.active_decode_tasks.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: u8) -> CompressedFrame {
        CompressedFrame(vec![tag; 4])
    }

    fn queue_of(len: usize) -> VecDeque<CompressedFrame> {
        (0..len).map(|i| frame(i as u8)).collect()
    }

    #[test]
    fn test_thinning_removes_every_nth() {
        let mut queue = queue_of(20);
        let removed = thin_queue(&mut queue, 5, 8);
        assert_eq!(removed, 4);
        assert_eq!(queue.len(), 16);
        // Original positions 4, 9, 14, 19 are gone.
        let kept: Vec<u8> = queue.iter().map(|f| f.0[0]).collect();
        assert!(!kept.contains(&4));
        assert!(!kept.contains(&9));
        assert!(!kept.contains(&14));
        assert!(!kept.contains(&19));
        // Survivors keep their relative order.
        let mut sorted = kept.clone();
        sorted.sort_unstable();
        assert_eq!(kept, sorted);
    }

    #[test]
    fn test_thinning_respects_max_removed() {
        let mut queue = queue_of(200);
        let removed = thin_queue(&mut queue, THINNING_STRIDE, THINNING_MAX_REMOVED);
        assert_eq!(removed, THINNING_MAX_REMOVED);
        assert_eq!(queue.len(), 200 - THINNING_MAX_REMOVED);
    }

    #[test]
    fn test_thinning_short_queue_removes_nothing() {
        let mut queue = queue_of(3);
        let removed = thin_queue(&mut queue, 5, 8);
        assert_eq!(removed, 0);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_thinning_strictly_shrinks_iff_removed() {
        let mut queue = queue_of(200);
        let before = queue.len();
        let removed = thin_queue(&mut queue, THINNING_STRIDE, THINNING_MAX_REMOVED);
        queue.push_back(frame(255));
        if removed > 0 {
            assert!(queue.len() < before + 1);
        } else {
            assert_eq!(queue.len(), before + 1);
        }
        assert_eq!(queue.back().unwrap().0[0], 255);
    }
}
