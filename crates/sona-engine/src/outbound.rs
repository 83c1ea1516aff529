//! Outbound audio pipeline
//!
//! A dedicated loop pulls capture frames, resamples them to the session rate
//! and routes each to exactly one consumer: the audio-testing buffer, the
//! wake-word detector or the audio frontend. Processed frames are encoded on
//! the worker pool and queued for the session loop to publish.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use sona_core::{
    AecMode, DeviceState, Error, OutboundPacket, Result, AUDIO_TESTING_MAX_DURATION_MS,
    FRAME_DURATION_MS, MAX_OUTBOUND_PACKETS, MAX_PENDING_TIMESTAMPS, SAMPLES_PER_FRAME,
    SAMPLE_RATE_HZ,
};

use crate::events::SEND_AUDIO;
use crate::session::Session;

/// Outcome of pairing a packet with a playback timestamp.
pub(crate) enum TimestampPairing {
    /// Attach this timestamp (0 when none was pending).
    Attach(u32),
    /// The pending queue drifted too far; drop the packet.
    DropPacket,
}

/// Pop the head timestamp for an encoded packet. When the pending queue has
/// drifted past its depth bound the packet is sacrificed to re-bound it.
pub(crate) fn pair_timestamp(pending: &mut VecDeque<u32>) -> TimestampPairing {
    let timestamp = pending.pop_front().unwrap_or(0);
    if pending.len() > MAX_PENDING_TIMESTAMPS {
        pending.pop_front();
        return TimestampPairing::DropPacket;
    }
    TimestampPairing::Attach(timestamp)
}

impl Session {
    /// One pass of the capture/dispatch loop. Returns false when no consumer
    /// took audio, so the caller sleeps instead of spinning.
    pub(crate) fn capture_tick(self: &Arc<Self>) -> bool {
        if self.state.load() == DeviceState::AudioTesting {
            return self.capture_testing_tick();
        }

        if self.wake_word.is_running() {
            let mono_samples = self.wake_word.feed_size();
            if mono_samples > 0 {
                if !self.device.input_enabled() {
                    self.device.enable_input(true);
                }
                if let Ok(data) = self.read_audio(mono_samples) {
                    let channels = self.device.input_channels() as usize;
                    if channels > 1 {
                        // Pick the mic channel out of the interleaved data.
                        let mono: Vec<i16> =
                            data.iter().step_by(channels).copied().take(mono_samples).collect();
                        self.wake_word.feed(&mono);
                    } else {
                        self.wake_word.feed(&data);
                    }
                    return true;
                }
            }
        }

        if self.processor.is_running() {
            let samples = self.processor.feed_size();
            if samples > 0 {
                if let Ok(data) = self.read_audio(samples) {
                    self.processor.feed(&data);
                    return true;
                }
            }
        }

        false
    }

    fn capture_testing_tick(self: &Arc<Self>) -> bool {
        let capacity = (AUDIO_TESTING_MAX_DURATION_MS / FRAME_DURATION_MS) as usize;
        if self.shared.lock().testing.len() >= capacity {
            let session = Arc::clone(self);
            self.schedule(move || {
                if session.state.load() == DeviceState::AudioTesting {
                    session.exit_audio_testing();
                }
            });
            return false;
        }

        let Ok(data) = self.read_audio(SAMPLES_PER_FRAME) else {
            return false;
        };
        let channels = self.device.input_channels() as usize;
        let mono: Vec<i16> = if channels > 1 {
            data.iter().step_by(channels).copied().take(SAMPLES_PER_FRAME).collect()
        } else {
            data
        };

        let session = Arc::clone(self);
        self.worker.schedule(move || {
            let encoded = match session.encoder.lock().encode(&mono) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!("testing encode failed: {e}");
                    return;
                }
            };
            session.shared.lock().testing.push(encoded.into());
        });
        true
    }

    /// Read `mono_samples` worth of capture audio at the session rate,
    /// keeping the device's channel interleaving. Stereo capture carries an
    /// AEC reference channel; both are resampled independently.
    pub(crate) fn read_audio(&self, mono_samples: usize) -> Result<Vec<i16>> {
        if !self.device.input_enabled() {
            return Err(Error::Device("input disabled".into()));
        }

        let input_rate = self.device.input_sample_rate();
        let channels = self.device.input_channels() as usize;

        if input_rate == SAMPLE_RATE_HZ {
            return self.device.read(mono_samples * channels.max(1));
        }

        let device_samples =
            mono_samples * input_rate as usize / SAMPLE_RATE_HZ as usize * channels.max(1);
        let data = self.device.read(device_samples)?;

        if channels == 2 {
            let mut mic = Vec::with_capacity(data.len() / 2);
            let mut reference = Vec::with_capacity(data.len() / 2);
            for pair in data.chunks_exact(2) {
                mic.push(pair[0]);
                reference.push(pair[1]);
            }

            let mic = self.input_resampler.process(&mic);
            let reference = self.reference_resampler.process(&reference);

            let mut interleaved = Vec::with_capacity(mic.len() * 2);
            for (m, r) in mic.iter().zip(reference.iter()) {
                interleaved.push(*m);
                interleaved.push(*r);
            }
            Ok(interleaved)
        } else {
            Ok(self.input_resampler.process(&data))
        }
    }

    /// Processed-capture callback: hand the frame to the worker pool for
    /// encoding. Runs on the frontend's thread; must not block on anything
    /// but the pool's own flow control.
    pub(crate) fn on_processed_audio(self: &Arc<Self>, pcm: Vec<i16>) {
        let session = Arc::clone(self);
        self.worker.schedule(move || session.encode_outbound(pcm));
    }

    /// Encode one frame and queue it for transmission.
    pub(crate) fn encode_outbound(&self, pcm: Vec<i16>) {
        let payload = match self.encoder.lock().encode(&pcm) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("dropping capture frame: {e}");
                return;
            }
        };

        let timestamp = if self.aec_mode.load() == AecMode::OnServer {
            match pair_timestamp(&mut self.timestamps.lock()) {
                TimestampPairing::Attach(t) => Some(t),
                TimestampPairing::DropPacket => {
                    tracing::debug!("timestamp drift bound hit, packet dropped");
                    return;
                }
            }
        } else {
            None
        };

        {
            let mut shared = self.shared.lock();
            if shared.outbound.len() >= MAX_OUTBOUND_PACKETS {
                shared.outbound.pop_front();
                self.drops.overflow.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("send queue full, oldest packet dropped");
            }
            shared.outbound.push_back(OutboundPacket { payload, timestamp });
        }
        self.events.set(SEND_AUDIO);
    }
}
