//! Audio frame types and fixed session parameters
//!
//! All compressed audio in a session uses a fixed 16 kHz mono stream cut into
//! 60 ms frames. PCM frames are at the output device's native rate.

/// Session sample rate for capture and compressed audio.
pub const SAMPLE_RATE_HZ: u32 = 16_000;

/// Duration of one audio frame, compressed or PCM.
pub const FRAME_DURATION_MS: u32 = 60;

/// Mono samples in one frame at the session rate.
pub const SAMPLES_PER_FRAME: usize = (SAMPLE_RATE_HZ as usize * FRAME_DURATION_MS as usize) / 1000;

/// Capacity of the inbound compressed-frame queue.
pub const MAX_INBOUND_FRAMES: usize = 200;

/// Capacity of the outbound send queue.
pub const MAX_OUTBOUND_PACKETS: usize = 200;

/// Hard capacity of the PCM playback queue.
pub const PLAYBACK_HARD_LIMIT: usize = 3;

/// Decode pauses when the playback queue reaches this depth.
pub const PLAYBACK_HIGH_WATERMARK: usize = 2;

/// Decode resumes when the playback queue falls back to this depth.
pub const PLAYBACK_LOW_WATERMARK: usize = 1;

/// Upper bound on decode jobs enqueued or executing at once.
pub const MAX_CONCURRENT_DECODES: usize = 4;

/// Pending playback timestamps kept for server-side AEC pairing.
pub const MAX_PENDING_TIMESTAMPS: usize = 3;

/// Admission thinning removes every `THINNING_STRIDE`-th frame.
pub const THINNING_STRIDE: usize = 5;

/// Admission thinning removes at most this many frames per overflow.
pub const THINNING_MAX_REMOVED: usize = 8;

/// Cap on the audio-testing recording.
pub const AUDIO_TESTING_MAX_DURATION_MS: u32 = 10_000;

/// One opaque compressed audio frame. No header; decode parameters are fixed
/// per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedFrame(pub Vec<u8>);

impl CompressedFrame {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for CompressedFrame {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// One frame of signed 16-bit mono PCM at the output device's native rate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmFrame(pub Vec<i16>);

impl PcmFrame {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<i16>> for PcmFrame {
    fn from(samples: Vec<i16>) -> Self {
        Self(samples)
    }
}

/// A compressed frame ready for transmission.
///
/// The timestamp is present only when server-side AEC needs the playback
/// reference time; it advances monotonically within a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPacket {
    pub payload: Vec<u8>,
    pub timestamp: Option<u32>,
}

impl OutboundPacket {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            timestamp: None,
        }
    }

    pub fn with_timestamp(payload: Vec<u8>, timestamp: u32) -> Self {
        Self {
            payload,
            timestamp: Some(timestamp),
        }
    }
}
