//! Core types and collaborator contracts for the Sona voice appliance
//!
//! This crate provides the foundational pieces shared by every other crate:
//! - Device/session state enums and their atomic cells
//! - Audio frame and packet types with the fixed session parameters
//! - Error types
//! - Traits for the external collaborators (audio hardware, codec, audio
//!   frontend, wake word, UI notifier, device actuators, OTA, transport)

pub mod audio;
pub mod codec;
pub mod device;
pub mod error;
pub mod state;
pub mod transport;

pub use audio::{
    CompressedFrame, OutboundPacket, PcmFrame, AUDIO_TESTING_MAX_DURATION_MS, FRAME_DURATION_MS,
    MAX_CONCURRENT_DECODES, MAX_INBOUND_FRAMES, MAX_OUTBOUND_PACKETS, MAX_PENDING_TIMESTAMPS,
    PLAYBACK_HARD_LIMIT, PLAYBACK_HIGH_WATERMARK, PLAYBACK_LOW_WATERMARK, SAMPLE_RATE_HZ,
    SAMPLES_PER_FRAME, THINNING_MAX_REMOVED, THINNING_STRIDE,
};
pub use codec::{FrameDecoder, FrameEncoder};
pub use device::{
    AudioDevice, AudioProcessor, DeviceControl, Notifier, Ota, ProcessedAudioHook, VadHook,
    VersionCheck, WakeWordDetector, WakeWordHook,
};
pub use error::{Error, Result};
pub use state::{AbortReason, AecMode, DeviceState, ListeningMode};
pub use transport::{Transport, TransportHooks};
