//! Collaborator contracts
//!
//! The session orchestrates these by interface only; board support packages
//! provide the real implementations. Callbacks installed on the audio
//! frontend and wake-word detector must be cheap: they run on the
//! collaborator's thread and may only enqueue work.

use crate::audio::{CompressedFrame, PcmFrame};
use crate::error::Result;
use crate::state::DeviceState;

/// Processed-capture callback: one 16 kHz mono frame ready for encoding.
pub type ProcessedAudioHook = Box<dyn Fn(Vec<i16>) + Send + Sync>;

/// Local voice-activity callback (speaking / not speaking).
pub type VadHook = Box<dyn Fn(bool) + Send + Sync>;

/// Wake-word detection callback with the detected word.
pub type WakeWordHook = Box<dyn Fn(&str) + Send + Sync>;

/// PCM capture and playback hardware.
///
/// `read` blocks until the requested number of raw device samples is
/// available; `write` blocks until the frame has been handed to the output
/// stage. The output side is owned exclusively by the playback task.
pub trait AudioDevice: Send + Sync {
    fn input_sample_rate(&self) -> u32;
    fn output_sample_rate(&self) -> u32;
    /// 1 for plain capture, 2 when a loopback reference channel is
    /// interleaved for device-side AEC.
    fn input_channels(&self) -> u16;

    fn input_enabled(&self) -> bool;
    fn enable_input(&self, enabled: bool);
    fn output_enabled(&self) -> bool;
    fn enable_output(&self, enabled: bool);
    fn set_output_volume(&self, volume: u8);

    /// Read `samples` raw device samples (interleaved when stereo).
    fn read(&self, samples: usize) -> Result<Vec<i16>>;
    /// Write one PCM frame to the output device.
    fn write(&self, frame: &PcmFrame) -> Result<()>;
}

/// Voice frontend: noise suppression, optional device-side AEC, local VAD.
pub trait AudioProcessor: Send + Sync {
    fn start(&self);
    fn stop(&self);
    fn is_running(&self) -> bool;

    /// Mono samples expected per `feed` call.
    fn feed_size(&self) -> usize;
    fn feed(&self, pcm: &[i16]);

    fn set_device_aec(&self, enabled: bool);
    fn set_output_hook(&self, hook: ProcessedAudioHook);
    fn set_vad_hook(&self, hook: VadHook);
}

/// Wake-word detector.
pub trait WakeWordDetector: Send + Sync {
    fn start(&self);
    fn stop(&self);
    fn is_running(&self) -> bool;

    /// Mono samples expected per `feed` call.
    fn feed_size(&self) -> usize;
    fn feed(&self, pcm: &[i16]);

    fn set_detection_hook(&self, hook: WakeWordHook);

    /// Compressed frames of the wake utterance, for forwarding upstream.
    fn wake_frames(&self) -> Vec<CompressedFrame>;
}

/// Display / LED surface. Implementations must not block.
pub trait Notifier: Send + Sync {
    fn set_status(&self, status: &str);
    fn set_emotion(&self, emotion: &str);
    fn set_chat_message(&self, role: &str, message: &str);
    fn show_notification(&self, message: &str);
    fn on_state_changed(&self, state: DeviceState);
    fn alert(&self, status: &str, message: &str, emotion: &str);
}

/// Board actuators and power control.
pub trait DeviceControl: Send + Sync {
    fn set_volume(&self, level: u8);
    fn set_vibration_level(&self, level: u8);
    fn set_suck_level(&self, level: u8);
    fn set_heater_level(&self, level: u8);
    fn stop_all(&self);

    /// Execute one device command delivered over the control channel.
    fn invoke(&self, command: &serde_json::Value);

    /// Current actuator states for the periodic status publish.
    fn states(&self) -> serde_json::Value;

    fn shutdown(&self);
    fn reboot(&self);
}

/// Result of one version check.
#[derive(Debug, Clone)]
pub struct VersionCheck {
    pub new_version: Option<String>,
    pub has_server_time: bool,
}

/// Firmware update backend.
pub trait Ota: Send + Sync {
    fn current_version(&self) -> String;

    /// One round-trip to the update server.
    fn check(&self) -> Result<VersionCheck>;

    /// Mark the running firmware as good so the bootloader keeps it.
    fn mark_valid(&self);

    /// Download and flash. Returns only on failure; success reboots the
    /// device from inside the routine.
    fn upgrade(&self, on_progress: &mut dyn FnMut(u8)) -> Result<()>;
}
