//! Headless collaborator implementations
//!
//! Boards without a display, wake-word model or audio frontend run with
//! these. The audio device is a silent loopback so the pipelines still
//! cycle; the device controller persists levels but drives no hardware.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use sona_config::{DeviceLevels, SettingsStore};
use sona_core::{
    AudioDevice, AudioProcessor, CompressedFrame, DeviceControl, DeviceState, Notifier, Ota,
    PcmFrame, ProcessedAudioHook, Result, VadHook, VersionCheck, WakeWordDetector, WakeWordHook,
    FRAME_DURATION_MS, SAMPLE_RATE_HZ,
};

/// Silent capture, discarded playback. Read paces itself at the frame rate
/// so the capture loop does not spin.
pub struct NullAudioDevice {
    input_enabled: AtomicBool,
    output_enabled: AtomicBool,
}

impl NullAudioDevice {
    pub fn new() -> Self {
        Self {
            input_enabled: AtomicBool::new(true),
            output_enabled: AtomicBool::new(true),
        }
    }
}

impl AudioDevice for NullAudioDevice {
    fn input_sample_rate(&self) -> u32 {
        SAMPLE_RATE_HZ
    }

    fn output_sample_rate(&self) -> u32 {
        SAMPLE_RATE_HZ
    }

    fn input_channels(&self) -> u16 {
        1
    }

    fn input_enabled(&self) -> bool {
        self.input_enabled.load(Ordering::Acquire)
    }

    fn enable_input(&self, enabled: bool) {
        self.input_enabled.store(enabled, Ordering::Release);
    }

    fn output_enabled(&self) -> bool {
        self.output_enabled.load(Ordering::Acquire)
    }

    fn enable_output(&self, enabled: bool) {
        self.output_enabled.store(enabled, Ordering::Release);
    }

    fn set_output_volume(&self, volume: u8) {
        tracing::debug!(volume, "output volume set");
    }

    fn read(&self, samples: usize) -> Result<Vec<i16>> {
        let ms = samples as u64 * 1000 / SAMPLE_RATE_HZ as u64;
        std::thread::sleep(Duration::from_millis(ms.max(1)));
        Ok(vec![0i16; samples])
    }

    fn write(&self, frame: &PcmFrame) -> Result<()> {
        let ms = frame.len() as u64 * 1000 / SAMPLE_RATE_HZ as u64;
        std::thread::sleep(Duration::from_millis(ms.max(1)));
        Ok(())
    }
}

/// Frontend stand-in that forwards capture frames unprocessed.
pub struct NoAudioProcessor {
    running: AtomicBool,
    output_hook: Mutex<Option<ProcessedAudioHook>>,
    vad_hook: Mutex<Option<VadHook>>,
}

impl NoAudioProcessor {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            output_hook: Mutex::new(None),
            vad_hook: Mutex::new(None),
        }
    }
}

impl AudioProcessor for NoAudioProcessor {
    fn start(&self) {
        self.running.store(true, Ordering::Release);
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn feed_size(&self) -> usize {
        (SAMPLE_RATE_HZ as usize * FRAME_DURATION_MS as usize) / 1000
    }

    fn feed(&self, pcm: &[i16]) {
        if !self.is_running() {
            return;
        }
        if let Some(hook) = self.output_hook.lock().as_ref() {
            hook(pcm.to_vec());
        }
    }

    fn set_device_aec(&self, enabled: bool) {
        tracing::debug!(enabled, "device AEC toggled (no-op frontend)");
    }

    fn set_output_hook(&self, hook: ProcessedAudioHook) {
        *self.output_hook.lock() = Some(hook);
    }

    fn set_vad_hook(&self, hook: VadHook) {
        *self.vad_hook.lock() = Some(hook);
    }
}

/// Detector stand-in for boards without a wake-word model.
pub struct NoWakeWord {
    running: AtomicBool,
    hook: Mutex<Option<WakeWordHook>>,
}

impl NoWakeWord {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            hook: Mutex::new(None),
        }
    }
}

impl WakeWordDetector for NoWakeWord {
    fn start(&self) {
        self.running.store(true, Ordering::Release);
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    fn is_running(&self) -> bool {
        // Never consumes capture; the frontend gets the audio instead.
        false
    }

    fn feed_size(&self) -> usize {
        0
    }

    fn feed(&self, _pcm: &[i16]) {}

    fn set_detection_hook(&self, hook: WakeWordHook) {
        *self.hook.lock() = Some(hook);
    }

    fn wake_frames(&self) -> Vec<CompressedFrame> {
        Vec::new()
    }
}

/// Logs everything a display or LED ring would show.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn set_status(&self, status: &str) {
        tracing::info!(status, "ui status");
    }

    fn set_emotion(&self, emotion: &str) {
        tracing::debug!(emotion, "ui emotion");
    }

    fn set_chat_message(&self, role: &str, message: &str) {
        if !message.is_empty() {
            tracing::info!(role, message, "chat");
        }
    }

    fn show_notification(&self, message: &str) {
        tracing::info!(message, "notification");
    }

    fn on_state_changed(&self, state: DeviceState) {
        tracing::debug!(%state, "led state");
    }

    fn alert(&self, status: &str, message: &str, emotion: &str) {
        tracing::warn!(status, message, emotion, "ui alert");
    }
}

/// Persists levels through the settings store; drives no hardware.
pub struct HeadlessDeviceControl {
    store: Arc<dyn SettingsStore>,
    levels: Mutex<DeviceLevels>,
}

impl HeadlessDeviceControl {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        let levels = DeviceLevels::load(store.as_ref());
        Self {
            store,
            levels: Mutex::new(levels),
        }
    }

    fn update(&self, apply: impl FnOnce(&mut DeviceLevels)) {
        let mut levels = self.levels.lock();
        apply(&mut levels);
        levels.save(self.store.as_ref());
    }
}

impl DeviceControl for HeadlessDeviceControl {
    fn set_volume(&self, level: u8) {
        let level = DeviceLevels::clamp_volume(level);
        tracing::info!(level, "volume");
        self.update(|l| l.volume = level);
    }

    fn set_vibration_level(&self, level: u8) {
        let level = DeviceLevels::clamp_level(level);
        tracing::info!(level, "vibration level");
        self.update(|l| l.rock = level);
    }

    fn set_suck_level(&self, level: u8) {
        let level = DeviceLevels::clamp_level(level);
        tracing::info!(level, "suck level");
        self.update(|l| l.suck = level);
    }

    fn set_heater_level(&self, level: u8) {
        let level = DeviceLevels::clamp_level(level);
        tracing::info!(level, "heater level");
        self.update(|l| l.heater = level);
    }

    fn stop_all(&self) {
        tracing::info!("all actuators stopped");
    }

    fn invoke(&self, command: &serde_json::Value) {
        tracing::info!(%command, "device command");
    }

    fn states(&self) -> serde_json::Value {
        let levels = *self.levels.lock();
        serde_json::json!({
            "rock_level": levels.rock,
            "suck_level": levels.suck,
            "heater_level": levels.heater,
            "volume_level": levels.volume,
        })
    }

    fn shutdown(&self) {
        tracing::info!("shutdown requested");
        self.stop_all();
        std::process::exit(0);
    }

    fn reboot(&self) {
        tracing::info!("reboot requested");
        std::process::exit(0);
    }
}

/// OTA stand-in when no update endpoint is provisioned.
pub struct NoOta;

impl Ota for NoOta {
    fn current_version(&self) -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }

    fn check(&self) -> Result<VersionCheck> {
        Ok(VersionCheck {
            new_version: None,
            has_server_time: false,
        })
    }

    fn mark_valid(&self) {}

    fn upgrade(&self, _on_progress: &mut dyn FnMut(u8)) -> Result<()> {
        Err(sona_core::Error::Upgrade("no update endpoint".into()))
    }
}
