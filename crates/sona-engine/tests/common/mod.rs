//! Mock collaborators for engine integration tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use sona_core::{
    AbortReason, AecMode, AudioDevice, AudioProcessor, CompressedFrame, DeviceControl,
    DeviceState, FrameDecoder, FrameEncoder, Notifier, Ota, OutboundPacket, PcmFrame,
    ProcessedAudioHook, Result, Transport, TransportHooks, VadHook, VersionCheck,
    WakeWordDetector, WakeWordHook, SAMPLES_PER_FRAME, SAMPLE_RATE_HZ,
};
use sona_engine::{Collaborators, Session, SessionConfig};

// ----------------------------------------------------------------------
// Transport

pub struct MockTransport {
    open: AtomicBool,
    pub fail_open: AtomicBool,
    pub sent_audio: Mutex<Vec<OutboundPacket>>,
    pub sent_texts: Mutex<Vec<String>>,
    pub aborts: Mutex<Vec<AbortReason>>,
    pub reply_finishes: Mutex<usize>,
    pub wake_words: Mutex<Vec<String>>,
    pub languages: Mutex<Vec<String>>,
    hooks: Mutex<Arc<TransportHooks>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            open: AtomicBool::new(false),
            fail_open: AtomicBool::new(false),
            sent_audio: Mutex::new(Vec::new()),
            sent_texts: Mutex::new(Vec::new()),
            aborts: Mutex::new(Vec::new()),
            reply_finishes: Mutex::new(0),
            wake_words: Mutex::new(Vec::new()),
            languages: Mutex::new(Vec::new()),
            hooks: Mutex::new(Arc::new(TransportHooks::noop())),
        })
    }

    fn hooks(&self) -> Arc<TransportHooks> {
        self.hooks.lock().clone()
    }

    pub fn fire_json(&self, value: serde_json::Value) {
        (self.hooks().on_incoming_json)(value);
    }

    pub fn fire_audio(&self, frame: CompressedFrame) {
        (self.hooks().on_incoming_audio)(frame);
    }

    pub fn fire_server_vad(&self) {
        (self.hooks().on_server_vad)();
    }

    pub fn fire_network_error(&self, message: &str) {
        (self.hooks().on_network_error)(message.to_string());
    }
}

impl Transport for MockTransport {
    fn install_hooks(&self, hooks: TransportHooks) {
        *self.hooks.lock() = Arc::new(hooks);
    }

    fn start(&self) -> Result<()> {
        Ok(())
    }

    fn open_audio_channel(&self) -> Result<()> {
        if self.fail_open.load(Ordering::Acquire) {
            return Err(sona_core::Error::TransportUnavailable("mock open failure".into()));
        }
        self.open.store(true, Ordering::Release);
        let hooks = self.hooks();
        (hooks.on_audio_channel_opened)();
        Ok(())
    }

    fn close_audio_channel(&self) {
        self.open.store(false, Ordering::Release);
        let hooks = self.hooks();
        (hooks.on_audio_channel_closed)();
    }

    fn is_audio_channel_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn send_audio(&self, packet: &OutboundPacket) -> Result<()> {
        self.sent_audio.lock().push(packet.clone());
        Ok(())
    }

    fn send_text(&self, text: &str) -> Result<()> {
        self.sent_texts.lock().push(text.to_string());
        Ok(())
    }

    fn send_abort(&self, reason: AbortReason) -> Result<()> {
        self.aborts.lock().push(reason);
        Ok(())
    }

    fn send_reply_finished(&self) -> Result<()> {
        *self.reply_finishes.lock() += 1;
        Ok(())
    }

    fn send_wake_word_detected(&self, wake_word: &str) -> Result<()> {
        self.wake_words.lock().push(wake_word.to_string());
        Ok(())
    }

    fn send_mcp(&self, _payload: &str) -> Result<()> {
        Ok(())
    }

    fn update_language(&self, language: &str) {
        self.languages.lock().push(language.to_string());
    }
}

// ----------------------------------------------------------------------
// Audio device

pub struct MockDevice {
    input_enabled: AtomicBool,
    output_enabled: AtomicBool,
    /// When set, enable_output(true) is ignored so decode stays frozen.
    pub output_locked: AtomicBool,
    pub write_delay: Duration,
    pub written: Mutex<Vec<PcmFrame>>,
}

impl MockDevice {
    pub fn new(write_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            input_enabled: AtomicBool::new(true),
            output_enabled: AtomicBool::new(true),
            output_locked: AtomicBool::new(false),
            write_delay,
            written: Mutex::new(Vec::new()),
        })
    }

    pub fn written_count(&self) -> usize {
        self.written.lock().len()
    }

    /// First sample of each written frame; decode tags end up here.
    pub fn written_tags(&self) -> Vec<i16> {
        self.written
            .lock()
            .iter()
            .map(|f| f.0.first().copied().unwrap_or(0))
            .collect()
    }
}

impl AudioDevice for MockDevice {
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
        if enabled && self.output_locked.load(Ordering::Acquire) {
            return;
        }
        self.output_enabled.store(enabled, Ordering::Release);
    }

    fn set_output_volume(&self, _volume: u8) {}

    fn read(&self, samples: usize) -> Result<Vec<i16>> {
        let ms = samples as u64 * 1000 / SAMPLE_RATE_HZ as u64;
        std::thread::sleep(Duration::from_millis(ms.clamp(1, 100)));
        Ok(vec![0i16; samples])
    }

    fn write(&self, frame: &PcmFrame) -> Result<()> {
        std::thread::sleep(self.write_delay);
        self.written.lock().push(frame.clone());
        Ok(())
    }
}

// ----------------------------------------------------------------------
// Frontend and wake word

pub struct MockProcessor {
    running: AtomicBool,
    output_hook: Mutex<Option<ProcessedAudioHook>>,
    vad_hook: Mutex<Option<VadHook>>,
}

impl MockProcessor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            running: AtomicBool::new(false),
            output_hook: Mutex::new(None),
            vad_hook: Mutex::new(None),
        })
    }

    /// Push one processed frame through the encode path.
    pub fn emit_frame(&self) {
        if let Some(hook) = self.output_hook.lock().as_ref() {
            hook(vec![0i16; SAMPLES_PER_FRAME]);
        }
    }

    pub fn emit_vad(&self, speaking: bool) {
        if let Some(hook) = self.vad_hook.lock().as_ref() {
            hook(speaking);
        }
    }
}

impl AudioProcessor for MockProcessor {
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
        SAMPLES_PER_FRAME
    }

    fn feed(&self, pcm: &[i16]) {
        if self.is_running() {
            if let Some(hook) = self.output_hook.lock().as_ref() {
                hook(pcm.to_vec());
            }
        }
    }

    fn set_device_aec(&self, _enabled: bool) {}

    fn set_output_hook(&self, hook: ProcessedAudioHook) {
        *self.output_hook.lock() = Some(hook);
    }

    fn set_vad_hook(&self, hook: VadHook) {
        *self.vad_hook.lock() = Some(hook);
    }
}

pub struct MockWakeWord {
    running: AtomicBool,
    hook: Mutex<Option<WakeWordHook>>,
}

impl MockWakeWord {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            running: AtomicBool::new(false),
            hook: Mutex::new(None),
        })
    }

    pub fn trigger(&self, word: &str) {
        let hook = self.hook.lock();
        if let Some(hook) = hook.as_ref() {
            hook(word);
        }
    }
}

impl WakeWordDetector for MockWakeWord {
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
        SAMPLES_PER_FRAME
    }

    fn feed(&self, _pcm: &[i16]) {}

    fn set_detection_hook(&self, hook: WakeWordHook) {
        *self.hook.lock() = Some(hook);
    }

    fn wake_frames(&self) -> Vec<CompressedFrame> {
        vec![CompressedFrame(vec![0xAB; 60])]
    }
}

// ----------------------------------------------------------------------
// Notifier, actuators, OTA

#[derive(Default)]
pub struct MockNotifier {
    pub statuses: Mutex<Vec<String>>,
    pub alerts: Mutex<Vec<(String, String)>>,
    pub state_changes: Mutex<Vec<DeviceState>>,
}

impl MockNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl Notifier for MockNotifier {
    fn set_status(&self, status: &str) {
        self.statuses.lock().push(status.to_string());
    }

    fn set_emotion(&self, _emotion: &str) {}

    fn set_chat_message(&self, _role: &str, _message: &str) {}

    fn show_notification(&self, _message: &str) {}

    fn on_state_changed(&self, state: DeviceState) {
        self.state_changes.lock().push(state);
    }

    fn alert(&self, status: &str, message: &str, _emotion: &str) {
        self.alerts.lock().push((status.to_string(), message.to_string()));
    }
}

#[derive(Default)]
pub struct MockControl {
    pub volume: Mutex<Vec<u8>>,
    pub suck: Mutex<Vec<u8>>,
    pub vibration: Mutex<Vec<u8>>,
    pub heater: Mutex<Vec<u8>>,
    pub invocations: Mutex<Vec<serde_json::Value>>,
}

impl MockControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl DeviceControl for MockControl {
    fn set_volume(&self, level: u8) {
        self.volume.lock().push(level);
    }

    fn set_vibration_level(&self, level: u8) {
        self.vibration.lock().push(level);
    }

    fn set_suck_level(&self, level: u8) {
        self.suck.lock().push(level);
    }

    fn set_heater_level(&self, level: u8) {
        self.heater.lock().push(level);
    }

    fn stop_all(&self) {}

    fn invoke(&self, command: &serde_json::Value) {
        self.invocations.lock().push(command.clone());
    }

    fn states(&self) -> serde_json::Value {
        serde_json::json!({"volume_level": 80})
    }

    fn shutdown(&self) {}

    fn reboot(&self) {}
}

pub struct MockOta;

impl Ota for MockOta {
    fn current_version(&self) -> String {
        "0.0.0-test".into()
    }

    fn check(&self) -> Result<VersionCheck> {
        Ok(VersionCheck {
            new_version: None,
            has_server_time: true,
        })
    }

    fn mark_valid(&self) {}

    fn upgrade(&self, _on_progress: &mut dyn FnMut(u8)) -> Result<()> {
        Err(sona_core::Error::Upgrade("mock".into()))
    }
}

// ----------------------------------------------------------------------
// Test codec

/// Decoder that tags PCM output with the frame's first payload byte.
pub struct TestDecoder {
    pub delay: Duration,
}

impl FrameDecoder for TestDecoder {
    fn decode(&mut self, frame: &[u8]) -> Result<Vec<i16>> {
        std::thread::sleep(self.delay);
        let tag = frame.first().copied().unwrap_or(0) as i16;
        Ok(vec![tag; SAMPLES_PER_FRAME])
    }

    fn reset(&mut self) {}

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE_HZ
    }
}

pub struct TestEncoder;

impl FrameEncoder for TestEncoder {
    fn encode(&mut self, _pcm: &[i16]) -> Result<Vec<u8>> {
        Ok(vec![0u8; 60])
    }

    fn reset(&mut self) {}

    fn set_complexity(&mut self, _complexity: u8) -> Result<()> {
        Ok(())
    }
}

// ----------------------------------------------------------------------
// Harness

pub struct Harness {
    pub session: Arc<Session>,
    pub transport: Arc<MockTransport>,
    pub device: Arc<MockDevice>,
    pub processor: Arc<MockProcessor>,
    pub wake: Arc<MockWakeWord>,
    pub notifier: Arc<MockNotifier>,
    pub control: Arc<MockControl>,
}

impl Harness {
    pub fn shutdown(&self) {
        self.session.shutdown();
    }

    pub fn frame(&self, tag: u8) -> CompressedFrame {
        CompressedFrame(vec![tag; 60])
    }

    /// Drive the device into Speaking via a tts:start control message.
    pub fn begin_speaking(&self) {
        self.transport
            .fire_json(serde_json::json!({"type": "tts", "state": "start"}));
        assert!(
            wait_until(Duration::from_secs(2), || {
                self.session.state() == DeviceState::Speaking
            }),
            "device did not reach Speaking"
        );
    }
}

pub fn build_harness(aec_mode: AecMode, decode_delay: Duration, write_delay: Duration) -> Harness {
    let transport = MockTransport::new();
    let device = MockDevice::new(write_delay);
    let processor = MockProcessor::new();
    let wake = MockWakeWord::new();
    let notifier = MockNotifier::new();
    let control = MockControl::new();

    let session = Session::new(
        SessionConfig {
            aec_mode,
            encoder_complexity: 5,
            worker_threads: 2,
        },
        Collaborators {
            transport: transport.clone(),
            device: device.clone(),
            processor: processor.clone(),
            wake_word: wake.clone(),
            notifier: notifier.clone(),
            device_control: control.clone(),
            ota: Arc::new(MockOta),
        },
        Box::new(TestEncoder),
        Box::new(TestDecoder { delay: decode_delay }),
    );

    transport.install_hooks(session.transport_hooks());
    session.start().expect("session start failed");

    let harness = Harness {
        session,
        transport,
        device,
        processor,
        wake,
        notifier,
        control,
    };

    assert!(
        wait_until(Duration::from_secs(2), || {
            harness.session.state() == DeviceState::Idle
        }),
        "device did not reach Idle after startup"
    );
    harness
}

pub fn build_default_harness() -> Harness {
    build_harness(
        AecMode::Off,
        Duration::from_millis(2),
        Duration::from_millis(5),
    )
}

/// Poll `condition` until it holds or the timeout elapses.
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
