//! Session state machine
//!
//! The session owns every queue, the worker pool and the codec objects, and
//! is the single mutator of the device state. All user/event entry points
//! enqueue closures onto the session loop; the loop also drains the outbound
//! send queue. Collaborators call back through weak references only.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use sona_codec::Resampler;
use sona_core::state::{AtomicAecMode, AtomicDeviceState, AtomicListeningMode};
use sona_core::{
    AbortReason, AecMode, AudioDevice, AudioProcessor, CompressedFrame, DeviceControl,
    DeviceState, FrameDecoder, FrameEncoder, ListeningMode, Notifier, Ota, OutboundPacket,
    PcmFrame, Transport, TransportHooks, WakeWordDetector, SAMPLE_RATE_HZ,
};

use crate::events::{EventBits, SCHEDULE, SEND_AUDIO, STOP};
use crate::inbound::DropCounters;
use crate::worker::WorkerPool;

/// Output is disabled after this much silence in Idle.
const IDLE_OUTPUT_TIMEOUT: Duration = Duration::from_secs(10);

/// Grace period for the output device buffer to empty on Speaking → Listening.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(120);

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub aec_mode: AecMode,
    /// Encoder complexity used when no AEC constraint applies.
    pub encoder_complexity: u8,
    pub worker_threads: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            aec_mode: AecMode::Off,
            encoder_complexity: 5,
            worker_threads: 2,
        }
    }
}

/// External collaborators, injected at construction.
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub device: Arc<dyn AudioDevice>,
    pub processor: Arc<dyn AudioProcessor>,
    pub wake_word: Arc<dyn WakeWordDetector>,
    pub notifier: Arc<dyn Notifier>,
    pub device_control: Arc<dyn DeviceControl>,
    pub ota: Arc<dyn Ota>,
}

/// State guarded by the primary session mutex.
pub(crate) struct Shared {
    pub inbound: VecDeque<CompressedFrame>,
    pub outbound: VecDeque<OutboundPacket>,
    pub tasks: Vec<Box<dyn FnOnce() + Send>>,
    /// Recording accumulated in audio-testing mode.
    pub testing: Vec<CompressedFrame>,
    /// Locally injected prompt frames still in `inbound`; these play outside
    /// a Speaking session.
    pub local_frames: usize,
}

pub struct Session {
    pub(crate) config: SessionConfig,

    pub(crate) state: AtomicDeviceState,
    pub(crate) listening_mode: AtomicListeningMode,
    pub(crate) aec_mode: AtomicAecMode,
    pub(crate) aborted: AtomicBool,
    pub(crate) voice_detected: AtomicBool,
    pub(crate) has_server_time: AtomicBool,
    pub(crate) playback_backpressure: AtomicBool,
    pub(crate) active_decode_tasks: AtomicUsize,
    pub(crate) stopping: AtomicBool,

    pub(crate) events: EventBits,

    pub(crate) shared: Mutex<Shared>,
    /// Signaled when `inbound` drains; prompt playback waits on it.
    pub(crate) decode_cv: Condvar,

    pub(crate) playback: Mutex<VecDeque<PcmFrame>>,
    pub(crate) playback_cv: Condvar,

    pub(crate) timestamps: Mutex<VecDeque<u32>>,

    /// Per-stream decode ordering: submission sequence and completion turn.
    pub(crate) decode_seq: AtomicU64,
    pub(crate) decode_turn: Mutex<u64>,
    pub(crate) decode_turn_cv: Condvar,

    pub(crate) drops: DropCounters,

    pub(crate) started_at: Instant,
    pub(crate) last_output: Mutex<Instant>,

    pub(crate) worker: WorkerPool,

    pub(crate) encoder: Mutex<Box<dyn FrameEncoder>>,
    pub(crate) decoder: Mutex<Box<dyn FrameDecoder>>,
    pub(crate) input_resampler: Resampler,
    pub(crate) reference_resampler: Resampler,
    pub(crate) output_resampler: Resampler,

    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) device: Arc<dyn AudioDevice>,
    pub(crate) processor: Arc<dyn AudioProcessor>,
    pub(crate) wake_word: Arc<dyn WakeWordDetector>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) device_control: Arc<dyn DeviceControl>,
    pub(crate) ota: Arc<dyn Ota>,

    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        collaborators: Collaborators,
        encoder: Box<dyn FrameEncoder>,
        decoder: Box<dyn FrameDecoder>,
    ) -> Arc<Self> {
        let Collaborators {
            transport,
            device,
            processor,
            wake_word,
            notifier,
            device_control,
            ota,
        } = collaborators;

        let input_rate = device.input_sample_rate();
        let output_rate = device.output_sample_rate();

        Arc::new(Self {
            state: AtomicDeviceState::new(DeviceState::Unknown),
            listening_mode: AtomicListeningMode::new(ListeningMode::AutoStop),
            aec_mode: AtomicAecMode::new(config.aec_mode),
            aborted: AtomicBool::new(false),
            voice_detected: AtomicBool::new(false),
            has_server_time: AtomicBool::new(false),
            playback_backpressure: AtomicBool::new(false),
            active_decode_tasks: AtomicUsize::new(0),
            stopping: AtomicBool::new(false),
            events: EventBits::new(),
            shared: Mutex::new(Shared {
                inbound: VecDeque::new(),
                outbound: VecDeque::new(),
                tasks: Vec::new(),
                testing: Vec::new(),
                local_frames: 0,
            }),
            decode_cv: Condvar::new(),
            playback: Mutex::new(VecDeque::new()),
            playback_cv: Condvar::new(),
            timestamps: Mutex::new(VecDeque::new()),
            decode_seq: AtomicU64::new(0),
            decode_turn: Mutex::new(0),
            decode_turn_cv: Condvar::new(),
            drops: DropCounters::default(),
            started_at: Instant::now(),
            last_output: Mutex::new(Instant::now()),
            worker: WorkerPool::new(config.worker_threads),
            encoder: Mutex::new(encoder),
            decoder: Mutex::new(decoder),
            input_resampler: Resampler::new(input_rate, SAMPLE_RATE_HZ),
            reference_resampler: Resampler::new(input_rate, SAMPLE_RATE_HZ),
            output_resampler: Resampler::new(SAMPLE_RATE_HZ, output_rate),
            transport,
            device,
            processor,
            wake_word,
            notifier,
            device_control,
            ota,
            threads: Mutex::new(Vec::new()),
            config,
        })
    }

    // ------------------------------------------------------------------
    // Lifecycle

    /// Spawn the engine tasks and kick off the startup sequence.
    pub fn start(self: &Arc<Self>) -> sona_core::Result<()> {
        self.set_state(DeviceState::Starting);

        let complexity = match self.aec_mode.load() {
            AecMode::Off => self.config.encoder_complexity,
            _ => 0,
        };
        if let Err(e) = self.encoder.lock().set_complexity(complexity) {
            tracing::warn!("failed to set encoder complexity: {e}");
        }

        self.install_processor_hooks();
        self.install_wake_word_hook();

        let mut threads = self.threads.lock();

        let session = Arc::clone(self);
        threads.push(
            std::thread::Builder::new()
                .name("sona-session".into())
                .spawn(move || session.session_loop())
                .expect("failed to spawn session loop"),
        );

        let session = Arc::clone(self);
        threads.push(
            std::thread::Builder::new()
                .name("sona-audio".into())
                .spawn(move || session.audio_loop())
                .expect("failed to spawn audio loop"),
        );

        let session = Arc::clone(self);
        threads.push(
            std::thread::Builder::new()
                .name("sona-playback".into())
                .spawn(move || session.playback_loop())
                .expect("failed to spawn playback loop"),
        );

        let session = Arc::clone(self);
        threads.push(
            std::thread::Builder::new()
                .name("sona-version-check".into())
                .spawn(move || session.version_check_loop())
                .expect("failed to spawn version check"),
        );
        drop(threads);

        self.wake_word.start();

        if let Err(e) = self.transport.start() {
            tracing::error!("transport start failed: {e}");
            self.alert("error", &e.to_string(), "sad");
        }

        Ok(())
    }

    /// Stop all engine threads. Safe to call more than once.
    pub fn shutdown(&self) {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        self.events.set(STOP);
        self.playback_cv.notify_all();
        self.decode_turn_cv.notify_all();
        self.decode_cv.notify_all();

        let handles = std::mem::take(&mut *self.threads.lock());
        for handle in handles {
            let _ = handle.join();
        }
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // Scheduling

    /// Append a closure to the session loop's task queue.
    pub fn schedule(&self, task: impl FnOnce() + Send + 'static) {
        self.shared.lock().tasks.push(Box::new(task));
        self.events.set(SCHEDULE);
    }

    fn session_loop(self: Arc<Self>) {
        loop {
            let bits = self.events.wait_any(SCHEDULE | SEND_AUDIO | STOP);
            if bits & STOP != 0 {
                return;
            }

            if bits & SEND_AUDIO != 0 {
                self.flush_send_queue();
            }

            if bits & SCHEDULE != 0 {
                let tasks = std::mem::take(&mut self.shared.lock().tasks);
                for task in tasks {
                    task();
                }
            }
        }
    }

    /// Swap the send queue empty and publish in order, stopping on the first
    /// transient failure.
    fn flush_send_queue(&self) {
        let packets: Vec<OutboundPacket> = {
            let mut shared = self.shared.lock();
            shared.outbound.drain(..).collect()
        };

        for packet in &packets {
            if let Err(e) = self.transport.send_audio(packet) {
                tracing::warn!("audio send failed, stopping drain for this tick: {e}");
                break;
            }
        }
    }

    fn audio_loop(self: Arc<Self>) {
        while !self.is_stopping() {
            let worked = self.capture_tick();
            if self.device.output_enabled() {
                self.decode_tick();
            }
            if !worked {
                std::thread::sleep(Duration::from_millis(
                    (sona_core::FRAME_DURATION_MS / 2) as u64,
                ));
            }
        }
    }

    // ------------------------------------------------------------------
    // State transitions

    pub fn state(&self) -> DeviceState {
        self.state.load()
    }

    pub fn listening_mode(&self) -> ListeningMode {
        self.listening_mode.load()
    }

    pub fn is_voice_detected(&self) -> bool {
        self.voice_detected.load(Ordering::Acquire)
    }

    pub fn has_server_time(&self) -> bool {
        self.has_server_time.load(Ordering::Acquire)
    }

    pub fn is_backpressured(&self) -> bool {
        self.playback_backpressure.load(Ordering::Acquire)
    }

    pub fn inbound_depth(&self) -> usize {
        self.shared.lock().inbound.len()
    }

    pub fn outbound_depth(&self) -> usize {
        self.shared.lock().outbound.len()
    }

    pub fn playback_depth(&self) -> usize {
        self.playback.lock().len()
    }

    /// Transition authority. No-op when the state is unchanged; otherwise
    /// waits for the worker pool to go idle, then runs the entry action.
    pub(crate) fn set_state(&self, new: DeviceState) {
        let old = self.state.load();
        if old == new {
            return;
        }

        self.state.store(new);
        tracing::info!(from = %old, to = %new, "state change");

        // Bridge already-submitted worker closures over the transition.
        self.worker.wait_for_completion();
        self.notifier.on_state_changed(new);

        match new {
            DeviceState::Idle => {
                self.notifier.set_status("standby");
                self.notifier.set_emotion("neutral");
                self.processor.stop();
                self.wake_word.start();
            }
            DeviceState::Connecting => {
                self.notifier.set_status("connecting");
                self.notifier.set_emotion("neutral");
                self.notifier.set_chat_message("system", "");
                self.timestamps.lock().clear();
            }
            DeviceState::Listening => {
                self.notifier.set_status("listening");
                self.notifier.set_emotion("neutral");
                self.update_iot_states();

                if !self.processor.is_running() {
                    if old == DeviceState::Speaking {
                        self.clear_inbound();
                        self.wait_playback_drained(OUTPUT_DRAIN_GRACE);
                    }
                    self.encoder.lock().reset();
                    self.processor.start();
                    self.wake_word.stop();
                }
            }
            DeviceState::Speaking => {
                self.notifier.set_status("speaking");
                self.aborted.store(false, Ordering::Release);

                if self.listening_mode.load() != ListeningMode::Realtime {
                    self.processor.stop();
                    // Barge-in: keep the wake word armed while speaking.
                    self.wake_word.start();
                }
                self.reset_decoder();
            }
            DeviceState::Upgrading => {
                self.notifier.set_status("upgrading");
                {
                    let mut shared = self.shared.lock();
                    shared.inbound.clear();
                    shared.outbound.clear();
                    shared.local_frames = 0;
                }
                self.decode_cv.notify_all();
                self.device.enable_input(false);
                self.processor.stop();
                self.wake_word.stop();
                if self.transport.is_audio_channel_open() {
                    self.transport.close_audio_channel();
                }
            }
            _ => {}
        }
    }

    pub(crate) fn set_listening_mode(&self, mode: ListeningMode) {
        self.listening_mode.store(mode);
        self.set_state(DeviceState::Listening);
    }

    /// Clear decode state: drop queued inbound frames, reset the decoder and
    /// re-enable the output path.
    pub(crate) fn reset_decoder(&self) {
        let cleared = self.clear_inbound();
        self.decoder.lock().reset();
        *self.last_output.lock() = Instant::now();
        self.device.enable_output(true);
        if cleared > 0 {
            tracing::debug!(cleared, "decoder reset dropped queued frames");
        }
    }

    fn clear_inbound(&self) -> usize {
        let cleared = {
            let mut shared = self.shared.lock();
            let n = shared.inbound.len();
            shared.inbound.clear();
            shared.local_frames = 0;
            n
        };
        self.decode_cv.notify_all();
        cleared
    }

    // ------------------------------------------------------------------
    // User/event entry points. Each runs as a task on the session loop.

    pub fn toggle_chat(self: &Arc<Self>) {
        let session = Arc::clone(self);
        self.schedule(move || match session.state.load() {
            DeviceState::Activating => session.set_state(DeviceState::Idle),
            DeviceState::WifiConfiguring => session.enter_audio_testing(),
            DeviceState::AudioTesting => session.exit_audio_testing(),
            DeviceState::Idle => {
                if !session.ensure_channel_open() {
                    return;
                }
                let mode = match session.aec_mode.load() {
                    AecMode::Off => ListeningMode::AutoStop,
                    _ => ListeningMode::Realtime,
                };
                session.set_listening_mode(mode);
            }
            DeviceState::Speaking => session.abort_speaking_now(AbortReason::None),
            DeviceState::Listening => session.transport.close_audio_channel(),
            _ => {}
        });
    }

    pub fn start_listening(self: &Arc<Self>) {
        let session = Arc::clone(self);
        self.schedule(move || match session.state.load() {
            DeviceState::Activating => session.set_state(DeviceState::Idle),
            DeviceState::WifiConfiguring => session.enter_audio_testing(),
            DeviceState::Idle => {
                if !session.ensure_channel_open() {
                    return;
                }
                session.set_listening_mode(ListeningMode::ManualStop);
            }
            DeviceState::Speaking => {
                session.abort_speaking_now(AbortReason::None);
                session.set_listening_mode(ListeningMode::ManualStop);
            }
            _ => {}
        });
    }

    pub fn stop_listening(self: &Arc<Self>) {
        let session = Arc::clone(self);
        self.schedule(move || match session.state.load() {
            DeviceState::AudioTesting => session.exit_audio_testing(),
            DeviceState::Listening => {
                session.send_listen_control("stop");
                session.set_state(DeviceState::Idle);
            }
            _ => {}
        });
    }

    pub fn abort_speaking(self: &Arc<Self>, reason: AbortReason) {
        let session = Arc::clone(self);
        self.schedule(move || session.abort_speaking_now(reason));
    }

    /// Cooperative cancellation of the current speaking session.
    pub(crate) fn abort_speaking_now(&self, reason: AbortReason) {
        tracing::info!(?reason, "abort speaking");
        self.aborted.store(true, Ordering::Release);
        if let Err(e) = self.transport.send_abort(reason) {
            tracing::warn!("failed to send abort: {e}");
        }
        self.reset_decoder();
        if self.listening_mode.load() == ListeningMode::ManualStop {
            self.set_state(DeviceState::Idle);
        } else {
            self.set_state(DeviceState::Listening);
        }
    }

    /// Text-command path used when a board forwards a typed wake word.
    pub fn wake_word_invoke(self: &Arc<Self>, wake_word: &str) {
        let word = wake_word.to_string();
        let session = Arc::clone(self);
        self.schedule(move || match session.state.load() {
            DeviceState::Idle => {
                if !session.ensure_channel_open() {
                    return;
                }
                if let Err(e) = session.transport.send_wake_word_detected(&word) {
                    tracing::warn!("failed to report wake word: {e}");
                }
                let mode = match session.aec_mode.load() {
                    AecMode::Off => ListeningMode::AutoStop,
                    _ => ListeningMode::Realtime,
                };
                session.set_listening_mode(mode);
            }
            DeviceState::Speaking => session.abort_speaking_now(AbortReason::None),
            DeviceState::Listening => session.transport.close_audio_channel(),
            _ => {}
        });
    }

    pub fn set_aec_mode(self: &Arc<Self>, mode: AecMode) {
        let session = Arc::clone(self);
        self.schedule(move || {
            session.aec_mode.store(mode);
            match mode {
                AecMode::Off => {
                    session.processor.set_device_aec(false);
                    session.notifier.show_notification("echo cancellation off");
                }
                AecMode::OnServer => {
                    session.processor.set_device_aec(false);
                    session.notifier.show_notification("echo cancellation on");
                }
                AecMode::OnDevice => {
                    session.processor.set_device_aec(true);
                    session.notifier.show_notification("echo cancellation on");
                }
            }
            let complexity = match mode {
                AecMode::Off => session.config.encoder_complexity,
                _ => 0,
            };
            session.worker.wait_for_completion();
            if let Err(e) = session.encoder.lock().set_complexity(complexity) {
                tracing::warn!("failed to set encoder complexity: {e}");
            }
            // Force the next session to renegotiate with the new mode.
            if session.transport.is_audio_channel_open() {
                session.transport.close_audio_channel();
            }
        });
    }

    pub fn send_mcp(self: &Arc<Self>, payload: String) {
        let session = Arc::clone(self);
        self.schedule(move || {
            if let Err(e) = session.transport.send_mcp(&payload) {
                tracing::warn!("failed to send mcp payload: {e}");
            }
        });
    }

    pub fn reboot(&self) {
        tracing::info!("rebooting");
        self.device_control.reboot();
    }

    pub fn can_enter_sleep(&self) -> bool {
        self.state.load() == DeviceState::Idle && !self.transport.is_audio_channel_open()
    }

    // ------------------------------------------------------------------
    // Helpers used by entry points and control dispatch

    /// Open the audio channel if needed, moving through Connecting.
    /// Returns false (back in Idle, alert raised) when the open fails.
    pub(crate) fn ensure_channel_open(&self) -> bool {
        if self.transport.is_audio_channel_open() {
            return true;
        }
        self.set_state(DeviceState::Connecting);
        match self.transport.open_audio_channel() {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("failed to open audio channel: {e}");
                self.set_state(DeviceState::Idle);
                self.alert("error", &e.to_string(), "sad");
                false
            }
        }
    }

    pub(crate) fn send_listen_control(&self, state: &str) {
        let message = serde_json::json!({
            "session_id": "",
            "type": "listen",
            "state": state,
        });
        if let Err(e) = self.transport.send_text(&message.to_string()) {
            tracing::warn!("failed to send listen control: {e}");
        }
    }

    pub(crate) fn update_iot_states(&self) {
        let message = serde_json::json!({
            "session_id": "",
            "type": "iot",
            "states": self.device_control.states(),
        });
        if let Err(e) = self.transport.send_text(&message.to_string()) {
            tracing::warn!("failed to publish device states: {e}");
        }
    }

    pub fn alert(&self, status: &str, message: &str, emotion: &str) {
        tracing::warn!(status, message, emotion, "alert");
        self.notifier.alert(status, message, emotion);
    }

    pub fn dismiss_alert(&self) {
        if self.state.load() == DeviceState::Idle {
            self.notifier.set_status("standby");
            self.notifier.set_emotion("neutral");
            self.notifier.set_chat_message("system", "");
        }
    }

    /// Queue pre-framed prompt audio for local playback. Waits for any
    /// current playback to drain so prompts never interleave with speech.
    pub fn play_frames(&self, frames: Vec<CompressedFrame>) {
        {
            let mut shared = self.shared.lock();
            while !shared.inbound.is_empty() && !self.is_stopping() {
                self.decode_cv.wait(&mut shared);
            }
        }
        self.worker.wait_for_completion();

        let mut shared = self.shared.lock();
        shared.local_frames += frames.len();
        shared.inbound.extend(frames);
    }

    // ------------------------------------------------------------------
    // Audio testing mode

    pub(crate) fn enter_audio_testing(&self) {
        tracing::info!("entering audio testing mode");
        self.reset_decoder();
        self.set_state(DeviceState::AudioTesting);
    }

    pub(crate) fn exit_audio_testing(&self) {
        tracing::info!("exiting audio testing mode");
        self.set_state(DeviceState::WifiConfiguring);
        let mut shared = self.shared.lock();
        let recording = std::mem::take(&mut shared.testing);
        shared.local_frames += recording.len();
        shared.inbound.extend(recording);
        drop(shared);
        self.decode_cv.notify_all();
    }

    // ------------------------------------------------------------------
    // Collaborator hooks

    /// Build the callbacks the transport adapter invokes. All of them hold
    /// weak references and enqueue toward the session loop.
    pub fn transport_hooks(self: &Arc<Self>) -> TransportHooks {
        let weak = Arc::downgrade(self);

        let on_json = {
            let weak = weak.clone();
            move |value: serde_json::Value| {
                if let Some(session) = weak.upgrade() {
                    session.handle_incoming_json(value);
                }
            }
        };
        let on_audio = {
            let weak = weak.clone();
            move |frame: CompressedFrame| {
                if let Some(session) = weak.upgrade() {
                    session.on_incoming_audio(frame);
                }
            }
        };
        let on_vad = {
            let weak = weak.clone();
            move || {
                if let Some(session) = weak.upgrade() {
                    session.on_server_vad();
                }
            }
        };
        let on_opened = {
            let weak = weak.clone();
            move || {
                if let Some(session) = weak.upgrade() {
                    let inner = Arc::clone(&session);
                    session.schedule(move || inner.update_iot_states());
                }
            }
        };
        let on_closed = {
            let weak = weak.clone();
            move || {
                if let Some(session) = weak.upgrade() {
                    let inner = Arc::clone(&session);
                    session.schedule(move || {
                        inner.notifier.set_chat_message("system", "");
                        inner.set_state(DeviceState::Idle);
                    });
                }
            }
        };
        let on_error = {
            let weak = weak.clone();
            move |message: String| {
                if let Some(session) = weak.upgrade() {
                    let inner = Arc::clone(&session);
                    session.schedule(move || {
                        inner.set_state(DeviceState::Idle);
                        inner.alert("error", &message, "sad");
                    });
                }
            }
        };

        TransportHooks {
            on_incoming_json: Box::new(on_json),
            on_incoming_audio: Box::new(on_audio),
            on_server_vad: Box::new(on_vad),
            on_audio_channel_opened: Box::new(on_opened),
            on_audio_channel_closed: Box::new(on_closed),
            on_network_error: Box::new(on_error),
        }
    }

    fn install_processor_hooks(self: &Arc<Self>) {
        let weak: Weak<Session> = Arc::downgrade(self);
        self.processor.set_output_hook(Box::new({
            let weak = weak.clone();
            move |pcm| {
                if let Some(session) = weak.upgrade() {
                    session.on_processed_audio(pcm);
                }
            }
        }));

        self.processor.set_vad_hook(Box::new(move |speaking| {
            if let Some(session) = weak.upgrade() {
                if session.state.load() == DeviceState::Listening {
                    let inner = Arc::clone(&session);
                    session.schedule(move || {
                        inner.voice_detected.store(speaking, Ordering::Release);
                        inner.notifier.on_state_changed(inner.state.load());
                    });
                }
            }
        }));
    }

    fn install_wake_word_hook(self: &Arc<Self>) {
        let weak: Weak<Session> = Arc::downgrade(self);
        self.wake_word.set_detection_hook(Box::new(move |word| {
            if let Some(session) = weak.upgrade() {
                session.on_wake_word(word.to_string());
            }
        }));
    }

    fn on_wake_word(self: &Arc<Self>, word: String) {
        let session = Arc::clone(self);
        self.schedule(move || match session.state.load() {
            DeviceState::Idle => {
                let frames = session.wake_word.wake_frames();
                if !session.ensure_channel_open() {
                    session.wake_word.start();
                    return;
                }
                tracing::info!(%word, "wake word detected");
                for frame in frames {
                    let packet = OutboundPacket::new(frame.0);
                    if let Err(e) = session.transport.send_audio(&packet) {
                        tracing::warn!("failed to forward wake audio: {e}");
                        break;
                    }
                }
                if let Err(e) = session.transport.send_wake_word_detected(&word) {
                    tracing::warn!("failed to report wake word: {e}");
                }
                let mode = match session.aec_mode.load() {
                    AecMode::Off => ListeningMode::AutoStop,
                    _ => ListeningMode::Realtime,
                };
                session.set_listening_mode(mode);
            }
            DeviceState::Speaking => session.abort_speaking_now(AbortReason::WakeWordDetected),
            DeviceState::Activating => session.set_state(DeviceState::Idle),
            _ => {}
        });
    }

    fn on_server_vad(self: &Arc<Self>) {
        let session = Arc::clone(self);
        self.schedule(move || {
            if session.state.load() != DeviceState::Listening {
                tracing::debug!(state = %session.state.load(), "server VAD outside listening, ignored");
                return;
            }
            tracing::info!("server VAD end, transitioning to speaking");
            session.set_state(DeviceState::Speaking);
        });
    }

    // ------------------------------------------------------------------
    // Output idle management

    pub(crate) fn maybe_disable_idle_output(&self) {
        if self.state.load() != DeviceState::Idle {
            return;
        }
        if self.last_output.lock().elapsed() > IDLE_OUTPUT_TIMEOUT {
            self.device.enable_output(false);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stopping.store(true, Ordering::Release);
        self.events.set(STOP);
        self.playback_cv.notify_all();
        self.decode_turn_cv.notify_all();
        self.decode_cv.notify_all();
    }
}
