//! MQTT adapter
//!
//! The broker connection lives on a private tokio runtime; the event-loop
//! task reconnects on error with a fixed backoff and re-subscribes on every
//! connection. Publishes from the session loop go through the client's
//! non-blocking path, so a full outbound queue surfaces as a transient
//! error instead of stalling state transitions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, Publish, QoS};

use sona_config::store::KEY_LANGUAGE;
use sona_config::{MqttSettings, SettingsStore};
use sona_core::{
    AbortReason, CompressedFrame, Error, OutboundPacket, Result, Transport, TransportHooks,
};

use crate::framing::{frame_payload, split_chunks, MAX_CHUNK_BYTES};
use crate::topics::DeviceTopics;
use crate::vad::is_speech_end;

const DEFAULT_PORT: u16 = 1883;
const RECONNECT_INTERVAL: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const CHANNEL_CAPACITY: usize = 64;

/// Broker and identity configuration for the adapter.
#[derive(Debug, Clone)]
pub struct MqttTransportConfig {
    pub endpoint: String,
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub keepalive: u64,
    pub subscribe_topic: String,
    pub device_id: String,
}

impl MqttTransportConfig {
    pub fn from_settings(settings: &MqttSettings, device_id: &str) -> Self {
        Self {
            endpoint: settings.endpoint.clone(),
            client_id: settings.client_id.clone(),
            username: settings.username.clone(),
            password: settings.password.clone(),
            keepalive: settings.keepalive,
            subscribe_topic: settings.subscribe_topic.clone(),
            device_id: device_id.to_string(),
        }
    }
}

/// Cancel-TTS payload: `action` is `"stop"` for a mid-flight cancellation,
/// `"finish"` when the reply played to completion.
fn cancel_tts_message(device_id: &str, action: &str) -> String {
    serde_json::json!({
        "user_id": device_id,
        "action": action,
    })
    .to_string()
}

/// Split `host[:port]` into its parts.
fn parse_endpoint(endpoint: &str) -> (String, u16) {
    match endpoint.rsplit_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (endpoint.to_string(), DEFAULT_PORT),
        },
        None => (endpoint.to_string(), DEFAULT_PORT),
    }
}

pub struct MqttTransport {
    config: MqttTransportConfig,
    topics: DeviceTopics,
    store: Arc<dyn SettingsStore>,
    hooks: Arc<RwLock<Arc<TransportHooks>>>,
    client: RwLock<Option<AsyncClient>>,
    publish_topic: RwLock<String>,
    connected: Arc<AtomicBool>,
    error_occurred: AtomicBool,
    runtime: tokio::runtime::Runtime,
}

impl MqttTransport {
    pub fn new(config: MqttTransportConfig, store: Arc<dyn SettingsStore>) -> Result<Self> {
        let topics = DeviceTopics::new(&config.device_id, &config.subscribe_topic);
        let language = store.get_str(KEY_LANGUAGE).unwrap_or_else(|| "en".to_string());
        let publish_topic = DeviceTopics::publish_topic(&config.device_id, &language);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("sona-mqtt")
            .enable_all()
            .build()
            .map_err(|e| Error::TransportUnavailable(format!("runtime init failed: {e}")))?;

        Ok(Self {
            config,
            topics,
            store,
            hooks: Arc::new(RwLock::new(Arc::new(TransportHooks::noop()))),
            client: RwLock::new(None),
            publish_topic: RwLock::new(publish_topic),
            connected: Arc::new(AtomicBool::new(false)),
            error_occurred: AtomicBool::new(false),
            runtime,
        })
    }

    /// Device-ready announcement published after startup.
    pub fn wakeup_call(&self) -> Result<()> {
        let message = serde_json::json!({
            "device_id": self.config.device_id,
            "device_type": "doll",
            "stt_text": "Device is ready#",
            "modal_type": "audio",
        });
        self.publish(
            self.topics.wakeup.clone(),
            QoS::AtMostOnce,
            message.to_string().into_bytes(),
        )
    }

    /// IMU/touch status publish used by motion-aware boards.
    pub fn publish_status(&self, status: &serde_json::Value) -> Result<()> {
        let mut message = status.clone();
        if let Some(obj) = message.as_object_mut() {
            obj.insert(
                "device_id".to_string(),
                serde_json::Value::from(self.config.device_id.as_str()),
            );
        }
        self.publish(
            self.topics.imu_status.clone(),
            QoS::AtMostOnce,
            message.to_string().into_bytes(),
        )
    }

    fn client_handle(&self) -> Result<AsyncClient> {
        self.client
            .read()
            .clone()
            .ok_or_else(|| Error::TransportUnavailable("transport not started".into()))
    }

    fn publish(&self, topic: String, qos: QoS, payload: Vec<u8>) -> Result<()> {
        let client = self.client_handle()?;
        client.try_publish(topic, qos, false, payload).map_err(|e| {
            self.error_occurred.store(true, Ordering::Release);
            Error::TransportTransient(e.to_string())
        })
    }

    fn spawn_event_loop(&self, mut event_loop: rumqttc::EventLoop, client: AsyncClient) {
        let hooks = Arc::clone(&self.hooks);
        let connected = Arc::clone(&self.connected);
        let topics = self.topics.clone();

        self.runtime.spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        tracing::info!("connected to broker");
                        connected.store(true, Ordering::Release);
                        subscribe_all(&client, &topics);
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let hooks = hooks.read().clone();
                        route_publish(&topics, &hooks, &publish);
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        tracing::info!("disconnected from broker");
                        connected.store(false, Ordering::Release);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        connected.store(false, Ordering::Release);
                        tracing::warn!("broker connection lost: {e}");
                        let hooks = hooks.read().clone();
                        (hooks.on_network_error)(e.to_string());
                        tokio::time::sleep(RECONNECT_INTERVAL).await;
                    }
                }
            }
        });
    }
}

fn subscribe_all(client: &AsyncClient, topics: &DeviceTopics) {
    let subscriptions = [
        (topics.session.as_str(), QoS::ExactlyOnce),
        (topics.control.as_str(), QoS::AtMostOnce),
        (topics.settings.as_str(), QoS::AtMostOnce),
        (topics.moan.as_str(), QoS::AtMostOnce),
        (topics.vad.as_str(), QoS::AtLeastOnce),
    ];
    for (topic, qos) in subscriptions {
        if topic.is_empty() {
            continue;
        }
        match client.try_subscribe(topic, qos) {
            Ok(()) => tracing::info!(topic, "subscribed"),
            Err(e) => tracing::warn!(topic, "subscribe failed: {e}"),
        }
    }
}

/// Demultiplex one inbound publish. Routing only; semantics belong to the
/// session.
fn route_publish(topics: &DeviceTopics, hooks: &TransportHooks, publish: &Publish) {
    let topic = publish.topic.as_str();
    let payload: &[u8] = &publish.payload;

    if topic == topics.session {
        if payload.first() == Some(&b'{') {
            match serde_json::from_slice(payload) {
                Ok(value) => (hooks.on_incoming_json)(value),
                Err(e) => tracing::warn!("malformed session JSON ignored: {e}"),
            }
        } else {
            (hooks.on_incoming_audio)(CompressedFrame(payload.to_vec()));
        }
    } else if topic == topics.control || topic == topics.settings || topic == topics.moan {
        match serde_json::from_slice(payload) {
            Ok(value) => (hooks.on_incoming_json)(value),
            Err(e) => tracing::warn!(topic, "malformed control JSON ignored: {e}"),
        }
    } else if topic == topics.vad {
        if is_speech_end(payload) {
            (hooks.on_server_vad)();
        } else {
            tracing::debug!("non-terminal VAD payload ignored");
        }
    } else {
        tracing::warn!(topic, "unhandled topic");
    }
}

impl Transport for MqttTransport {
    fn install_hooks(&self, hooks: TransportHooks) {
        *self.hooks.write() = Arc::new(hooks);
    }

    fn start(&self) -> Result<()> {
        if self.config.endpoint.is_empty() {
            return Err(Error::TransportUnavailable(
                "broker endpoint not provisioned".into(),
            ));
        }
        if self.client.read().is_some() {
            return Ok(());
        }

        let (host, port) = parse_endpoint(&self.config.endpoint);
        tracing::info!(%host, port, "connecting to broker");

        let mut options = MqttOptions::new(self.config.client_id.clone(), host, port);
        options.set_keep_alive(Duration::from_secs(self.config.keepalive));
        if !self.config.username.is_empty() {
            options.set_credentials(self.config.username.clone(), self.config.password.clone());
        }

        let (client, event_loop) = AsyncClient::new(options, CHANNEL_CAPACITY);
        self.spawn_event_loop(event_loop, client.clone());
        *self.client.write() = Some(client);
        Ok(())
    }

    fn open_audio_channel(&self) -> Result<()> {
        if self.client.read().is_none() {
            self.start()?;
        }

        // The event loop reconnects in the background; give it one window.
        let deadline = Instant::now() + CONNECT_TIMEOUT;
        while !self.connected.load(Ordering::Acquire) {
            if Instant::now() >= deadline {
                return Err(Error::TransportUnavailable("broker not reachable".into()));
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        self.error_occurred.store(false, Ordering::Release);
        let hooks = self.hooks.read().clone();
        (hooks.on_audio_channel_opened)();
        Ok(())
    }

    fn close_audio_channel(&self) {
        tracing::info!("closing audio channel");
        let topic = self.publish_topic.read().clone();
        if !topic.is_empty() {
            // End-of-stream sentinel for the server.
            if let Err(e) = self.publish(topic, QoS::AtLeastOnce, b"END".to_vec()) {
                tracing::warn!("failed to publish end sentinel: {e}");
            }
        }
        let hooks = self.hooks.read().clone();
        (hooks.on_audio_channel_closed)();
    }

    fn is_audio_channel_open(&self) -> bool {
        self.connected.load(Ordering::Acquire) && !self.error_occurred.load(Ordering::Acquire)
    }

    fn send_audio(&self, packet: &OutboundPacket) -> Result<()> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(Error::TransportTransient("not connected".into()));
        }
        let topic = self.publish_topic.read().clone();
        if topic.is_empty() {
            return Err(Error::TransportTransient("publish topic not set".into()));
        }

        let payload = frame_payload(packet);
        if payload.len() > MAX_CHUNK_BYTES {
            for chunk in split_chunks(&payload) {
                self.publish(topic.clone(), QoS::AtMostOnce, chunk.to_vec())?;
            }
            Ok(())
        } else {
            self.publish(topic, QoS::AtMostOnce, payload)
        }
    }

    fn send_text(&self, text: &str) -> Result<()> {
        let topic = self.publish_topic.read().clone();
        if topic.is_empty() {
            return Err(Error::TransportTransient("publish topic not set".into()));
        }
        self.publish(topic, QoS::AtMostOnce, text.as_bytes().to_vec())
    }

    fn send_abort(&self, reason: AbortReason) -> Result<()> {
        tracing::info!(?reason, "sending reply cancellation");
        self.publish(
            self.topics.cancel_tts.clone(),
            QoS::ExactlyOnce,
            cancel_tts_message(&self.config.device_id, "stop").into_bytes(),
        )
    }

    fn send_reply_finished(&self) -> Result<()> {
        self.publish(
            self.topics.cancel_tts.clone(),
            QoS::ExactlyOnce,
            cancel_tts_message(&self.config.device_id, "finish").into_bytes(),
        )
    }

    fn send_wake_word_detected(&self, wake_word: &str) -> Result<()> {
        let message = serde_json::json!({
            "session_id": "",
            "type": "listen",
            "state": "detect",
            "text": wake_word,
        });
        self.send_text(&message.to_string())
    }

    fn send_mcp(&self, payload: &str) -> Result<()> {
        let payload_value = serde_json::from_str::<serde_json::Value>(payload)
            .unwrap_or_else(|_| serde_json::Value::from(payload));
        let message = serde_json::json!({
            "session_id": "",
            "type": "mcp",
            "payload": payload_value,
        });
        self.send_text(&message.to_string())
    }

    fn update_language(&self, language: &str) {
        self.store.set_str(KEY_LANGUAGE, language);
        let topic = DeviceTopics::publish_topic(&self.config.device_id, language);
        tracing::info!(%language, topic, "publish topic updated");
        *self.publish_topic.write() = topic;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_cancel_tts_actions() {
        let stop: serde_json::Value =
            serde_json::from_str(&cancel_tts_message("device1", "stop")).unwrap();
        assert_eq!(stop["user_id"], "device1");
        assert_eq!(stop["action"], "stop");

        let finish: serde_json::Value =
            serde_json::from_str(&cancel_tts_message("device1", "finish")).unwrap();
        assert_eq!(finish["user_id"], "device1");
        assert_eq!(finish["action"], "finish");
    }

    #[test]
    fn test_parse_endpoint() {
        assert_eq!(parse_endpoint("broker.local"), ("broker.local".into(), 1883));
        assert_eq!(parse_endpoint("broker.local:8883"), ("broker.local".into(), 8883));
        assert_eq!(parse_endpoint("broker.local:nope"), ("broker.local:nope".into(), 1883));
    }

    struct Routed {
        json: Mutex<Vec<serde_json::Value>>,
        audio: Mutex<Vec<CompressedFrame>>,
        vad: Mutex<usize>,
    }

    fn recording_hooks() -> (Arc<Routed>, TransportHooks) {
        let routed = Arc::new(Routed {
            json: Mutex::new(Vec::new()),
            audio: Mutex::new(Vec::new()),
            vad: Mutex::new(0),
        });
        let hooks = TransportHooks {
            on_incoming_json: Box::new({
                let routed = Arc::clone(&routed);
                move |value| routed.json.lock().push(value)
            }),
            on_incoming_audio: Box::new({
                let routed = Arc::clone(&routed);
                move |frame| routed.audio.lock().push(frame)
            }),
            on_server_vad: Box::new({
                let routed = Arc::clone(&routed);
                move || *routed.vad.lock() += 1
            }),
            on_audio_channel_opened: Box::new(|| {}),
            on_audio_channel_closed: Box::new(|| {}),
            on_network_error: Box::new(|_| {}),
        };
        (routed, hooks)
    }

    fn topics() -> DeviceTopics {
        DeviceTopics::new("device1", "server/session/device1")
    }

    #[test]
    fn test_route_session_demux() {
        let (routed, hooks) = recording_hooks();
        let topics = topics();

        let json = Publish::new(
            "server/session/device1",
            QoS::AtMostOnce,
            br#"{"type":"tts","state":"start"}"#.to_vec(),
        );
        route_publish(&topics, &hooks, &json);

        let audio = Publish::new(
            "server/session/device1",
            QoS::AtMostOnce,
            vec![0x4f, 0x70, 0x75, 0x73],
        );
        route_publish(&topics, &hooks, &audio);

        assert_eq!(routed.json.lock().len(), 1);
        assert_eq!(routed.audio.lock().len(), 1);
        assert_eq!(routed.audio.lock()[0].0, vec![0x4f, 0x70, 0x75, 0x73]);
    }

    #[test]
    fn test_route_control_topics_parse_json() {
        let (routed, hooks) = recording_hooks();
        let topics = topics();

        for topic in ["doll/control/device1", "doll/set/device1", "doll/control_moan/device1"] {
            let publish = Publish::new(topic, QoS::AtMostOnce, br#"{"type":4,"value":2}"#.to_vec());
            route_publish(&topics, &hooks, &publish);
        }
        assert_eq!(routed.json.lock().len(), 3);
        assert!(routed.audio.lock().is_empty());
    }

    #[test]
    fn test_route_vad_end_only() {
        let (routed, hooks) = recording_hooks();
        let topics = topics();

        route_publish(
            &topics,
            &hooks,
            &Publish::new("doll/vad/device1", QoS::AtLeastOnce, b"END".to_vec()),
        );
        route_publish(
            &topics,
            &hooks,
            &Publish::new("doll/vad/device1", QoS::AtLeastOnce, b"speech".to_vec()),
        );
        assert_eq!(*routed.vad.lock(), 1);
    }

    #[test]
    fn test_route_malformed_json_is_ignored() {
        let (routed, hooks) = recording_hooks();
        let topics = topics();
        route_publish(
            &topics,
            &hooks,
            &Publish::new("doll/control/device1", QoS::AtMostOnce, b"{broken".to_vec()),
        );
        assert!(routed.json.lock().is_empty());
    }
}
