//! MQTT transport adapter
//!
//! Owns the broker connection, subscribes to the device's topic set and
//! demultiplexes inbound traffic into control JSON, opaque audio frames and
//! server-side voice-activity signals. Outbound audio is framed (optional
//! big-endian timestamp prefix) and chunked to bound publish latency.

pub mod framing;
pub mod mqtt;
pub mod topics;
pub mod vad;

pub use framing::{frame_payload, split_chunks, MAX_CHUNK_BYTES};
pub use mqtt::{MqttTransport, MqttTransportConfig};
pub use topics::DeviceTopics;
pub use vad::is_speech_end;
