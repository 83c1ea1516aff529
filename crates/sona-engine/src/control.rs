//! Inbound control-message parsing and dispatch
//!
//! The transport routes topics; semantics live here. Messages carry either a
//! string `type` (session control) or a numeric `type` (remote actuation).
//! Malformed or unknown messages are logged and ignored, never fatal.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde_json::Value;

use sona_config::DeviceLevels;
use sona_core::{DeviceState, Error, ListeningMode, Result};

use crate::session::Session;

/// Remote actuation codes delivered over the control topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCommand {
    Volume(u8),
    Shutdown,
    ForceIdle,
    Suck(u8),
    Vibration(u8),
    Heater(u8),
}

/// One parsed control message.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    TtsStart,
    TtsStop,
    TtsSentenceStart { text: String },
    Stt { text: String },
    Llm { emotion: String },
    Iot { commands: Vec<Value> },
    Mcp { payload: Value },
    System { command: String },
    Alert { status: String, message: String, emotion: String },
    Remote(RemoteCommand),
    Language { language: String },
    Unknown(String),
}

impl ControlMessage {
    pub fn parse(value: &Value) -> Result<ControlMessage> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::ProtocolViolation("control message is not an object".into()))?;

        // Language updates arrive without a `type` field.
        if let Some(language) = obj.get("languagesType").and_then(Value::as_str) {
            return Ok(ControlMessage::Language {
                language: language.to_string(),
            });
        }

        let ty = obj
            .get("type")
            .ok_or_else(|| Error::ProtocolViolation("missing type field".into()))?;

        if let Some(code) = ty.as_u64() {
            let level = obj
                .get("value")
                .and_then(Value::as_u64)
                .map(|v| v.min(u8::MAX as u64) as u8);
            return match code {
                0 => Ok(ControlMessage::Remote(RemoteCommand::Volume(
                    level.unwrap_or(80),
                ))),
                1 => Ok(ControlMessage::Remote(RemoteCommand::Shutdown)),
                3 => Ok(ControlMessage::Remote(RemoteCommand::ForceIdle)),
                4 => Ok(ControlMessage::Remote(RemoteCommand::Suck(level.unwrap_or(1)))),
                5 => Ok(ControlMessage::Remote(RemoteCommand::Vibration(
                    level.unwrap_or(1),
                ))),
                6 => Ok(ControlMessage::Remote(RemoteCommand::Heater(
                    level.unwrap_or(1),
                ))),
                other => Ok(ControlMessage::Unknown(format!("control code {other}"))),
            };
        }

        let ty = ty
            .as_str()
            .ok_or_else(|| Error::ProtocolViolation("type is neither string nor code".into()))?;

        match ty {
            "tts" => match obj.get("state").and_then(Value::as_str) {
                Some("start") => Ok(ControlMessage::TtsStart),
                Some("stop") => Ok(ControlMessage::TtsStop),
                Some("sentence_start") => Ok(ControlMessage::TtsSentenceStart {
                    text: obj
                        .get("text")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                }),
                other => Err(Error::ProtocolViolation(format!(
                    "unknown tts state: {other:?}"
                ))),
            },
            "stt" => Ok(ControlMessage::Stt {
                text: obj
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            }),
            "llm" => Ok(ControlMessage::Llm {
                emotion: obj
                    .get("emotion")
                    .and_then(Value::as_str)
                    .unwrap_or("neutral")
                    .to_string(),
            }),
            "iot" => Ok(ControlMessage::Iot {
                commands: obj
                    .get("commands")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default(),
            }),
            "mcp" => Ok(ControlMessage::Mcp {
                payload: obj.get("payload").cloned().unwrap_or(Value::Null),
            }),
            "system" => Ok(ControlMessage::System {
                command: obj
                    .get("command")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            }),
            "alert" => {
                let status = obj.get("status").and_then(Value::as_str);
                let message = obj.get("message").and_then(Value::as_str);
                let emotion = obj.get("emotion").and_then(Value::as_str);
                match (status, message, emotion) {
                    (Some(status), Some(message), Some(emotion)) => Ok(ControlMessage::Alert {
                        status: status.to_string(),
                        message: message.to_string(),
                        emotion: emotion.to_string(),
                    }),
                    _ => Err(Error::ProtocolViolation(
                        "alert requires status, message and emotion".into(),
                    )),
                }
            }
            other => Ok(ControlMessage::Unknown(other.to_string())),
        }
    }
}

impl Session {
    /// Entry point for the transport's JSON callback.
    pub(crate) fn handle_incoming_json(self: &Arc<Self>, value: Value) {
        let message = match ControlMessage::parse(&value) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("ignoring control message: {e}");
                return;
            }
        };
        self.dispatch_control(message);
    }

    pub(crate) fn dispatch_control(self: &Arc<Self>, message: ControlMessage) {
        match message {
            ControlMessage::TtsStart => {
                let session = Arc::clone(self);
                self.schedule(move || {
                    session.aborted.store(false, Ordering::Release);
                    if matches!(
                        session.state.load(),
                        DeviceState::Idle | DeviceState::Listening | DeviceState::Speaking
                    ) {
                        session.set_state(DeviceState::Speaking);
                    }
                });
            }
            ControlMessage::TtsStop => {
                let session = Arc::clone(self);
                self.schedule(move || {
                    // Let in-flight decodes land before leaving Speaking.
                    session.worker.wait_for_completion();
                    session.aborted.store(false, Ordering::Release);
                    // The reply ran to completion; acknowledge it as finished
                    // rather than cancelled.
                    if let Err(e) = session.transport.send_reply_finished() {
                        tracing::warn!("failed to acknowledge reply completion: {e}");
                    }
                    if session.listening_mode.load() == ListeningMode::ManualStop {
                        session.set_state(DeviceState::Idle);
                    } else {
                        session.set_state(DeviceState::Listening);
                    }
                });
            }
            ControlMessage::TtsSentenceStart { text } => {
                tracing::info!("<< {text}");
                let session = Arc::clone(self);
                self.schedule(move || session.notifier.set_chat_message("assistant", &text));
            }
            ControlMessage::Stt { text } => {
                tracing::info!(">> {text}");
                let session = Arc::clone(self);
                self.schedule(move || session.notifier.set_chat_message("user", &text));
            }
            ControlMessage::Llm { emotion } => {
                let session = Arc::clone(self);
                self.schedule(move || session.notifier.set_emotion(&emotion));
            }
            ControlMessage::Iot { commands } => {
                let session = Arc::clone(self);
                self.schedule(move || {
                    for command in &commands {
                        session.device_control.invoke(command);
                    }
                });
            }
            ControlMessage::Mcp { payload } => {
                let session = Arc::clone(self);
                self.schedule(move || session.device_control.invoke(&payload));
            }
            ControlMessage::System { command } => match command.as_str() {
                "reboot" => {
                    let session = Arc::clone(self);
                    self.schedule(move || session.reboot());
                }
                other => tracing::warn!("unknown system command: {other}"),
            },
            ControlMessage::Alert {
                status,
                message,
                emotion,
            } => {
                let session = Arc::clone(self);
                self.schedule(move || session.alert(&status, &message, &emotion));
            }
            ControlMessage::Remote(command) => {
                let session = Arc::clone(self);
                self.schedule(move || session.dispatch_remote(command));
            }
            ControlMessage::Language { language } => {
                tracing::info!(%language, "interaction language updated");
                self.transport.update_language(&language);
            }
            ControlMessage::Unknown(ty) => {
                tracing::warn!("unknown message type: {ty}");
            }
        }
    }

    fn dispatch_remote(&self, command: RemoteCommand) {
        tracing::debug!(?command, "remote command");
        match command {
            RemoteCommand::Volume(level) => {
                // Persisted state and live hardware must see the same value.
                let level = DeviceLevels::clamp_volume(level);
                self.device_control.set_volume(level);
                self.device.set_output_volume(level);
            }
            RemoteCommand::Shutdown => self.device_control.shutdown(),
            RemoteCommand::ForceIdle => {
                if self.state.load() == DeviceState::Speaking {
                    self.abort_speaking_now(sona_core::AbortReason::None);
                }
                self.set_state(DeviceState::Idle);
            }
            RemoteCommand::Suck(level) => self.device_control.set_suck_level(level),
            RemoteCommand::Vibration(level) => self.device_control.set_vibration_level(level),
            RemoteCommand::Heater(level) => self.device_control.set_heater_level(level),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_tts_states() {
        assert_eq!(
            ControlMessage::parse(&json!({"type": "tts", "state": "start"})).unwrap(),
            ControlMessage::TtsStart
        );
        assert_eq!(
            ControlMessage::parse(&json!({"type": "tts", "state": "stop"})).unwrap(),
            ControlMessage::TtsStop
        );
        assert_eq!(
            ControlMessage::parse(
                &json!({"type": "tts", "state": "sentence_start", "text": "hello"})
            )
            .unwrap(),
            ControlMessage::TtsSentenceStart {
                text: "hello".into()
            }
        );
        assert!(ControlMessage::parse(&json!({"type": "tts", "state": "nope"})).is_err());
    }

    #[test]
    fn test_parse_numeric_codes() {
        assert_eq!(
            ControlMessage::parse(&json!({"type": 0, "value": 90})).unwrap(),
            ControlMessage::Remote(RemoteCommand::Volume(90))
        );
        assert_eq!(
            ControlMessage::parse(&json!({"type": 1})).unwrap(),
            ControlMessage::Remote(RemoteCommand::Shutdown)
        );
        assert_eq!(
            ControlMessage::parse(&json!({"type": 3})).unwrap(),
            ControlMessage::Remote(RemoteCommand::ForceIdle)
        );
        assert_eq!(
            ControlMessage::parse(&json!({"type": 4, "value": 3})).unwrap(),
            ControlMessage::Remote(RemoteCommand::Suck(3))
        );
        assert_eq!(
            ControlMessage::parse(&json!({"type": 5, "value": 8})).unwrap(),
            ControlMessage::Remote(RemoteCommand::Vibration(8))
        );
        assert_eq!(
            ControlMessage::parse(&json!({"type": 6})).unwrap(),
            ControlMessage::Remote(RemoteCommand::Heater(1))
        );
        // Unassigned codes are reported, not rejected.
        assert!(matches!(
            ControlMessage::parse(&json!({"type": 2})).unwrap(),
            ControlMessage::Unknown(_)
        ));
    }

    #[test]
    fn test_parse_language_update() {
        assert_eq!(
            ControlMessage::parse(&json!({"languagesType": "en"})).unwrap(),
            ControlMessage::Language {
                language: "en".into()
            }
        );
    }

    #[test]
    fn test_parse_alert_requires_all_fields() {
        assert!(ControlMessage::parse(&json!({"type": "alert", "status": "x"})).is_err());
        assert_eq!(
            ControlMessage::parse(&json!({
                "type": "alert", "status": "warn", "message": "low battery", "emotion": "sad"
            }))
            .unwrap(),
            ControlMessage::Alert {
                status: "warn".into(),
                message: "low battery".into(),
                emotion: "sad".into()
            }
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(ControlMessage::parse(&json!("just a string")).is_err());
        assert!(ControlMessage::parse(&json!({"no_type": true})).is_err());
        assert!(ControlMessage::parse(&json!({"type": true})).is_err());
    }

    #[test]
    fn test_parse_unknown_type_is_soft() {
        assert_eq!(
            ControlMessage::parse(&json!({"type": "telemetry"})).unwrap(),
            ControlMessage::Unknown("telemetry".into())
        );
    }
}
