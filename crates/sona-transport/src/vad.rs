//! Server-side voice-activity signal classification
//!
//! The VAD topic carries either a plain `END` sentinel or a structured
//! speech-end event. Anything else on the topic is ignored.

use serde_json::Value;

/// Returns true when the payload signals server-detected end of speech.
pub fn is_speech_end(payload: &[u8]) -> bool {
    let Ok(text) = std::str::from_utf8(payload) else {
        return false;
    };
    let trimmed = text.trim();

    if trimmed.eq_ignore_ascii_case("end") {
        return true;
    }

    let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
        return false;
    };

    let type_ok = value.get("type").and_then(Value::as_str) == Some("speech_end");
    let trigger_ok = matches!(
        value.get("trigger").and_then(Value::as_str),
        Some("vad_detection") | Some("valid_speech_confirmed")
    );
    let message_ok = value
        .get("message")
        .and_then(Value::as_str)
        .map(|m| m.trim().eq_ignore_ascii_case("end"))
        .unwrap_or(false);

    type_ok && trigger_ok && message_ok
}
