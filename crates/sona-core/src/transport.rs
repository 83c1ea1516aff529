//! Transport contract
//!
//! The transport adapter owns the pub/sub connection and demultiplexes
//! inbound topics into control JSON, opaque audio frames and server-side
//! voice-activity signals. It routes; it never interprets control semantics.

use crate::audio::{CompressedFrame, OutboundPacket};
use crate::error::Result;
use crate::state::AbortReason;

/// Callbacks the session installs on the transport at startup.
///
/// All callbacks run on the transport's own thread and must only enqueue
/// work toward the session loop.
pub struct TransportHooks {
    pub on_incoming_json: Box<dyn Fn(serde_json::Value) + Send + Sync>,
    pub on_incoming_audio: Box<dyn Fn(CompressedFrame) + Send + Sync>,
    pub on_server_vad: Box<dyn Fn() + Send + Sync>,
    pub on_audio_channel_opened: Box<dyn Fn() + Send + Sync>,
    pub on_audio_channel_closed: Box<dyn Fn() + Send + Sync>,
    pub on_network_error: Box<dyn Fn(String) + Send + Sync>,
}

impl TransportHooks {
    /// Hooks that drop everything; useful for tests and partial wiring.
    pub fn noop() -> Self {
        Self {
            on_incoming_json: Box::new(|_| {}),
            on_incoming_audio: Box::new(|_| {}),
            on_server_vad: Box::new(|| {}),
            on_audio_channel_opened: Box::new(|| {}),
            on_audio_channel_closed: Box::new(|| {}),
            on_network_error: Box::new(|_| {}),
        }
    }
}

impl std::fmt::Debug for TransportHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TransportHooks")
    }
}

/// Pub/sub transport owned by the session.
pub trait Transport: Send + Sync {
    /// Install the session's callbacks. Must be called before `start`.
    fn install_hooks(&self, hooks: TransportHooks);

    /// Connect and subscribe. Returns `TransportUnavailable` on failure.
    fn start(&self) -> Result<()>;

    /// (Re)open the logical audio channel toward the server.
    fn open_audio_channel(&self) -> Result<()>;

    /// Close the audio channel, publishing the end-of-stream sentinel.
    fn close_audio_channel(&self);

    fn is_audio_channel_open(&self) -> bool;

    /// Publish one compressed packet. `TransportTransient` errors stop the
    /// caller's drain for this tick.
    fn send_audio(&self, packet: &OutboundPacket) -> Result<()>;

    /// Publish session control JSON as text.
    fn send_text(&self, text: &str) -> Result<()>;

    /// Tell the server to cancel the in-flight reply.
    fn send_abort(&self, reason: AbortReason) -> Result<()>;

    /// Acknowledge that the current reply played to completion.
    fn send_reply_finished(&self) -> Result<()>;

    /// Report a locally detected wake word.
    fn send_wake_word_detected(&self, wake_word: &str) -> Result<()>;

    /// Forward an MCP payload.
    fn send_mcp(&self, payload: &str) -> Result<()>;

    /// Recompute the outbound topic for a new interaction language.
    fn update_language(&self, language: &str);
}
