//! Codec contracts
//!
//! The engine never talks to a concrete codec; it owns one encoder and one
//! decoder behind these traits and serializes reconfiguration around the
//! worker pool (no concurrent encode/decode while a codec is being rebuilt).

use crate::error::Result;

/// Encodes one PCM frame (16 kHz mono, fixed frame duration) into an opaque
/// compressed payload.
pub trait FrameEncoder: Send {
    fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>>;

    /// Drop any inter-frame state so the next frame starts a fresh stream.
    fn reset(&mut self);

    /// Trade CPU for quality; AEC modes force the cheapest setting.
    fn set_complexity(&mut self, complexity: u8) -> Result<()>;
}

/// Decodes one opaque compressed frame into PCM at the session rate.
pub trait FrameDecoder: Send {
    fn decode(&mut self, frame: &[u8]) -> Result<Vec<i16>>;

    /// Drop any inter-frame state, e.g. when a speaking session is aborted.
    fn reset(&mut self);

    /// Sample rate of decoded PCM.
    fn sample_rate(&self) -> u32;
}
