//! Opus codec wrappers and PCM resampling
//!
//! One compressed frame is always 60 ms of 16 kHz mono audio. The wrappers
//! implement the engine-facing [`FrameEncoder`]/[`FrameDecoder`] contracts
//! from `sona-core`.

pub mod opus;
pub mod resample;

pub use opus::{OpusFrameDecoder, OpusFrameEncoder};
pub use resample::Resampler;
