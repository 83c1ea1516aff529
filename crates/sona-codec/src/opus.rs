//! Opus encode/decode for the fixed session format

use audiopus::{
    coder::{Decoder, Encoder},
    Application, Channels, SampleRate as OpusSampleRate,
};

use sona_core::{Error, FrameDecoder, FrameEncoder, Result, SAMPLES_PER_FRAME, SAMPLE_RATE_HZ};

/// Upper bound on one encoded Opus frame.
const MAX_OPUS_FRAME_BYTES: usize = 4000;

fn opus_rate(sample_rate: u32) -> Result<OpusSampleRate> {
    match sample_rate {
        8000 => Ok(OpusSampleRate::Hz8000),
        12000 => Ok(OpusSampleRate::Hz12000),
        16000 => Ok(OpusSampleRate::Hz16000),
        24000 => Ok(OpusSampleRate::Hz24000),
        48000 => Ok(OpusSampleRate::Hz48000),
        _ => Err(Error::EncodeFailure(format!(
            "unsupported sample rate: {sample_rate}"
        ))),
    }
}

/// Opus encoder for outbound speech. 16 kHz mono, voice application profile.
pub struct OpusFrameEncoder {
    encoder: Encoder,
    complexity: u8,
}

impl OpusFrameEncoder {
    pub fn new() -> Result<Self> {
        let encoder = Encoder::new(opus_rate(SAMPLE_RATE_HZ)?, Channels::Mono, Application::Voip)
            .map_err(|e| Error::EncodeFailure(format!("failed to create encoder: {e}")))?;

        Ok(Self {
            encoder,
            complexity: 5,
        })
    }

    fn rebuild(&mut self) -> Result<()> {
        let mut encoder =
            Encoder::new(OpusSampleRate::Hz16000, Channels::Mono, Application::Voip)
                .map_err(|e| Error::EncodeFailure(format!("failed to recreate encoder: {e}")))?;
        encoder
            .set_complexity(self.complexity)
            .map_err(|e| Error::EncodeFailure(format!("failed to set complexity: {e}")))?;
        self.encoder = encoder;
        Ok(())
    }
}

impl FrameEncoder for OpusFrameEncoder {
    fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>> {
        if pcm.len() != SAMPLES_PER_FRAME {
            return Err(Error::EncodeFailure(format!(
                "invalid frame size: expected {SAMPLES_PER_FRAME}, got {}",
                pcm.len()
            )));
        }

        let mut output = vec![0u8; MAX_OPUS_FRAME_BYTES];
        let encoded_len = self
            .encoder
            .encode(pcm, &mut output)
            .map_err(|e| Error::EncodeFailure(format!("opus encode error: {e}")))?;

        output.truncate(encoded_len);
        Ok(output)
    }

    fn reset(&mut self) {
        // Rebuilding is the portable way to drop inter-frame state.
        if let Err(e) = self.rebuild() {
            tracing::warn!("encoder reset failed: {e}");
        }
    }

    fn set_complexity(&mut self, complexity: u8) -> Result<()> {
        self.encoder
            .set_complexity(complexity)
            .map_err(|e| Error::EncodeFailure(format!("failed to set complexity: {e}")))?;
        self.complexity = complexity;
        Ok(())
    }
}

/// Opus decoder for inbound speech. Decodes at the session rate; the engine
/// resamples to the output device's rate when they differ.
pub struct OpusFrameDecoder {
    decoder: Decoder,
}

impl OpusFrameDecoder {
    pub fn new() -> Result<Self> {
        let decoder = Decoder::new(opus_rate(SAMPLE_RATE_HZ)?, Channels::Mono)
            .map_err(|e| Error::DecodeFailure(format!("failed to create decoder: {e}")))?;
        Ok(Self { decoder })
    }
}

impl FrameDecoder for OpusFrameDecoder {
    fn decode(&mut self, frame: &[u8]) -> Result<Vec<i16>> {
        // A 60 ms frame is the largest a packet may carry here.
        let mut output = vec![0i16; SAMPLES_PER_FRAME];

        let decoded_len = self
            .decoder
            .decode(Some(frame), &mut output[..], false)
            .map_err(|e| Error::DecodeFailure(format!("opus decode error: {e}")))?;

        output.truncate(decoded_len);
        Ok(output)
    }

    fn reset(&mut self) {
        match Decoder::new(OpusSampleRate::Hz16000, Channels::Mono) {
            Ok(decoder) => self.decoder = decoder,
            Err(e) => tracing::warn!("decoder reset failed: {e}"),
        }
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE_HZ
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_frame() -> Vec<i16> {
        (0..SAMPLES_PER_FRAME)
            .map(|i| ((i as f32 * 0.05).sin() * 12000.0) as i16)
            .collect()
    }

    #[test]
    fn test_encode_decode_frame() {
        let mut encoder = OpusFrameEncoder::new().unwrap();
        let mut decoder = OpusFrameDecoder::new().unwrap();

        let pcm = sine_frame();
        let encoded = encoder.encode(&pcm).unwrap();
        assert!(!encoded.is_empty());
        assert!(encoded.len() < pcm.len() * 2);

        let decoded = decoder.decode(&encoded).unwrap();
        assert_eq!(decoded.len(), SAMPLES_PER_FRAME);
    }

    #[test]
    fn test_encode_rejects_short_frame() {
        let mut encoder = OpusFrameEncoder::new().unwrap();
        assert!(encoder.encode(&[0i16; 100]).is_err());
    }

    #[test]
    fn test_reset_keeps_decoding() {
        let mut encoder = OpusFrameEncoder::new().unwrap();
        let mut decoder = OpusFrameDecoder::new().unwrap();

        let encoded = encoder.encode(&sine_frame()).unwrap();
        decoder.decode(&encoded).unwrap();
        decoder.reset();
        let decoded = decoder.decode(&encoded).unwrap();
        assert_eq!(decoded.len(), SAMPLES_PER_FRAME);
    }

    #[test]
    fn test_complexity_setting() {
        let mut encoder = OpusFrameEncoder::new().unwrap();
        assert!(encoder.set_complexity(0).is_ok());
        assert!(encoder.encode(&sine_frame()).is_ok());
    }
}
