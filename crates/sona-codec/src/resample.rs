//! PCM sample-rate conversion
//!
//! FFT-based conversion via rubato, with a linear-interpolation fallback for
//! inputs too short to window.

use rubato::{FftFixedIn, Resampler as RubatoResampler};

/// Converts 16-bit mono PCM between two fixed rates.
pub struct Resampler {
    from_rate: u32,
    to_rate: u32,
}

impl Resampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self { from_rate, to_rate }
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    /// Expected output length for `input_len` samples.
    pub fn output_len(&self, input_len: usize) -> usize {
        (input_len as u64 * self.to_rate as u64 / self.from_rate as u64) as usize
    }

    pub fn process(&self, input: &[i16]) -> Vec<i16> {
        if self.from_rate == self.to_rate {
            return input.to_vec();
        }

        if input.len() < 64 {
            return self.process_linear(input);
        }

        let samples: Vec<f64> = input.iter().map(|&s| s as f64 / 32768.0).collect();

        match FftFixedIn::<f64>::new(
            self.from_rate as usize,
            self.to_rate as usize,
            samples.len(),
            2,
            1,
        ) {
            Ok(mut resampler) => match resampler.process(&[samples], None) {
                Ok(output) => output[0]
                    .iter()
                    .map(|&s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16)
                    .collect(),
                Err(e) => {
                    tracing::warn!("fft resampling failed: {e}");
                    self.process_linear(input)
                }
            },
            Err(e) => {
                tracing::warn!("fft resampler init failed: {e}");
                self.process_linear(input)
            }
        }
    }

    fn process_linear(&self, input: &[i16]) -> Vec<i16> {
        if input.is_empty() {
            return Vec::new();
        }

        let ratio = self.to_rate as f64 / self.from_rate as f64;
        let output_len = (input.len() as f64 * ratio).ceil() as usize;
        let mut output = Vec::with_capacity(output_len);

        for i in 0..output_len {
            let src = i as f64 / ratio;
            let lo = src.floor() as usize;
            let hi = (lo + 1).min(input.len() - 1);
            let frac = src - lo as f64;

            let sample = input[lo] as f64 * (1.0 - frac) + input[hi] as f64 * frac;
            output.push(sample as i16);
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_rate() {
        let resampler = Resampler::new(16000, 16000);
        let input: Vec<i16> = (0..960).map(|i| (i % 100) as i16).collect();
        assert_eq!(resampler.process(&input), input);
    }

    #[test]
    fn test_upsample_length() {
        let resampler = Resampler::new(16000, 48000);
        let input: Vec<i16> = (0..960).map(|i| ((i as f32 * 0.1).sin() * 8000.0) as i16).collect();
        let output = resampler.process(&input);
        // 16k -> 48k triples the sample count; FFT windowing may trim edges.
        let expected = resampler.output_len(input.len());
        assert!(output.len() >= expected / 2, "output too short: {}", output.len());
    }

    #[test]
    fn test_short_input_uses_linear() {
        let resampler = Resampler::new(16000, 24000);
        let input: Vec<i16> = (0..32).map(|i| i as i16).collect();
        let output = resampler.process(&input);
        assert_eq!(output.len(), 48);
    }

    #[test]
    fn test_empty_input() {
        let resampler = Resampler::new(16000, 48000);
        assert!(resampler.process(&[]).is_empty());
    }
}
