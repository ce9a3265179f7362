//! Audio codec for the outgoing voice track
//!
//! Captured audio is downmixed to mono, resampled to 8 kHz and encoded as
//! G.711 µ-law (PCMU), the one codec every WebRTC endpoint must accept.

use thiserror::Error;

/// PCMU sample rate
pub const PCMU_SAMPLE_RATE: u32 = 8000;

/// Samples per 20 ms PCMU frame
pub const PCMU_FRAME_SAMPLES: usize = 160;

const ULAW_BIAS: i32 = 0x84;
const ULAW_CLIP: i32 = 32635;

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Encode error: {0}")]
    EncodeError(String),

    #[error("Decode error: {0}")]
    DecodeError(String),
}

/// Audio codec trait
pub trait AudioCodec: Send {
    /// Encode mono f32 samples in `[-1.0, 1.0]`
    fn encode(&mut self, samples: &[f32]) -> Result<Vec<u8>, CodecError>;

    /// Decode to mono f32 samples
    fn decode(&mut self, data: &[u8]) -> Result<Vec<f32>, CodecError>;

    fn sample_rate(&self) -> u32;

    /// Samples per frame
    fn frame_size(&self) -> usize;
}

/// G.711 µ-law codec
#[derive(Debug, Default)]
pub struct PcmuCodec;

impl PcmuCodec {
    pub fn new() -> Self {
        Self
    }
}

impl AudioCodec for PcmuCodec {
    fn encode(&mut self, samples: &[f32]) -> Result<Vec<u8>, CodecError> {
        Ok(samples
            .iter()
            .map(|&s| {
                let clamped = s.clamp(-1.0, 1.0);
                linear_to_ulaw((clamped * i16::MAX as f32) as i16)
            })
            .collect())
    }

    fn decode(&mut self, data: &[u8]) -> Result<Vec<f32>, CodecError> {
        Ok(data
            .iter()
            .map(|&b| ulaw_to_linear(b) as f32 / 32768.0)
            .collect())
    }

    fn sample_rate(&self) -> u32 {
        PCMU_SAMPLE_RATE
    }

    fn frame_size(&self) -> usize {
        PCMU_FRAME_SAMPLES
    }
}

/// Encode one 16-bit linear sample as µ-law
pub fn linear_to_ulaw(sample: i16) -> u8 {
    let mut magnitude = sample as i32;
    let sign = if magnitude < 0 {
        magnitude = -magnitude;
        0x80
    } else {
        0
    };
    magnitude = magnitude.min(ULAW_CLIP) + ULAW_BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while magnitude & mask == 0 && exponent > 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (magnitude >> (exponent + 3)) & 0x0F;

    !(sign | (exponent << 4) as i32 | mantissa) as u8
}

/// Decode one µ-law byte to a 16-bit linear sample
pub fn ulaw_to_linear(byte: u8) -> i16 {
    let byte = !byte;
    let sign = byte & 0x80;
    let exponent = (byte >> 4) & 0x07;
    let mantissa = (byte & 0x0F) as i32;

    let magnitude = (((mantissa << 3) + ULAW_BIAS) << exponent) - ULAW_BIAS;
    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Average interleaved frames down to one channel
pub fn downmix(data: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    let channels = channels as usize;
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Streaming linear-interpolation resampler
///
/// Keeps the last input sample and the fractional read position between
/// calls, so feeding a signal in arbitrary chunks gives the same output as
/// feeding it at once.
#[derive(Debug, Clone)]
pub struct Resampler {
    step: f64,
    position: f64,
    last: f32,
}

impl Resampler {
    /// Rates of zero are treated as 1 Hz
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            step: from_rate.max(1) as f64 / to_rate.max(1) as f64,
            position: 0.0,
            last: 0.0,
        }
    }

    /// Resample `input`, appending to `output`
    pub fn process(&mut self, input: &[f32], output: &mut Vec<f32>) {
        if input.is_empty() {
            return;
        }
        let len = input.len() as f64;

        // Index -1 refers to the last sample of the previous chunk
        let sample_at = |i: isize| -> f32 {
            if i < 0 {
                self.last
            } else {
                input[i as usize]
            }
        };

        while self.position + 1.0 < len {
            let index = self.position.floor();
            let frac = (self.position - index) as f32;
            let a = sample_at(index as isize);
            let b = sample_at(index as isize + 1);
            output.push(a + (b - a) * frac);
            self.position += self.step;
        }

        self.last = input[input.len() - 1];
        self.position -= len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_encodes_to_ff() {
        assert_eq!(linear_to_ulaw(0), 0xFF);
        assert_eq!(ulaw_to_linear(0xFF), 0);
    }

    #[test]
    fn test_ulaw_preserves_sign_and_magnitude() {
        for sample in [100i16, 1000, 8000, 20000, 32000] {
            let pos = ulaw_to_linear(linear_to_ulaw(sample));
            let neg = ulaw_to_linear(linear_to_ulaw(-sample));

            assert!(pos > 0);
            assert_eq!(neg, -pos);
            // Segment quantisation error stays below 1/16 of the value plus bias
            let error = (pos as i32 - sample as i32).abs();
            assert!(
                error <= sample as i32 / 16 + 8,
                "sample {} decoded as {}",
                sample,
                pos
            );
        }
    }

    #[test]
    fn test_ulaw_is_monotonic() {
        let mut previous = i16::MIN;
        for sample in (-32000i32..32000).step_by(250) {
            let decoded = ulaw_to_linear(linear_to_ulaw(sample as i16));
            assert!(decoded >= previous);
            previous = decoded;
        }
    }

    #[test]
    fn test_extremes_clip_without_overflow() {
        let max = ulaw_to_linear(linear_to_ulaw(i16::MAX));
        let min = ulaw_to_linear(linear_to_ulaw(i16::MIN));
        assert!(max > 30000);
        assert_eq!(min, -max);
    }

    #[test]
    fn test_pcmu_codec_frame() {
        let mut codec = PcmuCodec::new();
        let samples: Vec<f32> = (0..PCMU_FRAME_SAMPLES)
            .map(|i| (i as f32 * 0.1).sin() * 0.5)
            .collect();

        let encoded = codec.encode(&samples).unwrap();
        assert_eq!(encoded.len(), PCMU_FRAME_SAMPLES);

        let decoded = codec.decode(&encoded).unwrap();
        for (a, b) in samples.iter().zip(decoded.iter()) {
            assert!((a - b).abs() < 0.02, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_downmix_stereo() {
        let mono = downmix(&[1.0, 0.0, 0.5, 0.5, -1.0, 1.0], 2);
        assert_eq!(mono, vec![0.5, 0.5, 0.0]);
        assert_eq!(downmix(&[0.25, 0.75], 1), vec![0.25, 0.75]);
    }

    #[test]
    fn test_resample_48k_to_8k() {
        let mut resampler = Resampler::new(48000, PCMU_SAMPLE_RATE);
        let mut output = Vec::new();

        for _ in 0..10 {
            resampler.process(&[0.5; 480], &mut output);
        }

        assert_eq!(output.len(), 800);
        assert!(output.iter().all(|s| (*s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_resample_is_chunk_independent() {
        let signal: Vec<f32> = (0..960).map(|i| (i as f32 * 0.01).sin()).collect();

        let mut whole = Vec::new();
        Resampler::new(44100, PCMU_SAMPLE_RATE).process(&signal, &mut whole);

        let mut chunked = Vec::new();
        let mut resampler = Resampler::new(44100, PCMU_SAMPLE_RATE);
        for chunk in signal.chunks(137) {
            resampler.process(chunk, &mut chunked);
        }

        assert_eq!(whole.len(), chunked.len());
        for (a, b) in whole.iter().zip(chunked.iter()) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_zero_input_rate_terminates() {
        let mut resampler = Resampler::new(0, 8);
        let mut output = Vec::new();

        resampler.process(&[0.5; 4], &mut output);

        // 1 Hz to 8 Hz: eight outputs per input interval
        assert_eq!(output.len(), 24);
        assert!(output.iter().all(|s| (*s - 0.5).abs() < 1e-6));
    }
}
