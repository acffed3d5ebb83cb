//! G.711 mu-law companding
//!
//! Each 16-bit sample becomes one byte: sign, 3-bit segment, 4-bit mantissa,
//! inverted on the wire. Stateless, so any payload of the right length
//! decodes.

use murmur_core::{CodecKind, PcmFrame, VoiceError, VoiceResult};

use crate::{check_frame_len, VoiceCodec};

const BIAS: i32 = 0x84;
const CLIP: i32 = 32_635;

/// Compress one linear sample
pub fn linear_to_mulaw(sample: i16) -> u8 {
    let mut magnitude = sample as i32;
    let sign = if magnitude < 0 {
        magnitude = -magnitude;
        0x80
    } else {
        0x00
    };
    magnitude = magnitude.min(CLIP) + BIAS;

    // Highest set bit above bit 7 picks the segment
    let segment = (31 - (magnitude as u32).leading_zeros()).saturating_sub(7).min(7) as i32;
    let mantissa = (magnitude >> (segment + 3)) & 0x0F;

    !(sign | (segment << 4) | mantissa) as u8
}

/// Expand one mu-law byte
pub fn mulaw_to_linear(byte: u8) -> i16 {
    let byte = !byte;
    let segment = ((byte >> 4) & 0x07) as i32;
    let mantissa = (byte & 0x0F) as i32;
    let magnitude = (((mantissa << 3) + BIAS) << segment) - BIAS;
    if byte & 0x80 != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

#[derive(Clone, Debug)]
pub struct MuLawCodec {
    frame_size: usize,
}

impl MuLawCodec {
    pub fn new(frame_size: usize) -> Self {
        MuLawCodec { frame_size }
    }
}

impl VoiceCodec for MuLawCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::MuLaw
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn encode(&mut self, frame: &PcmFrame) -> VoiceResult<Vec<u8>> {
        check_frame_len(frame, self.frame_size)?;
        Ok(frame.samples().iter().map(|&s| linear_to_mulaw(s)).collect())
    }

    fn decode(&mut self, payload: &[u8]) -> VoiceResult<PcmFrame> {
        if payload.len() != self.frame_size {
            return Err(VoiceError::DecodeError(format!(
                "mu-law payload is {} bytes, expected {}",
                payload.len(),
                self.frame_size
            )));
        }
        Ok(PcmFrame::new(payload.iter().map(|&b| mulaw_to_linear(b)).collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mulaw_known_points() {
        assert_eq!(linear_to_mulaw(0), 0xFF);
        assert_eq!(mulaw_to_linear(0xFF), 0);
        assert_eq!(mulaw_to_linear(0x80), 32_124);
        assert_eq!(mulaw_to_linear(0x00), -32_124);
        // Full-scale inputs clip to the largest code
        assert_eq!(linear_to_mulaw(i16::MAX), 0x80);
        assert_eq!(linear_to_mulaw(i16::MIN), 0x00);
    }

    #[test]
    fn test_mulaw_error_is_bounded() {
        for sample in (-32_000i32..32_000).step_by(97) {
            let sample = sample as i16;
            let back = mulaw_to_linear(linear_to_mulaw(sample));
            let error = (sample as i32 - back as i32).abs();
            // Quantization step grows with the segment; 1/16 of the magnitude plus bias
            assert!(error <= (sample as i32).abs() / 16 + 132, "{} -> {}", sample, back);
        }
    }

    #[test]
    fn test_mulaw_preserves_sign() {
        for sample in [-20_000i16, -300, 300, 20_000] {
            let back = mulaw_to_linear(linear_to_mulaw(sample));
            assert_eq!(back.signum(), sample.signum());
        }
    }

    #[test]
    fn test_mulaw_length_checked() {
        let mut codec = MuLawCodec::new(160);
        assert!(codec.decode(&[0xFF; 159]).is_err());
        assert_eq!(codec.decode(&[0xFF; 160]).unwrap().len(), 160);
    }
}
