//! PCM frames and negotiated audio parameters

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Fixed-length block of signed 16-bit mono PCM samples
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct PcmFrame {
    samples: Vec<i16>,
}

impl PcmFrame {
    pub fn new(samples: Vec<i16>) -> Self {
        PcmFrame { samples }
    }

    /// A frame of digital silence
    pub fn silence(frame_size: usize) -> Self {
        PcmFrame {
            samples: vec![0; frame_size],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[inline]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    #[inline]
    pub fn samples_mut(&mut self) -> &mut [i16] {
        &mut self.samples
    }

    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }

    /// True if every sample is zero
    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|&s| s == 0)
    }

    /// Peak absolute amplitude
    pub fn peak(&self) -> u16 {
        self.samples
            .iter()
            .map(|s| s.unsigned_abs())
            .max()
            .unwrap_or(0)
    }

    /// Copy of this frame with a linear ramp from `start` to `end` gain applied
    pub fn faded(&self, start: f32, end: f32) -> PcmFrame {
        let n = self.samples.len().max(1) as f32;
        let samples = self
            .samples
            .iter()
            .enumerate()
            .map(|(i, &s)| {
                let gain = start + (end - start) * (i as f32 / n);
                (s as f32 * gain).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
            })
            .collect();
        PcmFrame { samples }
    }
}

impl From<Vec<i16>> for PcmFrame {
    fn from(samples: Vec<i16>) -> Self {
        PcmFrame::new(samples)
    }
}

/// Codec selection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum CodecKind {
    /// Uncompressed little-endian PCM16 (lossless, 2 bytes/sample)
    Pcm = 0x00,
    /// G.711 mu-law companding (1 byte/sample)
    MuLaw = 0x01,
    /// IMA ADPCM (4 bits/sample plus a 3-byte frame header)
    #[default]
    Adpcm = 0x02,
}

impl CodecKind {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(CodecKind::Pcm),
            0x01 => Some(CodecKind::MuLaw),
            0x02 => Some(CodecKind::Adpcm),
            _ => None,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Largest encoded size of a frame of `frame_size` samples
    pub fn max_encoded_len(self, frame_size: usize) -> usize {
        match self {
            CodecKind::Pcm => frame_size * 2,
            CodecKind::MuLaw => frame_size,
            CodecKind::Adpcm => 3 + frame_size.div_ceil(2),
        }
    }

    /// Whether decode(encode(f)) == f for every frame
    pub fn is_lossless(self) -> bool {
        matches!(self, CodecKind::Pcm)
    }
}

/// Connection-negotiated audio parameters (constant for a connection's lifetime)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioParams {
    /// Samples per second
    pub sample_rate: u32,
    /// Samples per frame
    pub frame_size: u16,
    /// Maximum datagram size
    pub mtu: u16,
    /// Codec in use
    pub codec: CodecKind,
}

impl AudioParams {
    /// Wall-clock duration of one frame
    pub fn frame_duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.frame_size as u64 * 1_000_000 / self.sample_rate as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_frame() {
        let frame = PcmFrame::silence(960);
        assert_eq!(frame.len(), 960);
        assert!(frame.is_silent());
        assert_eq!(frame.peak(), 0);
    }

    #[test]
    fn test_fade_out_ends_near_zero() {
        let frame = PcmFrame::new(vec![10_000; 100]);
        let faded = frame.faded(1.0, 0.0);
        assert_eq!(faded.samples()[0], 10_000);
        assert!(faded.samples()[99].abs() < 200);
        assert!(faded.samples()[50] < faded.samples()[10]);
    }

    #[test]
    fn test_frame_duration() {
        let params = AudioParams {
            sample_rate: 48_000,
            frame_size: 960,
            mtu: 1024,
            codec: CodecKind::Adpcm,
        };
        assert_eq!(params.frame_duration(), Duration::from_millis(20));
    }

    #[test]
    fn test_codec_kind_bytes() {
        for kind in [CodecKind::Pcm, CodecKind::MuLaw, CodecKind::Adpcm] {
            assert_eq!(CodecKind::from_byte(kind.to_byte()), Some(kind));
        }
        assert_eq!(CodecKind::from_byte(9), None);
        assert_eq!(CodecKind::Adpcm.max_encoded_len(960), 483);
    }
}
