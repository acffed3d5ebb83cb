//! Uncompressed PCM16 (little-endian), the lossless mode

use bytes::{Buf, BufMut};

use murmur_core::{CodecKind, PcmFrame, VoiceError, VoiceResult};

use crate::{check_frame_len, VoiceCodec};

#[derive(Clone, Debug)]
pub struct PcmCodec {
    frame_size: usize,
}

impl PcmCodec {
    pub fn new(frame_size: usize) -> Self {
        PcmCodec { frame_size }
    }
}

impl VoiceCodec for PcmCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::Pcm
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn encode(&mut self, frame: &PcmFrame) -> VoiceResult<Vec<u8>> {
        check_frame_len(frame, self.frame_size)?;
        let mut buf = Vec::with_capacity(frame.len() * 2);
        for &sample in frame.samples() {
            buf.put_i16_le(sample);
        }
        Ok(buf)
    }

    fn decode(&mut self, payload: &[u8]) -> VoiceResult<PcmFrame> {
        if payload.len() != self.frame_size * 2 {
            return Err(VoiceError::DecodeError(format!(
                "pcm payload is {} bytes, expected {}",
                payload.len(),
                self.frame_size * 2
            )));
        }
        let mut buf = payload;
        let samples = (0..self.frame_size).map(|_| buf.get_i16_le()).collect::<Vec<_>>();
        Ok(PcmFrame::new(samples))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_pcm_is_bit_exact(samples in proptest::collection::vec(any::<i16>(), 160)) {
            let mut codec = PcmCodec::new(160);
            let frame = PcmFrame::new(samples);
            let payload = codec.encode(&frame).unwrap();
            prop_assert_eq!(codec.decode(&payload).unwrap(), frame);
        }
    }

    #[test]
    fn test_pcm_odd_length_payload_rejected() {
        let mut codec = PcmCodec::new(4);
        assert!(matches!(codec.decode(&[0; 7]), Err(VoiceError::DecodeError(_))));
    }
}
