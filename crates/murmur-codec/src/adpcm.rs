//! IMA ADPCM
//!
//! Frame layout:
//! - Bytes 0-1: Predictor at frame start (i16 LE)
//! - Byte 2: Step index at frame start (0..=88)
//! - Bytes 3..: 4-bit codes, two per byte, low nibble first
//!
//! The encoder carries predictor state from frame to frame; the header
//! snapshots it so every frame decodes on its own and a lost frame never
//! desynchronizes the decoder.

use bytes::{Buf, BufMut};

use murmur_core::{CodecKind, PcmFrame, VoiceError, VoiceResult};

use crate::{check_frame_len, VoiceCodec};

/// Bytes of per-frame state header
pub const ADPCM_HEADER_SIZE: usize = 3;

const MAX_STEP_INDEX: i32 = 88;

const STEP_TABLE: [i32; 89] = [
    7, 8, 9, 10, 11, 12, 13, 14, 16, 17, 19, 21, 23, 25, 28, 31, 34, 37, 41, 45, 50, 55, 60, 66,
    73, 80, 88, 97, 107, 118, 130, 143, 157, 173, 190, 209, 230, 253, 279, 307, 337, 371, 408,
    449, 494, 544, 598, 658, 724, 796, 876, 963, 1060, 1166, 1282, 1411, 1552, 1707, 1878, 2066,
    2272, 2499, 2749, 3024, 3327, 3660, 4026, 4428, 4871, 5358, 5894, 6484, 7132, 7845, 8630,
    9493, 10442, 11487, 12635, 13899, 15289, 16818, 18500, 20350, 22385, 24623, 27086, 29794,
    32767,
];

const INDEX_TABLE: [i32; 16] = [-1, -1, -1, -1, 2, 4, 6, 8, -1, -1, -1, -1, 2, 4, 6, 8];

/// Predictor state shared by encoder and decoder
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct AdpcmState {
    predictor: i32,
    index: i32,
}

impl AdpcmState {
    fn encode_sample(&mut self, sample: i16) -> u8 {
        let step = STEP_TABLE[self.index as usize];
        let mut diff = sample as i32 - self.predictor;
        let mut code = 0u8;
        if diff < 0 {
            code = 8;
            diff = -diff;
        }

        let mut threshold = step;
        if diff >= threshold {
            code |= 4;
            diff -= threshold;
        }
        threshold >>= 1;
        if diff >= threshold {
            code |= 2;
            diff -= threshold;
        }
        threshold >>= 1;
        if diff >= threshold {
            code |= 1;
        }

        // Track the decoder exactly
        self.decode_sample(code);
        code
    }

    fn decode_sample(&mut self, code: u8) -> i16 {
        let step = STEP_TABLE[self.index as usize];
        let mut delta = step >> 3;
        if code & 4 != 0 {
            delta += step;
        }
        if code & 2 != 0 {
            delta += step >> 1;
        }
        if code & 1 != 0 {
            delta += step >> 2;
        }
        if code & 8 != 0 {
            delta = -delta;
        }

        self.predictor = (self.predictor + delta).clamp(i16::MIN as i32, i16::MAX as i32);
        self.index = (self.index + INDEX_TABLE[code as usize]).clamp(0, MAX_STEP_INDEX);
        self.predictor as i16
    }
}

#[derive(Clone, Debug)]
pub struct AdpcmCodec {
    frame_size: usize,
    encoder: AdpcmState,
}

impl AdpcmCodec {
    pub fn new(frame_size: usize) -> Self {
        AdpcmCodec {
            frame_size,
            encoder: AdpcmState::default(),
        }
    }

    fn payload_len(&self) -> usize {
        ADPCM_HEADER_SIZE + self.frame_size.div_ceil(2)
    }
}

impl VoiceCodec for AdpcmCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::Adpcm
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn encode(&mut self, frame: &PcmFrame) -> VoiceResult<Vec<u8>> {
        check_frame_len(frame, self.frame_size)?;

        let mut buf = Vec::with_capacity(self.payload_len());
        buf.put_i16_le(self.encoder.predictor as i16);
        buf.put_u8(self.encoder.index as u8);

        for pair in frame.samples().chunks(2) {
            let low = self.encoder.encode_sample(pair[0]);
            let high = match pair.get(1) {
                Some(&sample) => self.encoder.encode_sample(sample),
                None => 0,
            };
            buf.put_u8(low | (high << 4));
        }
        Ok(buf)
    }

    fn decode(&mut self, payload: &[u8]) -> VoiceResult<PcmFrame> {
        if payload.len() != self.payload_len() {
            return Err(VoiceError::DecodeError(format!(
                "adpcm payload is {} bytes, expected {}",
                payload.len(),
                self.payload_len()
            )));
        }

        let mut buf = payload;
        let predictor = buf.get_i16_le() as i32;
        let index = buf.get_u8() as i32;
        if index > MAX_STEP_INDEX {
            return Err(VoiceError::DecodeError(format!("adpcm step index {} out of range", index)));
        }

        let mut state = AdpcmState { predictor, index };
        let mut samples = Vec::with_capacity(self.frame_size);
        for &byte in buf {
            samples.push(state.decode_sample(byte & 0x0F));
            if samples.len() < self.frame_size {
                samples.push(state.decode_sample(byte >> 4));
            }
        }
        Ok(PcmFrame::new(samples))
    }
}
