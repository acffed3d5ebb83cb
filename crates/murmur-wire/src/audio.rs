//! Audio packet body
//!
//! Layout (all integers LE):
//! - Bytes 0-3: Per-source sequence number
//! - Bytes 4-11: Capture timestamp (ms)
//! - Bytes 12-19: Source player id
//! - Byte 20: Destination tag
//! - Destination data: none (proximity), group id (8), or count (1) + ids (8 each)
//! - Payload length (2) + compressed payload

use bytes::{Buf, BufMut};

use murmur_core::{Destination, GroupId, PlayerId, VoiceError, VoiceResult};

/// Largest whisper recipient set the wire format can carry
pub const MAX_WIRE_WHISPER_TARGETS: usize = u8::MAX as usize;

/// Encoded size of the audio fields without destination data or payload
const AUDIO_FIXED_SIZE: usize = 4 + 8 + 8 + 1 + 2;

/// One captured, encoded audio frame
///
/// Immutable once built; consumed by whichever stage needs it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioPacket {
    sequence: u32,
    timestamp_ms: u64,
    source: PlayerId,
    destination: Destination,
    payload: Vec<u8>,
}

impl AudioPacket {
    pub fn new(
        sequence: u32,
        timestamp_ms: u64,
        source: PlayerId,
        destination: Destination,
        payload: Vec<u8>,
    ) -> Self {
        AudioPacket {
            sequence,
            timestamp_ms,
            source,
            destination,
            payload,
        }
    }

    #[inline]
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    #[inline]
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    #[inline]
    pub fn source(&self) -> PlayerId {
        self.source
    }

    #[inline]
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Take apart into destination and payload
    pub fn into_parts(self) -> (Destination, Vec<u8>) {
        (self.destination, self.payload)
    }

    /// Encoded body size
    pub fn encoded_len(&self) -> usize {
        AUDIO_FIXED_SIZE + destination_len(&self.destination) + self.payload.len()
    }

    /// Encode the plaintext body
    pub fn encode(&self) -> VoiceResult<Vec<u8>> {
        if self.payload.len() > u16::MAX as usize {
            return Err(VoiceError::InvalidWireFormat("audio payload too large".into()));
        }
        if let Destination::Whisper(targets) = &self.destination {
            if targets.len() > MAX_WIRE_WHISPER_TARGETS {
                return Err(VoiceError::TooManyWhisperTargets {
                    count: targets.len(),
                    max: MAX_WIRE_WHISPER_TARGETS,
                });
            }
        }

        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.put_u32_le(self.sequence);
        buf.put_u64_le(self.timestamp_ms);
        buf.put_u64_le(self.source.0);
        buf.put_u8(self.destination.tag());
        match &self.destination {
            Destination::Proximity => {}
            Destination::Group(group) => buf.put_u64_le(group.0),
            Destination::Whisper(targets) => {
                buf.put_u8(targets.len() as u8);
                for target in targets {
                    buf.put_u64_le(target.0);
                }
            }
        }
        buf.put_u16_le(self.payload.len() as u16);
        buf.put_slice(&self.payload);
        Ok(buf)
    }

    /// Decode a plaintext body
    pub fn decode(data: &[u8]) -> VoiceResult<Self> {
        let mut buf = data;
        need(&buf, 4 + 8 + 8 + 1)?;
        let sequence = buf.get_u32_le();
        let timestamp_ms = buf.get_u64_le();
        let source = PlayerId(buf.get_u64_le());

        let destination = match buf.get_u8() {
            0x00 => Destination::Proximity,
            0x01 => {
                need(&buf, 8)?;
                Destination::Group(GroupId(buf.get_u64_le()))
            }
            0x02 => {
                need(&buf, 1)?;
                let count = buf.get_u8() as usize;
                need(&buf, count * 8)?;
                Destination::Whisper((0..count).map(|_| PlayerId(buf.get_u64_le())).collect())
            }
            tag => {
                return Err(VoiceError::InvalidWireFormat(format!(
                    "unknown destination tag {}",
                    tag
                )))
            }
        };

        need(&buf, 2)?;
        let len = buf.get_u16_le() as usize;
        need(&buf, len)?;
        let payload = buf[..len].to_vec();
        buf.advance(len);

        if buf.has_remaining() {
            return Err(VoiceError::InvalidWireFormat("trailing bytes after audio payload".into()));
        }

        Ok(AudioPacket {
            sequence,
            timestamp_ms,
            source,
            destination,
            payload,
        })
    }
}

fn destination_len(destination: &Destination) -> usize {
    match destination {
        Destination::Proximity => 0,
        Destination::Group(_) => 8,
        Destination::Whisper(targets) => 1 + 8 * targets.len(),
    }
}

/// Fail with `BufferTooShort` unless `n` more bytes are available
pub(crate) fn need(buf: &&[u8], n: usize) -> VoiceResult<()> {
    if buf.remaining() < n {
        return Err(VoiceError::BufferTooShort {
            expected: n,
            actual: buf.remaining(),
        });
    }
    Ok(())
}
