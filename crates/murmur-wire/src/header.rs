//! Packet header for the wire protocol
//!
//! Header is 5 bytes:
//! - Byte 0: Packet type
//! - Bytes 1-4: Sequence number (LE)
//!
//! The sequence number is per connection and per direction. It selects the
//! AEAD nonce, so the header is authenticated but not encrypted.
//!
//! Ping and Pong additionally carry the sender's 16-byte handshake nonce in
//! the clear between header and sealed body. Both nonces feed the key
//! derivation, so every handshake yields its own keys.

use bytes::{Buf, BufMut};

use murmur_core::{VoiceError, VoiceResult};

/// Header size in bytes
pub const HEADER_SIZE: usize = 5;

/// AEAD tag size carried at the end of every sealed body
pub const TAG_SIZE: usize = 16;

/// Smallest valid datagram (header + empty sealed body)
pub const MIN_PACKET_SIZE: usize = HEADER_SIZE + TAG_SIZE;

/// Random per-handshake value carried in the clear by Ping and Pong
pub const HANDSHAKE_NONCE_SIZE: usize = 16;

pub type HandshakeNonce = [u8; HANDSHAKE_NONCE_SIZE];

/// Packet type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Handshake request carrying the authentication challenge
    Ping = 0x01,
    /// Handshake acknowledgment echoing the challenge
    Pong = 0x02,
    /// Liveness refresh on a connected link
    KeepAlive = 0x03,
    /// Encoded audio frame
    Audio = 0x04,
    /// Group create/join/leave
    GroupControl = 0x05,
    /// Explicit close
    Disconnect = 0x06,
}

impl PacketType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(PacketType::Ping),
            0x02 => Some(PacketType::Pong),
            0x03 => Some(PacketType::KeepAlive),
            0x04 => Some(PacketType::Audio),
            0x05 => Some(PacketType::GroupControl),
            0x06 => Some(PacketType::Disconnect),
            _ => None,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Handshake packets are accepted before the link is connected
    #[inline]
    pub fn is_handshake(self) -> bool {
        matches!(self, PacketType::Ping | PacketType::Pong)
    }
}

/// Packet header
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacketHeader {
    pub packet_type: PacketType,
    pub sequence: u32,
}

impl PacketHeader {
    pub fn new(packet_type: PacketType, sequence: u32) -> Self {
        PacketHeader {
            packet_type,
            sequence,
        }
    }

    /// Parse header from the front of a datagram
    pub fn parse(buf: &[u8]) -> VoiceResult<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(VoiceError::BufferTooShort {
                expected: HEADER_SIZE,
                actual: buf.len(),
            });
        }

        let mut cursor = buf;
        let type_byte = cursor.get_u8();
        let packet_type =
            PacketType::from_byte(type_byte).ok_or(VoiceError::UnknownPacketType(type_byte))?;
        let sequence = cursor.get_u32_le();

        Ok(PacketHeader {
            packet_type,
            sequence,
        })
    }

    /// Append header bytes to a buffer
    pub fn write(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.packet_type.to_byte());
        buf.put_u32_le(self.sequence);
    }

    /// Serialize header to a fixed array (also used as AEAD associated data)
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        let mut slice = &mut out[..];
        self.write(&mut slice);
        out
    }
}

/// Split a datagram into its header and sealed body
pub fn split_datagram(buf: &[u8]) -> VoiceResult<(PacketHeader, &[u8])> {
    if buf.len() < MIN_PACKET_SIZE {
        return Err(VoiceError::BufferTooShort {
            expected: MIN_PACKET_SIZE,
            actual: buf.len(),
        });
    }
    let header = PacketHeader::parse(buf)?;
    Ok((header, &buf[HEADER_SIZE..]))
}

/// Split a Ping or Pong into header, the sender's handshake nonce and the
/// sealed body
pub fn split_handshake(buf: &[u8]) -> VoiceResult<(PacketHeader, HandshakeNonce, &[u8])> {
    let (header, rest) = split_datagram(buf)?;
    if !header.packet_type.is_handshake() {
        return Err(VoiceError::InvalidWireFormat(format!(
            "{:?} carries no handshake nonce",
            header.packet_type
        )));
    }
    if rest.len() < HANDSHAKE_NONCE_SIZE + TAG_SIZE {
        return Err(VoiceError::BufferTooShort {
            expected: HEADER_SIZE + HANDSHAKE_NONCE_SIZE + TAG_SIZE,
            actual: buf.len(),
        });
    }
    let mut nonce = [0u8; HANDSHAKE_NONCE_SIZE];
    nonce.copy_from_slice(&rest[..HANDSHAKE_NONCE_SIZE]);
    Ok((header, nonce, &rest[HANDSHAKE_NONCE_SIZE..]))
}

/// Assemble a datagram from a header and sealed body, enforcing the MTU
pub fn assemble_datagram(header: &PacketHeader, sealed: &[u8], mtu: usize) -> VoiceResult<Vec<u8>> {
    let size = HEADER_SIZE + sealed.len();
    if size > mtu {
        return Err(VoiceError::PayloadTooLarge { size, mtu });
    }
    let mut out = Vec::with_capacity(size);
    header.write(&mut out);
    out.extend_from_slice(sealed);
    Ok(out)
}
