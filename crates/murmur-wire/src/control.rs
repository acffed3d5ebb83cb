//! Handshake and group control bodies
//!
//! Ping (26 bytes):
//! - Bytes 0-7: Sender player id
//! - Bytes 8-15: Challenge
//! - Bytes 16-19: Sample rate
//! - Bytes 20-21: Frame size
//! - Bytes 22-23: MTU
//! - Byte 24: Codec
//! - Byte 25: Reserved
//!
//! Pong (16 bytes): responder player id + echoed challenge.
//!
//! GroupControl: op byte, group id, then op-specific fields. Strings are a
//! u16 byte length followed by UTF-8.

use bytes::{Buf, BufMut};

use murmur_core::{
    AudioParams, CodecKind, GroupId, GroupType, PlayerId, VoiceError, VoiceResult,
    MAX_GROUP_NAME_LEN, MAX_GROUP_PASSWORD_LEN,
};

use crate::audio::need;

/// Handshake request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ping {
    pub player: PlayerId,
    pub challenge: u64,
    pub params: AudioParams,
}

impl Ping {
    pub const WIRE_SIZE: usize = 26;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::WIRE_SIZE);
        buf.put_u64_le(self.player.0);
        buf.put_u64_le(self.challenge);
        buf.put_u32_le(self.params.sample_rate);
        buf.put_u16_le(self.params.frame_size);
        buf.put_u16_le(self.params.mtu);
        buf.put_u8(self.params.codec.to_byte());
        buf.put_u8(0);
        buf
    }

    pub fn decode(data: &[u8]) -> VoiceResult<Self> {
        let mut buf = data;
        need(&buf, Self::WIRE_SIZE)?;
        let player = PlayerId(buf.get_u64_le());
        let challenge = buf.get_u64_le();
        let sample_rate = buf.get_u32_le();
        let frame_size = buf.get_u16_le();
        let mtu = buf.get_u16_le();
        let codec_byte = buf.get_u8();
        let codec = CodecKind::from_byte(codec_byte)
            .ok_or_else(|| VoiceError::InvalidWireFormat(format!("unknown codec {}", codec_byte)))?;

        Ok(Ping {
            player,
            challenge,
            params: AudioParams {
                sample_rate,
                frame_size,
                mtu,
                codec,
            },
        })
    }
}

/// Handshake acknowledgment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pong {
    pub player: PlayerId,
    pub challenge: u64,
}

impl Pong {
    pub const WIRE_SIZE: usize = 16;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::WIRE_SIZE);
        buf.put_u64_le(self.player.0);
        buf.put_u64_le(self.challenge);
        buf
    }

    pub fn decode(data: &[u8]) -> VoiceResult<Self> {
        let mut buf = data;
        need(&buf, Self::WIRE_SIZE)?;
        Ok(Pong {
            player: PlayerId(buf.get_u64_le()),
            challenge: buf.get_u64_le(),
        })
    }
}

/// Group membership operations carried over the authenticated channel
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GroupControl {
    Create {
        group: GroupId,
        name: String,
        password: Option<String>,
        kind: GroupType,
    },
    Join {
        group: GroupId,
        password: Option<String>,
    },
    Leave {
        group: GroupId,
    },
}

const OP_CREATE: u8 = 0x01;
const OP_JOIN: u8 = 0x02;
const OP_LEAVE: u8 = 0x03;

impl GroupControl {
    pub fn group(&self) -> GroupId {
        match self {
            GroupControl::Create { group, .. }
            | GroupControl::Join { group, .. }
            | GroupControl::Leave { group } => *group,
        }
    }

    pub fn encode(&self) -> VoiceResult<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            GroupControl::Create {
                group,
                name,
                password,
                kind,
            } => {
                buf.put_u8(OP_CREATE);
                buf.put_u64_le(group.0);
                put_string(&mut buf, name, MAX_GROUP_NAME_LEN)?;
                put_optional_string(&mut buf, password.as_deref(), MAX_GROUP_PASSWORD_LEN)?;
                buf.put_u16_le(kind.to_u16());
            }
            GroupControl::Join { group, password } => {
                buf.put_u8(OP_JOIN);
                buf.put_u64_le(group.0);
                put_optional_string(&mut buf, password.as_deref(), MAX_GROUP_PASSWORD_LEN)?;
            }
            GroupControl::Leave { group } => {
                buf.put_u8(OP_LEAVE);
                buf.put_u64_le(group.0);
            }
        }
        Ok(buf)
    }

    pub fn decode(data: &[u8]) -> VoiceResult<Self> {
        let mut buf = data;
        need(&buf, 1 + 8)?;
        let op = buf.get_u8();
        let group = GroupId(buf.get_u64_le());

        let control = match op {
            OP_CREATE => {
                let name = get_string(&mut buf, MAX_GROUP_NAME_LEN)?;
                let password = get_optional_string(&mut buf, MAX_GROUP_PASSWORD_LEN)?;
                need(&buf, 2)?;
                let raw = buf.get_u16_le();
                let kind = GroupType::from_u16(raw).ok_or_else(|| {
                    VoiceError::InvalidWireFormat(format!("unknown group type {}", raw))
                })?;
                GroupControl::Create {
                    group,
                    name,
                    password,
                    kind,
                }
            }
            OP_JOIN => GroupControl::Join {
                group,
                password: get_optional_string(&mut buf, MAX_GROUP_PASSWORD_LEN)?,
            },
            OP_LEAVE => GroupControl::Leave { group },
            other => {
                return Err(VoiceError::InvalidWireFormat(format!(
                    "unknown group op {}",
                    other
                )))
            }
        };

        if buf.has_remaining() {
            return Err(VoiceError::InvalidWireFormat("trailing bytes after group control".into()));
        }
        Ok(control)
    }
}

fn put_string(buf: &mut Vec<u8>, value: &str, max_chars: usize) -> VoiceResult<()> {
    if value.chars().count() > max_chars {
        return Err(VoiceError::InvalidWireFormat(format!(
            "string longer than {} characters",
            max_chars
        )));
    }
    buf.put_u16_le(value.len() as u16);
    buf.put_slice(value.as_bytes());
    Ok(())
}

fn put_optional_string(buf: &mut Vec<u8>, value: Option<&str>, max_chars: usize) -> VoiceResult<()> {
    match value {
        Some(value) => {
            buf.put_u8(1);
            put_string(buf, value, max_chars)
        }
        None => {
            buf.put_u8(0);
            Ok(())
        }
    }
}

fn get_string(buf: &mut &[u8], max_chars: usize) -> VoiceResult<String> {
    need(buf, 2)?;
    let len = buf.get_u16_le() as usize;
    // UTF-8 needs at most four bytes per character
    if len > max_chars * 4 {
        return Err(VoiceError::InvalidWireFormat("string length out of range".into()));
    }
    need(buf, len)?;
    let value = std::str::from_utf8(&buf[..len])
        .map_err(|_| VoiceError::InvalidWireFormat("string is not UTF-8".into()))?
        .to_string();
    buf.advance(len);
    if value.chars().count() > max_chars {
        return Err(VoiceError::InvalidWireFormat("string length out of range".into()));
    }
    Ok(value)
}

fn get_optional_string(buf: &mut &[u8], max_chars: usize) -> VoiceResult<Option<String>> {
    need(buf, 1)?;
    match buf.get_u8() {
        0 => Ok(None),
        1 => get_string(buf, max_chars).map(Some),
        flag => Err(VoiceError::InvalidWireFormat(format!("invalid option flag {}", flag))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_layout() {
        let ping = Ping {
            player: PlayerId::new(5),
            challenge: 0xAABB_CCDD_EEFF_0011,
            params: AudioParams {
                sample_rate: 48_000,
                frame_size: 960,
                mtu: 1024,
                codec: CodecKind::MuLaw,
            },
        };
        let bytes = ping.encode();
        assert_eq!(bytes.len(), Ping::WIRE_SIZE);
        assert_eq!(Ping::decode(&bytes).unwrap(), ping);
    }

    #[test]
    fn test_ping_unknown_codec() {
        let mut bytes = Ping {
            player: PlayerId::new(1),
            challenge: 1,
            params: AudioParams {
                sample_rate: 8_000,
                frame_size: 160,
                mtu: 512,
                codec: CodecKind::Pcm,
            },
        }
        .encode();
        bytes[24] = 0x33;
        assert!(Ping::decode(&bytes).is_err());
    }

    #[test]
    fn test_pong_short_rejected() {
        assert!(matches!(
            Pong::decode(&[0u8; 10]),
            Err(VoiceError::BufferTooShort { .. })
        ));
    }

    #[test]
    fn test_group_create_with_and_without_password() {
        let with = GroupControl::Create {
            group: GroupId::new(3),
            name: "Miners".into(),
            password: Some("hunter2".into()),
            kind: GroupType::Password,
        };
        let without = GroupControl::Create {
            group: GroupId::new(4),
            name: "Über Gruppe".into(),
            password: None,
            kind: GroupType::Isolated,
        };
        for control in [with, without] {
            let bytes = control.encode().unwrap();
            assert_eq!(GroupControl::decode(&bytes).unwrap(), control);
        }
    }

    #[test]
    fn test_group_join_leave() {
        let join = GroupControl::Join {
            group: GroupId::new(9),
            password: None,
        };
        let leave = GroupControl::Leave {
            group: GroupId::new(9),
        };
        assert_eq!(GroupControl::decode(&join.encode().unwrap()).unwrap(), join);
        assert_eq!(GroupControl::decode(&leave.encode().unwrap()).unwrap(), leave);
        assert_eq!(leave.group(), GroupId::new(9));
    }

    #[test]
    fn test_overlong_name_rejected() {
        let control = GroupControl::Create {
            group: GroupId::new(1),
            name: "x".repeat(MAX_GROUP_NAME_LEN + 1),
            password: None,
            kind: GroupType::Open,
        };
        assert!(control.encode().is_err());
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let mut bytes = GroupControl::Create {
            group: GroupId::new(1),
            name: "ab".into(),
            password: None,
            kind: GroupType::Open,
        }
        .encode()
        .unwrap();
        // Name bytes start after op (1), group (8) and length (2)
        bytes[11] = 0xFF;
        assert!(GroupControl::decode(&bytes).is_err());
    }
}
