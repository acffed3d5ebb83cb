//! Identity types for the voice engine
//!
//! All identifiers are 64-bit and addressed by value. Connections, groups and
//! players live in arenas keyed by these ids; nothing holds a live reference
//! to another record.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Player (audio source / listener) identity, supplied by the host game
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub u64);

impl PlayerId {
    pub const ZERO: PlayerId = PlayerId(0);

    #[inline]
    pub fn new(id: u64) -> Self {
        PlayerId(id)
    }

    #[inline]
    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        PlayerId(u64::from_le_bytes(bytes))
    }
}

impl fmt::Debug for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Player({:016x})", self.0)
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Group identity - unique across all nodes (randomly allocated by the creator)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct GroupId(pub u64);

impl GroupId {
    #[inline]
    pub fn new(id: u64) -> Self {
        GroupId(id)
    }

    #[inline]
    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        GroupId(u64::from_le_bytes(bytes))
    }
}

impl fmt::Debug for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Group({:016x})", self.0)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Connection identity - local to one engine, never sent on the wire
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    #[inline]
    pub fn new(id: u64) -> Self {
        ConnectionId(id)
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Conn({})", self.0)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_id_roundtrip() {
        let id = PlayerId::new(0xDEADBEEF_CAFEBABE);
        assert_eq!(PlayerId::from_bytes(id.to_bytes()), id);
    }

    #[test]
    fn test_display_formats() {
        assert_eq!(PlayerId::new(0xAB).to_string(), "00000000000000ab");
        assert_eq!(format!("{:?}", GroupId::new(1)), "Group(0000000000000001)");
        assert_eq!(format!("{:?}", ConnectionId::new(7)), "Conn(7)");
    }
}
