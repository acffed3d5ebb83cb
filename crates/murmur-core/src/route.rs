//! Routing classes for audio and group types

use serde::{Deserialize, Serialize};

use crate::{GroupId, PlayerId};

/// Destination classification of an audio packet
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Destination {
    /// Every connected player; attenuated by distance on the listener side
    Proximity,
    /// Members of one group, no distance attenuation
    Group(GroupId),
    /// An explicit bounded recipient set, no distance attenuation
    Whisper(Vec<PlayerId>),
}

impl Destination {
    /// Wire tag for the destination class
    #[inline]
    pub fn tag(&self) -> u8 {
        match self {
            Destination::Proximity => 0x00,
            Destination::Group(_) => 0x01,
            Destination::Whisper(_) => 0x02,
        }
    }

    /// Group and whisper audio are never attenuated by distance
    #[inline]
    pub fn bypasses_distance(&self) -> bool {
        !matches!(self, Destination::Proximity)
    }

    /// Whether `player` is an addressed recipient (proximity addresses everyone)
    pub fn addresses(&self, player: PlayerId) -> bool {
        match self {
            Destination::Whisper(targets) => targets.contains(&player),
            _ => true,
        }
    }
}

/// Group type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u16)]
pub enum GroupType {
    /// Anyone may join; members still hear and are heard by nearby non-members
    #[default]
    Open = 0,
    /// Joining requires the group password
    Password = 1,
    /// Members' proximity audio is hidden from non-members and vice versa
    Isolated = 2,
}

impl GroupType {
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0 => Some(GroupType::Open),
            1 => Some(GroupType::Password),
            2 => Some(GroupType::Isolated),
            _ => None,
        }
    }

    #[inline]
    pub fn to_u16(self) -> u16 {
        self as u16
    }
}
