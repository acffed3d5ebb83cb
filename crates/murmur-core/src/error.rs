//! Error types for the voice engine

use thiserror::Error;

use crate::{ConnectionId, GroupId, PlayerId};

/// Voice engine errors
///
/// Only lifecycle failures are meant to reach the collaborator layer (see
/// [`VoiceError::is_lifecycle`]). Per-packet and per-frame failures are
/// recovered locally as a drop or a silence frame.
#[derive(Error, Debug)]
pub enum VoiceError {
    // Lifecycle errors
    #[error("Handshake timed out for connection {0}")]
    HandshakeTimeout(ConnectionId),

    #[error("Connection not found: {0}")]
    ConnectionNotFound(ConnectionId),

    #[error("Connection {0} is closed")]
    ConnectionClosed(ConnectionId),

    // Per-packet errors
    #[error("Authentication failed")]
    AuthError,

    #[error("Replay detected: seq {0}")]
    ReplayDetected(u32),

    #[error("Decode failed: {0}")]
    DecodeError(String),

    #[error("Jitter window exceeded: seq {seq} is {ahead} frames ahead of playout")]
    BufferOverrun { seq: u32, ahead: u32 },

    // Wire errors
    #[error("Invalid wire format: {0}")]
    InvalidWireFormat(String),

    #[error("Buffer too short: expected {expected}, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },

    #[error("Unknown packet type: {0}")]
    UnknownPacketType(u8),

    #[error("Payload too large: {size} > MTU {mtu}")]
    PayloadTooLarge { size: usize, mtu: usize },

    // Transport errors
    #[error("Transport error: {0}")]
    TransportError(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Group and routing errors
    #[error("Groups are disabled")]
    GroupsDisabled,

    #[error("Group not found: {0:?}")]
    GroupNotFound(GroupId),

    #[error("Wrong password for group {0:?}")]
    WrongPassword(GroupId),

    #[error("Invalid group name: {0}")]
    InvalidGroupName(String),

    #[error("Player {0:?} is not in group {1:?}")]
    NotInGroup(PlayerId, GroupId),

    #[error("Too many whisper targets: {count} > {max}")]
    TooManyWhisperTargets { count: usize, max: usize },
}

impl VoiceError {
    /// Errors that describe the fate of a connection and are surfaced upward
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            VoiceError::HandshakeTimeout(_)
                | VoiceError::ConnectionNotFound(_)
                | VoiceError::ConnectionClosed(_)
        )
    }
}

/// Result type for voice engine operations
pub type VoiceResult<T> = Result<T, VoiceError>;
