//! Murmur Transport Layer - Unreliable datagram conduit
//!
//! This crate provides:
//! - The `DatagramTransport` abstraction (non-blocking send, polled receive)
//! - UDP transport on a tokio socket
//! - In-memory transport for tests and simulations
//!
//! No retransmission, ordering or fragmentation happens here. Payloads
//! larger than the configured MTU are refused.

pub mod memory;
pub mod udp;

pub use memory::*;
pub use udp::*;

use std::net::SocketAddr;

use murmur_core::VoiceResult;

/// Upper bound on datagrams returned by one `receive` call
pub const MAX_DATAGRAMS_PER_POLL: usize = 256;

/// A received datagram
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Datagram {
    pub peer: SocketAddr,
    pub bytes: Vec<u8>,
}

/// Datagram socket abstraction
pub trait DatagramTransport: Send + Sync {
    /// Bound local address
    fn local_addr(&self) -> SocketAddr;

    /// Largest datagram this transport sends or accepts
    fn mtu(&self) -> usize;

    /// Best-effort, non-blocking send. A datagram the socket cannot take
    /// right now is dropped, not queued.
    fn send(&self, dest: SocketAddr, bytes: &[u8]) -> VoiceResult<()>;

    /// Non-blocking poll: every datagram currently waiting (possibly none)
    fn receive(&self) -> VoiceResult<Vec<Datagram>>;
}
