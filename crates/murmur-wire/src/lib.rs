//! Murmur Wire Protocol - Binary packet format
//!
//! Every datagram is:
//! - Packet header (5 bytes): type + sequence number
//! - Handshake nonce (16 bytes, Ping and Pong only)
//! - Sealed body: AEAD ciphertext followed by a 16-byte tag
//!
//! Everything before the sealed body travels in the clear and is bound to
//! the body as associated data. This crate encodes the header and the plaintext bodies; sealing is
//! done by `murmur-crypto`.

pub mod audio;
pub mod control;
pub mod header;

pub use audio::*;
pub use control::*;
pub use header::*;
