//! Murmur Crypto - Per-connection packet protection
//!
//! Provides the cryptographic pieces of the voice transport:
//! - AEAD encryption (ChaCha20-Poly1305)
//! - Crypto sessions with per-direction keys and sequence-derived nonces
//! - Replay protection
//! - Salted group password verification

pub mod aead;
pub mod password;
pub mod replay;
pub mod session;

pub use aead::*;
pub use password::*;
pub use replay::*;
pub use session::*;
