//! Murmur Core - Fundamental types and primitives
//!
//! This crate defines the types shared by every layer of the voice engine:
//! - Identifiers (PlayerId, GroupId, ConnectionId)
//! - PCM frames and negotiated audio parameters
//! - Routing destinations and group types
//! - World positions and the position-lookup capability
//! - Engine configuration and the error taxonomy

pub mod audio;
pub mod config;
pub mod error;
pub mod id;
pub mod position;
pub mod route;

pub use audio::*;
pub use config::*;
pub use error::*;
pub use id::*;
pub use position::*;
pub use route::*;
