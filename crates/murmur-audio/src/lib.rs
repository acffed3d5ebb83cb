//! Murmur Audio - receive-side playout
//!
//! - `JitterBuffer`: per-source ring keyed by sequence number, fixed-rate reads
//! - `SourceStream`: jitter buffer + decoder + concealment for one remote source
//! - `Attenuation`: distance falloff
//! - `SpatialMixer`: sums attenuated sources into one frame per listener

pub mod attenuation;
pub mod jitter;
pub mod mixer;
pub mod stream;

pub use attenuation::*;
pub use jitter::*;
pub use mixer::*;
pub use stream::*;
