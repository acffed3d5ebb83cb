//! Murmur Runtime - Voice engine orchestration
//!
//! Three decoupled pipelines around shared, id-keyed state:
//! 1. Capture: encode -> route -> seal -> send
//! 2. Receive: poll -> open -> buffer (per-source jitter buffer)
//! 3. Mix: read every source once per tick -> admit per listener -> mix
//!
//! Connections, groups and per-player audio settings live in arenas keyed
//! by `ConnectionId`, `GroupId` and `PlayerId`.

pub mod connection;
pub mod engine;
pub mod groups;
pub mod logging;
pub mod manager;
pub mod router;
pub mod state;
pub mod stats;

pub use connection::*;
pub use engine::*;
pub use groups::*;
pub use logging::*;
pub use manager::*;
pub use router::*;
pub use state::*;
pub use stats::*;
