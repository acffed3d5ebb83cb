//! Murmur Test Harness
//!
//! - `chaos`: seeded loss, reordering and duplication over any transport
//! - `harness`: clusters of engines on an in-memory network
//!
//! End-to-end scenarios live in `tests/`, benchmarks in `benches/`.

pub mod chaos;
pub mod harness;

pub use chaos::*;
pub use harness::*;
