//! World positions and the position-lookup capability

use crate::PlayerId;

/// Position in world space (blocks)
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub const ORIGIN: Position = Position {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    #[inline]
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Position { x, y, z }
    }

    /// Euclidean distance
    pub fn distance(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Capability supplied by the host world to resolve player positions
///
/// Returns `None` when the player is unknown or not currently placed in the
/// world; such players cannot be heard through proximity audio.
pub trait PositionLookup: Send + Sync {
    fn position(&self, player: PlayerId) -> Option<Position>;
}

impl<F> PositionLookup for F
where
    F: Fn(PlayerId) -> Option<Position> + Send + Sync,
{
    fn position(&self, player: PlayerId) -> Option<Position> {
        self(player)
    }
}
