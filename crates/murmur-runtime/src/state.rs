//! Per-player audio settings
//!
//! Explicit keyed maps: player -> flags and (listener, target) -> volume.
//! Read on every mix tick, written by user action. Writes become visible to
//! the next tick; no stronger ordering is provided.

use std::collections::HashMap;

use parking_lot::RwLock;

use murmur_core::{PlayerId, MAX_VOLUME};

/// Flags for one player
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlayerFlags {
    /// Microphone muted: the player's audio is neither sent nor mixed
    pub muted: bool,
    /// Voice chat disabled: the player neither hears nor is heard
    pub disabled: bool,
}

#[derive(Debug, Default)]
struct Inner {
    flags: HashMap<PlayerId, PlayerFlags>,
    volumes: HashMap<(PlayerId, PlayerId), f32>,
}

/// Shared store of mute, disable and per-listener volume settings
#[derive(Debug, Default)]
pub struct AudioStateStore {
    inner: RwLock<Inner>,
}

impl AudioStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_muted(&self, player: PlayerId, muted: bool) {
        self.inner.write().flags.entry(player).or_default().muted = muted;
    }

    pub fn set_disabled(&self, player: PlayerId, disabled: bool) {
        self.inner.write().flags.entry(player).or_default().disabled = disabled;
    }

    /// Set how loud `target` is for `listener`; clamped to `0.0..=MAX_VOLUME`.
    /// Returns the stored value.
    pub fn set_volume(&self, listener: PlayerId, target: PlayerId, volume: f32) -> f32 {
        let volume = if volume.is_nan() {
            1.0
        } else {
            volume.clamp(0.0, MAX_VOLUME)
        };
        let mut inner = self.inner.write();
        if volume == 1.0 {
            inner.volumes.remove(&(listener, target));
        } else {
            inner.volumes.insert((listener, target), volume);
        }
        volume
    }

    pub fn flags(&self, player: PlayerId) -> PlayerFlags {
        self.inner.read().flags.get(&player).copied().unwrap_or_default()
    }

    pub fn is_muted(&self, player: PlayerId) -> bool {
        self.flags(player).muted
    }

    pub fn is_disabled(&self, player: PlayerId) -> bool {
        self.flags(player).disabled
    }

    /// Volume multiplier of `target` for `listener` (1.0 unless set)
    pub fn volume(&self, listener: PlayerId, target: PlayerId) -> f32 {
        self.inner
            .read()
            .volumes
            .get(&(listener, target))
            .copied()
            .unwrap_or(1.0)
    }

    /// Everything the mixer needs for one (listener, source) pair under a
    /// single read lock
    pub fn lookup(&self, listener: PlayerId, source: PlayerId) -> PairState {
        let inner = self.inner.read();
        PairState {
            listener: inner.flags.get(&listener).copied().unwrap_or_default(),
            source: inner.flags.get(&source).copied().unwrap_or_default(),
            volume: inner.volumes.get(&(listener, source)).copied().unwrap_or(1.0),
        }
    }
}

/// Settings relevant to one listener hearing one source
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PairState {
    pub listener: PlayerFlags,
    pub source: PlayerFlags,
    pub volume: f32,
}
