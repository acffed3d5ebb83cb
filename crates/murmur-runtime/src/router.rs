//! Channel router
//!
//! Outbound: turns a destination into the set of connected players that
//! should receive the packet. Inbound: decides per listener whether a
//! decoded source reaches the mixer at all, and how (spatial or direct).
//! Muted and disabled sources are filtered here, before any mixing work.

use std::collections::BTreeSet;

use parking_lot::RwLock;

use murmur_core::{Destination, GroupId, GroupType, PlayerId, VoiceError, VoiceResult};

use crate::{AudioStateStore, GroupRegistry};

/// How an admitted source is heard
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Admission {
    /// Skip distance attenuation (group and whisper audio)
    pub direct: bool,
    /// Listener's volume multiplier for the source
    pub volume: f32,
}

/// Tracks active sources and applies routing rules
#[derive(Debug)]
pub struct ChannelRouter {
    active: RwLock<BTreeSet<PlayerId>>,
    max_whisper_targets: usize,
}

impl ChannelRouter {
    pub fn new(max_whisper_targets: usize) -> Self {
        ChannelRouter {
            active: RwLock::new(BTreeSet::new()),
            max_whisper_targets,
        }
    }

    /// A peer's connection entered `Connected`
    pub fn activate(&self, player: PlayerId) {
        self.active.write().insert(player);
    }

    /// A peer's connection left `Connected`
    pub fn deactivate(&self, player: PlayerId) -> bool {
        self.active.write().remove(&player)
    }

    pub fn is_active(&self, player: PlayerId) -> bool {
        self.active.read().contains(&player)
    }

    pub fn active(&self) -> Vec<PlayerId> {
        self.active.read().iter().copied().collect()
    }

    /// Connected players that should receive audio from `sender`
    pub fn outbound_targets(
        &self,
        sender: PlayerId,
        destination: &Destination,
        groups: &GroupRegistry,
    ) -> VoiceResult<Vec<PlayerId>> {
        let active = self.active.read();
        let targets = match destination {
            Destination::Proximity => active.iter().copied().filter(|&p| p != sender).collect(),
            Destination::Group(group) => {
                if !groups.is_enabled() {
                    return Err(VoiceError::GroupsDisabled);
                }
                if !groups.is_member(sender, *group) {
                    return Err(VoiceError::NotInGroup(sender, *group));
                }
                groups
                    .members(*group)
                    .into_iter()
                    .filter(|p| *p != sender && active.contains(p))
                    .collect()
            }
            Destination::Whisper(targets) => {
                if targets.len() > self.max_whisper_targets {
                    return Err(VoiceError::TooManyWhisperTargets {
                        count: targets.len(),
                        max: self.max_whisper_targets,
                    });
                }
                let unique: BTreeSet<PlayerId> = targets
                    .iter()
                    .copied()
                    .filter(|p| *p != sender && active.contains(p))
                    .collect();
                unique.into_iter().collect()
            }
        };
        Ok(targets)
    }

    /// Whether `listener` hears `source`'s frame sent to `destination`
    pub fn admit(
        &self,
        listener: PlayerId,
        source: PlayerId,
        destination: &Destination,
        groups: &GroupRegistry,
        state: &AudioStateStore,
    ) -> Option<Admission> {
        if listener == source {
            return None;
        }

        let pair = state.lookup(listener, source);
        if pair.source.muted || pair.source.disabled || pair.listener.disabled || pair.volume <= 0.0 {
            return None;
        }

        let direct = match destination {
            Destination::Proximity => {
                if isolated_apart(listener, source, groups) {
                    return None;
                }
                false
            }
            Destination::Group(group) => {
                if !groups.is_enabled()
                    || !groups.is_member(source, *group)
                    || !groups.is_member(listener, *group)
                {
                    return None;
                }
                true
            }
            Destination::Whisper(targets) => {
                if !targets.contains(&listener) {
                    return None;
                }
                true
            }
        };

        Some(Admission {
            direct,
            volume: pair.volume,
        })
    }
}

/// True if either player is inside an isolated group the other is not in
fn isolated_apart(a: PlayerId, b: PlayerId, groups: &GroupRegistry) -> bool {
    let (ga, gb) = (groups.kind_of(a), groups.kind_of(b));
    let isolated = |g: Option<(GroupId, GroupType)>| matches!(g, Some((_, GroupType::Isolated)));
    let same_group = matches!((ga, gb), (Some((x, _)), Some((y, _))) if x == y);
    !same_group && (isolated(ga) || isolated(gb))
}
