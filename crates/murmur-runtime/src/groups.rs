//! Group registry
//!
//! Groups are arena records keyed by `GroupId`. Membership is tracked in
//! both directions (group -> members, player -> group) so a player is in at
//! most one group at any instant. Joining another group leaves the current
//! one first.

use std::collections::{BTreeSet, HashMap};

use murmur_core::{
    GroupId, GroupType, PlayerId, VoiceError, VoiceResult, MAX_GROUP_NAME_LEN,
    MAX_GROUP_PASSWORD_LEN,
};
use murmur_crypto::PasswordHash;

/// One group
#[derive(Clone, Debug)]
pub struct Group {
    id: GroupId,
    name: String,
    password: Option<PasswordHash>,
    kind: GroupType,
    members: BTreeSet<PlayerId>,
}

impl Group {
    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> GroupType {
        self.kind
    }

    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }

    pub fn is_member(&self, player: PlayerId) -> bool {
        self.members.contains(&player)
    }

    pub fn members(&self) -> impl Iterator<Item = PlayerId> + '_ {
        self.members.iter().copied()
    }

    fn admits(&self, password: Option<&str>) -> bool {
        match &self.password {
            None => true,
            Some(hash) => password.map_or(false, |p| hash.verify(p)),
        }
    }
}

/// Read-only summary for collaborators
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupInfo {
    pub id: GroupId,
    pub name: String,
    pub kind: GroupType,
    pub has_password: bool,
    pub members: Vec<PlayerId>,
}

impl From<&Group> for GroupInfo {
    fn from(group: &Group) -> Self {
        GroupInfo {
            id: group.id,
            name: group.name.clone(),
            kind: group.kind,
            has_password: group.has_password(),
            members: group.members().collect(),
        }
    }
}

/// What a join changed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JoinOutcome {
    pub joined: GroupId,
    /// Group left to make room, if any
    pub left: Option<GroupId>,
}

/// All groups known to this node
#[derive(Debug)]
pub struct GroupRegistry {
    groups: HashMap<GroupId, Group>,
    membership: HashMap<PlayerId, GroupId>,
    enabled: bool,
    keep_empty: bool,
}

impl GroupRegistry {
    pub fn new(enabled: bool, keep_empty: bool) -> Self {
        GroupRegistry {
            groups: HashMap::new(),
            membership: HashMap::new(),
            enabled,
            keep_empty,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Register a group. Re-creating a known id is a no-op.
    pub fn create(
        &mut self,
        id: GroupId,
        name: &str,
        password: Option<&str>,
        kind: GroupType,
    ) -> VoiceResult<()> {
        self.ensure_enabled()?;
        let name = validate_name(name)?;
        if let Some(password) = password {
            if password.chars().count() > MAX_GROUP_PASSWORD_LEN {
                return Err(VoiceError::InvalidConfig(format!(
                    "group password longer than {} characters",
                    MAX_GROUP_PASSWORD_LEN
                )));
            }
        }
        if kind == GroupType::Password && password.is_none() {
            return Err(VoiceError::InvalidConfig("password group without a password".into()));
        }
        if self.groups.contains_key(&id) {
            return Ok(());
        }

        self.groups.insert(
            id,
            Group {
                id,
                name,
                password: password.map(PasswordHash::new),
                kind,
                members: BTreeSet::new(),
            },
        );
        tracing::debug!(group = %id, ?kind, "group created");
        Ok(())
    }

    /// Add `player` to `group`, leaving any current group first
    pub fn join(
        &mut self,
        player: PlayerId,
        group: GroupId,
        password: Option<&str>,
    ) -> VoiceResult<JoinOutcome> {
        self.ensure_enabled()?;
        let target = self.groups.get(&group).ok_or(VoiceError::GroupNotFound(group))?;
        if !target.admits(password) {
            return Err(VoiceError::WrongPassword(group));
        }

        let left = match self.membership.get(&player).copied() {
            Some(current) if current == group => {
                return Ok(JoinOutcome {
                    joined: group,
                    left: None,
                })
            }
            Some(_) => self.leave(player),
            None => None,
        };

        // Re-borrow mutably now that the old membership is gone
        let target = self.groups.get_mut(&group).ok_or(VoiceError::GroupNotFound(group))?;
        target.members.insert(player);
        self.membership.insert(player, group);
        Ok(JoinOutcome { joined: group, left })
    }

    /// Remove `player` from its group. Returns the group left, if any.
    pub fn leave(&mut self, player: PlayerId) -> Option<GroupId> {
        let group = self.membership.remove(&player)?;
        let now_empty = match self.groups.get_mut(&group) {
            Some(g) => {
                g.members.remove(&player);
                g.members.is_empty()
            }
            None => false,
        };
        if now_empty && !self.keep_empty {
            self.groups.remove(&group);
            tracing::debug!(group = %group, "empty group removed");
        }
        Some(group)
    }

    /// Drop a group and every membership in it
    pub fn remove(&mut self, group: GroupId) -> bool {
        let Some(removed) = self.groups.remove(&group) else {
            return false;
        };
        for player in removed.members() {
            self.membership.remove(&player);
        }
        true
    }

    pub fn group_of(&self, player: PlayerId) -> Option<GroupId> {
        self.membership.get(&player).copied()
    }

    pub fn get(&self, group: GroupId) -> Option<&Group> {
        self.groups.get(&group)
    }

    /// Group type of the group `player` is in
    pub fn kind_of(&self, player: PlayerId) -> Option<(GroupId, GroupType)> {
        let group = self.group_of(player)?;
        self.groups.get(&group).map(|g| (group, g.kind))
    }

    pub fn is_member(&self, player: PlayerId, group: GroupId) -> bool {
        self.group_of(player) == Some(group)
    }

    pub fn members(&self, group: GroupId) -> Vec<PlayerId> {
        self.groups
            .get(&group)
            .map(|g| g.members().collect())
            .unwrap_or_default()
    }

    pub fn list(&self) -> Vec<GroupInfo> {
        let mut groups: Vec<GroupInfo> = self.groups.values().map(GroupInfo::from).collect();
        groups.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.0.cmp(&b.id.0)));
        groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    fn ensure_enabled(&self) -> VoiceResult<()> {
        if self.enabled {
            Ok(())
        } else {
            Err(VoiceError::GroupsDisabled)
        }
    }
}

/// Trimmed, non-empty, at most `MAX_GROUP_NAME_LEN` characters
pub fn validate_name(name: &str) -> VoiceResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(VoiceError::InvalidGroupName("name is empty".into()));
    }
    if trimmed.chars().count() > MAX_GROUP_NAME_LEN {
        return Err(VoiceError::InvalidGroupName(format!(
            "name longer than {} characters",
            MAX_GROUP_NAME_LEN
        )));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(VoiceError::InvalidGroupName("name contains control characters".into()));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: PlayerId = PlayerId(1);
    const BOB: PlayerId = PlayerId(2);

    fn registry() -> GroupRegistry {
        GroupRegistry::new(true, false)
    }

    #[test]
    fn test_create_and_join() {
        let mut reg = registry();
        let g = GroupId::new(10);
        reg.create(g, "  Miners ", None, GroupType::Open).unwrap();
        assert_eq!(reg.get(g).unwrap().name(), "Miners");

        let outcome = reg.join(ALICE, g, None).unwrap();
        assert_eq!(outcome, JoinOutcome { joined: g, left: None });
        assert!(reg.is_member(ALICE, g));
        assert_eq!(reg.members(g), vec![ALICE]);
    }

    #[test]
    fn test_password_checked() {
        let mut reg = registry();
        let g = GroupId::new(11);
        reg.create(g, "Secret", Some("hunter2"), GroupType::Password).unwrap();

        assert!(matches!(reg.join(ALICE, g, None), Err(VoiceError::WrongPassword(_))));
        assert!(matches!(reg.join(ALICE, g, Some("hunter3")), Err(VoiceError::WrongPassword(_))));
        assert!(reg.join(ALICE, g, Some("hunter2")).is_ok());
    }

    #[test]
    fn test_password_group_needs_password() {
        let mut reg = registry();
        assert!(reg.create(GroupId::new(1), "x", None, GroupType::Password).is_err());
    }

    #[test]
    fn test_join_implies_leave() {
        let mut reg = GroupRegistry::new(true, true);
        let (a, b) = (GroupId::new(1), GroupId::new(2));
        reg.create(a, "A", None, GroupType::Open).unwrap();
        reg.create(b, "B", None, GroupType::Open).unwrap();

        reg.join(ALICE, a, None).unwrap();
        let outcome = reg.join(ALICE, b, None).unwrap();
        assert_eq!(outcome.left, Some(a));
        assert_eq!(reg.group_of(ALICE), Some(b));
        assert!(reg.members(a).is_empty());
    }

    #[test]
    fn test_remove_drops_memberships() {
        let mut reg = GroupRegistry::new(true, true);
        let (g, other) = (GroupId::new(4), GroupId::new(5));
        reg.create(g, "G", None, GroupType::Open).unwrap();
        reg.create(other, "Other", None, GroupType::Open).unwrap();
        reg.join(ALICE, g, None).unwrap();
        reg.join(BOB, other, None).unwrap();

        assert!(reg.remove(g));
        assert!(!reg.remove(g));
        assert_eq!(reg.group_of(ALICE), None);
        assert_eq!(reg.group_of(BOB), Some(other));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_rejoin_same_group_is_noop() {
        let mut reg = registry();
        let g = GroupId::new(3);
        reg.create(g, "G", None, GroupType::Open).unwrap();
        reg.join(ALICE, g, None).unwrap();
        // Would otherwise empty and delete the group before re-adding
        assert_eq!(reg.join(ALICE, g, None).unwrap().left, None);
        assert!(reg.get(g).is_some());
    }

    #[test]
    fn test_empty_group_removed_unless_kept() {
        let mut reg = registry();
        let g = GroupId::new(4);
        reg.create(g, "G", None, GroupType::Open).unwrap();
        reg.join(ALICE, g, None).unwrap();
        reg.join(BOB, g, None).unwrap();

        assert_eq!(reg.leave(ALICE), Some(g));
        assert!(reg.get(g).is_some());
        assert_eq!(reg.leave(BOB), Some(g));
        assert!(reg.get(g).is_none());
        assert_eq!(reg.leave(BOB), None);

        let mut kept = GroupRegistry::new(true, true);
        kept.create(g, "G", None, GroupType::Open).unwrap();
        kept.join(ALICE, g, None).unwrap();
        kept.leave(ALICE);
        assert!(kept.get(g).is_some());
    }

    #[test]
    fn test_invalid_names() {
        assert!(matches!(validate_name("   "), Err(VoiceError::InvalidGroupName(_))));
        assert!(validate_name(&"n".repeat(MAX_GROUP_NAME_LEN)).is_ok());
        assert!(validate_name(&"n".repeat(MAX_GROUP_NAME_LEN + 1)).is_err());
        assert!(validate_name("tab\there").is_err());
    }

    #[test]
    fn test_disabled_registry() {
        let mut reg = GroupRegistry::new(false, false);
        assert!(matches!(
            reg.create(GroupId::new(1), "G", None, GroupType::Open),
            Err(VoiceError::GroupsDisabled)
        ));
        assert!(matches!(reg.join(ALICE, GroupId::new(1), None), Err(VoiceError::GroupsDisabled)));
    }

    #[test]
    fn test_unknown_group() {
        let mut reg = registry();
        assert!(matches!(reg.join(ALICE, GroupId::new(99), None), Err(VoiceError::GroupNotFound(_))));
    }
}
