//! Per-user, per-artifact permission evaluation
//!
//! Permissions are a small flag set over read/write/edit/own, carried on
//! the wire as a letter string ("rwem", order-insensitive). The repair
//! invariant is enforced by [`PermissionSet::normalize`]: write implies
//! read, and revoking read revokes write. Guests can never hold write,
//! edit or own, regardless of what is stored or requested.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::models::{Actor, Role};
use crate::store::TraceStore;

/// One grantable capability on an artifact's mappings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Write,
    Edit,
    Own,
}

impl Action {
    pub fn letter(&self) -> char {
        match self {
            Action::Read => 'r',
            Action::Write => 'w',
            Action::Edit => 'e',
            Action::Own => 'm',
        }
    }

    fn flag(&self) -> PermissionSet {
        match self {
            Action::Read => PermissionSet::READ,
            Action::Write => PermissionSet::WRITE,
            Action::Edit => PermissionSet::EDIT,
            Action::Own => PermissionSet::OWN,
        }
    }
}

impl std::str::FromStr for Action {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "r" | "read" => Ok(Action::Read),
            "w" | "write" => Ok(Action::Write),
            "e" | "edit" => Ok(Action::Edit),
            "m" | "own" | "manage" => Ok(Action::Own),
            other => Err(CoreError::validation(
                "action",
                format!("unknown permission action: {}", other),
            )),
        }
    }
}

/// Flag set over READ|WRITE|EDIT|OWN with named constants, replacing the
/// mutable character-bag string of the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PermissionSet(u8);

impl PermissionSet {
    pub const NONE: PermissionSet = PermissionSet(0);
    pub const READ: PermissionSet = PermissionSet(0b0001);
    pub const WRITE: PermissionSet = PermissionSet(0b0010);
    pub const EDIT: PermissionSet = PermissionSet(0b0100);
    pub const OWN: PermissionSet = PermissionSet(0b1000);

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, other: PermissionSet) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn allows(&self, action: Action) -> bool {
        self.contains(action.flag())
    }

    #[must_use]
    pub fn with(self, other: PermissionSet) -> PermissionSet {
        PermissionSet(self.0 | other.0)
    }

    #[must_use]
    pub fn without(self, other: PermissionSet) -> PermissionSet {
        PermissionSet(self.0 & !other.0)
    }

    /// Parses a letter string. Duplicate letters are accepted, unknown
    /// letters are a validation error.
    pub fn from_letters(s: &str) -> Result<PermissionSet> {
        let mut set = PermissionSet::NONE;
        for c in s.chars() {
            set = match c {
                'r' => set.with(PermissionSet::READ),
                'w' => set.with(PermissionSet::WRITE),
                'e' => set.with(PermissionSet::EDIT),
                'm' => set.with(PermissionSet::OWN),
                other => {
                    return Err(CoreError::validation(
                        "permissions",
                        format!("unknown permission letter: {}", other),
                    ))
                }
            };
        }
        Ok(set)
    }

    /// Canonical letter-string form, always emitted in `rwem` order.
    pub fn as_letters(&self) -> String {
        let mut s = String::new();
        if self.contains(PermissionSet::READ) {
            s.push('r');
        }
        if self.contains(PermissionSet::WRITE) {
            s.push('w');
        }
        if self.contains(PermissionSet::EDIT) {
            s.push('e');
        }
        if self.contains(PermissionSet::OWN) {
            s.push('m');
        }
        s
    }

    /// Applies the repair invariant: write requires read. Idempotent.
    #[must_use]
    pub fn normalize(self) -> PermissionSet {
        if self.contains(PermissionSet::WRITE) {
            self.with(PermissionSet::READ)
        } else {
            self
        }
    }

    /// Grants one action, re-normalizing afterwards.
    #[must_use]
    pub fn grant(self, action: Action) -> PermissionSet {
        self.with(action.flag()).normalize()
    }

    /// Revokes one action. Revoking read also revokes write.
    #[must_use]
    pub fn revoke(self, action: Action) -> PermissionSet {
        let mut set = self.without(action.flag());
        if action == Action::Read {
            set = set.without(PermissionSet::WRITE);
        }
        set
    }

    /// Caps the set for a role: guests may hold read at most. Hard rule,
    /// applied after normalization wherever a set is stored or evaluated.
    #[must_use]
    pub fn capped_for(self, role: Role) -> PermissionSet {
        match role {
            Role::Guest => self
                .without(PermissionSet::WRITE)
                .without(PermissionSet::EDIT)
                .without(PermissionSet::OWN),
            _ => self,
        }
    }
}

impl fmt::Display for PermissionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_letters())
    }
}

impl TryFrom<String> for PermissionSet {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self> {
        PermissionSet::from_letters(&s)
    }
}

impl From<PermissionSet> for String {
    fn from(set: PermissionSet) -> String {
        set.as_letters()
    }
}

/// Stored grant of a permission set to one user on one API artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionEntry {
    pub user_id: Uuid,
    pub api_id: u32,
    pub perms: PermissionSet,
}

/// Per-target result of a bulk permission copy. Cross-artifact mutations
/// may fail partially; callers are told which targets succeeded.
#[derive(Debug, Default)]
pub struct CopyPermissionsOutcome {
    pub copied: Vec<u32>,
    pub failed: Vec<(u32, String)>,
}

impl TraceStore {
    /// Effective permission set for a user on an API artifact: the stored
    /// set, repaired and capped by the user's registered role.
    pub fn permission_for(&self, user_id: Uuid, api_id: u32) -> PermissionSet {
        let stored = self
            .permissions
            .iter()
            .find(|e| e.user_id == user_id && e.api_id == api_id)
            .map(|e| e.perms)
            .unwrap_or(PermissionSet::NONE);
        let role = self
            .users
            .iter()
            .find(|u| u.id == user_id)
            .map(|u| u.role)
            .unwrap_or(Role::User);
        stored.normalize().capped_for(role)
    }

    /// Whether the actor may perform `action` on the artifact's mappings.
    /// Admins pass every check; guests never pass write/edit/own.
    pub fn can(&self, actor: &Actor, api_id: u32, action: Action) -> bool {
        if actor.role == Role::Guest && action != Action::Read {
            return false;
        }
        if actor.role == Role::Admin {
            return true;
        }
        self.permission_for(actor.user_id, api_id)
            .capped_for(actor.role)
            .allows(action)
    }

    pub(crate) fn require(&self, actor: &Actor, api_id: u32, action: Action) -> Result<()> {
        if self.can(actor, api_id, action) {
            Ok(())
        } else {
            Err(CoreError::Permission {
                user_id: actor.user_id,
                api_id,
                action: action.letter(),
            })
        }
    }

    /// Passes if the actor holds any of the listed actions. Used where
    /// write or edit both authorize an operation.
    pub(crate) fn require_any(&self, actor: &Actor, api_id: u32, actions: &[Action]) -> Result<()> {
        if actions.iter().any(|a| self.can(actor, api_id, *a)) {
            Ok(())
        } else {
            Err(CoreError::Permission {
                user_id: actor.user_id,
                api_id,
                action: actions[0].letter(),
            })
        }
    }

    /// Stores a permission set for a user on an artifact, normalized and
    /// role-capped. Replaces any previous entry.
    pub fn set_permission(
        &mut self,
        user_id: Uuid,
        api_id: u32,
        perms: PermissionSet,
    ) -> Result<PermissionSet> {
        let role = self
            .users
            .iter()
            .find(|u| u.id == user_id)
            .ok_or_else(|| CoreError::not_found("user", user_id))?
            .role;
        self.get_api(api_id)?;

        let effective = perms.normalize().capped_for(role);
        if let Some(entry) = self
            .permissions
            .iter_mut()
            .find(|e| e.user_id == user_id && e.api_id == api_id)
        {
            entry.perms = effective;
        } else {
            self.permissions.push(PermissionEntry {
                user_id,
                api_id,
                perms: effective,
            });
        }
        Ok(effective)
    }

    /// Bulk toggles one action across every user holding an entry on the
    /// artifact. The guest ceiling is honored unconditionally even if the
    /// caller requests otherwise. Returns the users whose entry changed.
    pub fn set_all(&mut self, api_id: u32, action: Action, enabled: bool) -> Result<Vec<Uuid>> {
        self.get_api(api_id)?;

        let guests: Vec<Uuid> = self
            .users
            .iter()
            .filter(|u| u.role == Role::Guest)
            .map(|u| u.id)
            .collect();

        let mut updated = Vec::new();
        for entry in self
            .permissions
            .iter_mut()
            .filter(|e| e.api_id == api_id)
        {
            if enabled && action != Action::Read && guests.contains(&entry.user_id) {
                continue;
            }
            let next = if enabled {
                entry.perms.grant(action)
            } else {
                entry.perms.revoke(action)
            };
            if next != entry.perms {
                entry.perms = next;
                updated.push(entry.user_id);
            }
        }
        Ok(updated)
    }

    /// Replicates the full per-user permission table of one artifact onto
    /// others. Requires own on the source. Targets are processed
    /// independently; a missing target fails that target only.
    pub fn copy_permissions(
        &mut self,
        source_api_id: u32,
        target_api_ids: &[u32],
        actor: &Actor,
    ) -> Result<CopyPermissionsOutcome> {
        self.get_api(source_api_id)?;
        self.require(actor, source_api_id, Action::Own)?;

        let source_entries: Vec<PermissionEntry> = self
            .permissions
            .iter()
            .filter(|e| e.api_id == source_api_id)
            .cloned()
            .collect();

        let mut outcome = CopyPermissionsOutcome::default();
        for &target in target_api_ids {
            if target == source_api_id {
                outcome
                    .failed
                    .push((target, "source and target are the same artifact".into()));
                continue;
            }
            if self.get_api(target).is_err() {
                outcome
                    .failed
                    .push((target, format!("api not found: {}", target)));
                continue;
            }
            self.permissions.retain(|e| e.api_id != target);
            for entry in &source_entries {
                self.permissions.push(PermissionEntry {
                    user_id: entry.user_id,
                    api_id: target,
                    perms: entry.perms,
                });
            }
            outcome.copied.push(target);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TraceStore;
    use crate::models::User;

    #[test]
    fn test_normalize_write_implies_read() {
        let p = PermissionSet::from_letters("w").unwrap().normalize();
        assert!(p.allows(Action::Read));
        assert!(p.allows(Action::Write));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for letters in ["", "r", "w", "we", "m", "rwem", "wem", "em"] {
            let p = PermissionSet::from_letters(letters).unwrap();
            assert_eq!(p.normalize(), p.normalize().normalize(), "{}", letters);
        }
    }

    #[test]
    fn test_revoking_read_revokes_write() {
        let p = PermissionSet::from_letters("rwe").unwrap();
        let p = p.revoke(Action::Read);
        assert!(!p.allows(Action::Read));
        assert!(!p.allows(Action::Write));
        assert!(p.allows(Action::Edit));
    }

    #[test]
    fn test_letters_are_order_insensitive() {
        let a = PermissionSet::from_letters("mewr").unwrap();
        let b = PermissionSet::from_letters("rwem").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_letters(), "rwem");
    }

    #[test]
    fn test_unknown_letter_is_rejected() {
        assert!(PermissionSet::from_letters("rx").is_err());
    }

    #[test]
    fn test_guest_cap_strips_mutation_letters() {
        let p = PermissionSet::from_letters("rwem").unwrap();
        assert_eq!(p.capped_for(Role::Guest), PermissionSet::READ);
        assert_eq!(p.capped_for(Role::User), p);
    }

    #[test]
    fn test_guest_can_never_write_regardless_of_stored_string() {
        let mut store = TraceStore::new();
        let admin = store.bootstrap_admin();
        let api_id = store
            .add_api("demo", "libdemo", "1.0", "text".into(), &admin)
            .unwrap();

        let guest = User::new("visitor".into(), Role::Guest);
        let guest_actor = guest.actor();
        let guest_id = guest.id;
        store.users.push(guest);

        // Force a fully-privileged entry into the table behind the
        // evaluator's back; the ceiling must still hold.
        store.permissions.push(PermissionEntry {
            user_id: guest_id,
            api_id,
            perms: PermissionSet::from_letters("rwem").unwrap(),
        });

        assert!(store.can(&guest_actor, api_id, Action::Read));
        assert!(!store.can(&guest_actor, api_id, Action::Write));
        assert!(!store.can(&guest_actor, api_id, Action::Edit));
        assert!(!store.can(&guest_actor, api_id, Action::Own));
    }

    #[test]
    fn test_set_all_excludes_guests_from_write() {
        let mut store = TraceStore::new();
        let admin = store.bootstrap_admin();
        let api_id = store
            .add_api("demo", "libdemo", "1.0", "text".into(), &admin)
            .unwrap();

        let dev = User::new("dev".into(), Role::User);
        let dev_id = dev.id;
        store.users.push(dev);
        let guest = User::new("visitor".into(), Role::Guest);
        let guest_id = guest.id;
        store.users.push(guest);

        store
            .set_permission(dev_id, api_id, PermissionSet::READ)
            .unwrap();
        store
            .set_permission(guest_id, api_id, PermissionSet::READ)
            .unwrap();

        let updated = store.set_all(api_id, Action::Write, true).unwrap();
        assert_eq!(updated, vec![dev_id]);
        assert!(store.permission_for(dev_id, api_id).allows(Action::Write));
        assert!(!store.permission_for(guest_id, api_id).allows(Action::Write));
    }

    #[test]
    fn test_set_all_revoke_read_revokes_write_too() {
        let mut store = TraceStore::new();
        let admin = store.bootstrap_admin();
        let api_id = store
            .add_api("demo", "libdemo", "1.0", "text".into(), &admin)
            .unwrap();
        let dev = User::new("dev".into(), Role::User);
        let dev_id = dev.id;
        store.users.push(dev);
        store
            .set_permission(dev_id, api_id, PermissionSet::from_letters("rw").unwrap())
            .unwrap();

        store.set_all(api_id, Action::Read, false).unwrap();
        let p = store.permission_for(dev_id, api_id);
        assert!(!p.allows(Action::Read));
        assert!(!p.allows(Action::Write));
    }

    #[test]
    fn test_copy_permissions_requires_own_on_source() {
        let mut store = TraceStore::new();
        let admin = store.bootstrap_admin();
        let source = store
            .add_api("a", "lib", "1.0", "text".into(), &admin)
            .unwrap();
        let target = store
            .add_api("b", "lib", "1.0", "text".into(), &admin)
            .unwrap();

        let dev = User::new("dev".into(), Role::User);
        let dev_actor = dev.actor();
        let dev_id = dev.id;
        store.users.push(dev);
        store
            .set_permission(dev_id, source, PermissionSet::from_letters("rw").unwrap())
            .unwrap();

        let err = store
            .copy_permissions(source, &[target], &dev_actor)
            .unwrap_err();
        assert!(matches!(err, CoreError::Permission { .. }));
    }

    #[test]
    fn test_copy_permissions_reports_partial_failure() {
        let mut store = TraceStore::new();
        let admin = store.bootstrap_admin();
        let source = store
            .add_api("a", "lib", "1.0", "text".into(), &admin)
            .unwrap();
        let target = store
            .add_api("b", "lib", "1.0", "text".into(), &admin)
            .unwrap();
        let dev = User::new("dev".into(), Role::User);
        let dev_id = dev.id;
        store.users.push(dev);
        store
            .set_permission(dev_id, source, PermissionSet::from_letters("rwe").unwrap())
            .unwrap();

        let outcome = store
            .copy_permissions(source, &[target, 999], &admin)
            .unwrap();
        assert_eq!(outcome.copied, vec![target]);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].0, 999);
        assert!(store.permission_for(dev_id, target).allows(Action::Edit));
    }
}
