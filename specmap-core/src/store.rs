//! Canonical in-memory store for work items, mapping relations, users,
//! permissions and version history
//!
//! The store is pure data plus operations; persistence lives behind the
//! database backends. Every mutation takes the acting user explicitly and
//! is permission-gated against the owning API artifact.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::coverage;
use crate::error::{CoreError, Result};
use crate::models::{
    relation_table, Actor, MappingRelation, ParentKind, ParentRef, Role, User, WorkItem,
    WorkItemData, WorkItemKind, WorkItemRef, UNMATCHED_SECTION,
};
use crate::permission::{Action, PermissionEntry, PermissionSet};
use crate::version::VersionRecord;

fn default_counter() -> u32 {
    1
}

/// Per-kind monotonic identifier counters, serialized with the store so
/// identifiers are unique within a kind and never reused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdCounters {
    #[serde(default = "default_counter")]
    pub next_api: u32,
    #[serde(default = "default_counter")]
    pub next_requirement: u32,
    #[serde(default = "default_counter")]
    pub next_test_specification: u32,
    #[serde(default = "default_counter")]
    pub next_test_case: u32,
    #[serde(default = "default_counter")]
    pub next_justification: u32,
    #[serde(default = "default_counter")]
    pub next_document: u32,
    #[serde(default = "default_counter")]
    pub next_relation: u32,
}

impl Default for IdCounters {
    fn default() -> Self {
        Self {
            next_api: 1,
            next_requirement: 1,
            next_test_specification: 1,
            next_test_case: 1,
            next_justification: 1,
            next_document: 1,
            next_relation: 1,
        }
    }
}

impl IdCounters {
    pub(crate) fn next_for(&mut self, kind: WorkItemKind) -> u32 {
        let slot = match kind {
            WorkItemKind::Api => &mut self.next_api,
            WorkItemKind::Requirement => &mut self.next_requirement,
            WorkItemKind::TestSpecification => &mut self.next_test_specification,
            WorkItemKind::TestCase => &mut self.next_test_case,
            WorkItemKind::Justification => &mut self.next_justification,
            WorkItemKind::Document => &mut self.next_document,
        };
        let id = *slot;
        *slot += 1;
        id
    }

    pub(crate) fn next_relation(&mut self) -> u32 {
        let id = self.next_relation;
        self.next_relation += 1;
        id
    }
}

/// Partial update applied to a mapping relation. `None` fields keep the
/// previous value.
#[derive(Debug, Clone, Default)]
pub struct MappingUpdate {
    pub section: Option<String>,
    pub offset: Option<usize>,
    pub coverage: Option<u32>,
}

/// Counts reported by `db stats`.
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub api_count: usize,
    pub requirement_count: usize,
    pub test_specification_count: usize,
    pub test_case_count: usize,
    pub justification_count: usize,
    pub document_count: usize,
    pub relation_count: usize,
    pub user_count: usize,
    pub version_count: usize,
}

/// Collection of all traceability data for one database.
#[derive(Debug, Serialize, Deserialize)]
pub struct TraceStore {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub work_items: Vec<WorkItem>,
    #[serde(default)]
    pub relations: Vec<MappingRelation>,
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub permissions: Vec<PermissionEntry>,
    #[serde(default)]
    pub history: Vec<VersionRecord>,
    #[serde(default)]
    pub counters: IdCounters,
}

impl TraceStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            name: String::new(),
            work_items: Vec::new(),
            relations: Vec::new(),
            users: Vec::new(),
            permissions: Vec::new(),
            history: Vec::new(),
            counters: IdCounters::default(),
        }
    }

    /// Returns the resident admin user's actor, registering the user on
    /// first use. Local single-operator databases start from this.
    pub fn bootstrap_admin(&mut self) -> Actor {
        if let Some(user) = self.users.iter().find(|u| u.handle == "admin") {
            return user.actor();
        }
        let user = User::new("admin".into(), Role::Admin);
        let actor = user.actor();
        self.users.push(user);
        actor
    }

    /// Registers a new user. Handles are unique.
    pub fn add_user(&mut self, handle: &str, role: Role) -> Result<Uuid> {
        if handle.trim().is_empty() {
            return Err(CoreError::validation("handle", "handle must not be empty"));
        }
        if self.users.iter().any(|u| u.handle == handle) {
            return Err(CoreError::validation(
                "handle",
                format!("handle already taken: {}", handle),
            ));
        }
        let user = User::new(handle.to_string(), role);
        let id = user.id;
        self.users.push(user);
        Ok(id)
    }

    pub fn get_user_by_handle(&self, handle: &str) -> Option<&User> {
        self.users.iter().find(|u| u.handle == handle)
    }

    /// Creates a root specification artifact. The creator is granted the
    /// full permission set on it. Guests cannot create artifacts.
    pub fn add_api(
        &mut self,
        name: &str,
        library: &str,
        library_version: &str,
        raw_specification: String,
        actor: &Actor,
    ) -> Result<u32> {
        if actor.role == Role::Guest {
            return Err(CoreError::Permission {
                user_id: actor.user_id,
                api_id: 0,
                action: Action::Write.letter(),
            });
        }
        if name.trim().is_empty() {
            return Err(CoreError::validation("name", "api name must not be empty"));
        }
        let data = WorkItemData::Api {
            name: name.to_string(),
            library: library.to_string(),
            library_version: library_version.to_string(),
            raw_specification,
        };
        let item_ref = self.add_work_item(data, actor)?;

        let perms = PermissionSet::READ
            .with(PermissionSet::WRITE)
            .with(PermissionSet::EDIT)
            .with(PermissionSet::OWN);
        if self.users.iter().any(|u| u.id == actor.user_id) {
            self.set_permission(actor.user_id, item_ref.id, perms)?;
        }
        Ok(item_ref.id)
    }

    pub fn get_api(&self, id: u32) -> Result<&WorkItem> {
        self.work_items
            .iter()
            .find(|w| w.kind() == WorkItemKind::Api && w.id == id)
            .ok_or_else(|| CoreError::not_found("api", id))
    }

    pub fn list_apis(&self) -> Vec<&WorkItem> {
        self.work_items
            .iter()
            .filter(|w| w.kind() == WorkItemKind::Api)
            .collect()
    }

    pub fn get_work_item(&self, item: WorkItemRef) -> Option<&WorkItem> {
        self.work_items
            .iter()
            .find(|w| w.kind() == item.kind && w.id == item.id)
    }

    pub(crate) fn fetch_work_item(&self, item: WorkItemRef) -> Result<&WorkItem> {
        self.get_work_item(item)
            .ok_or_else(|| CoreError::not_found("work item", item))
    }

    pub fn get_relation(&self, relation_id: u32) -> Option<&MappingRelation> {
        self.relations
            .iter()
            .find(|r| r.relation_id == relation_id)
    }

    pub(crate) fn fetch_relation(&self, relation_id: u32) -> Result<&MappingRelation> {
        self.get_relation(relation_id)
            .ok_or_else(|| CoreError::not_found("mapping relation", relation_id))
    }

    /// Inserts a work item with a fresh per-kind id, recording version 1.
    pub(crate) fn add_work_item(
        &mut self,
        data: WorkItemData,
        actor: &Actor,
    ) -> Result<WorkItemRef> {
        let kind = data.kind();
        let id = self.counters.next_for(kind);
        let item = WorkItem {
            id,
            version: 1,
            created_at: Utc::now(),
            created_by: actor.user_id,
            data,
        };
        let item_ref = item.item_ref();
        self.work_items.push(item);
        self.record_version(item_ref, None, actor)?;
        Ok(item_ref)
    }

    /// API artifact a parent reference ultimately belongs to: the parent
    /// itself for api parents, otherwise the nearest api reachable by
    /// walking relations rootward (smallest id wins when a work item is
    /// mapped under several apis).
    pub fn owning_api(&self, parent: ParentRef) -> Result<u32> {
        if parent.kind == ParentKind::Api {
            self.get_api(parent.id)?;
            return Ok(parent.id);
        }
        let start = WorkItemRef {
            kind: parent.kind.as_work_item_kind(),
            id: parent.id,
        };
        let mut frontier = vec![start];
        let mut seen = vec![start];
        let mut found: Option<u32> = None;
        while let Some(item) = frontier.pop() {
            for rel in self.relations.iter().filter(|r| r.child == item) {
                if rel.parent.kind == ParentKind::Api {
                    found = Some(match found {
                        Some(best) => best.min(rel.parent.id),
                        None => rel.parent.id,
                    });
                } else {
                    let next = WorkItemRef {
                        kind: rel.parent.kind.as_work_item_kind(),
                        id: rel.parent.id,
                    };
                    if !seen.contains(&next) {
                        seen.push(next);
                        frontier.push(next);
                    }
                }
            }
        }
        found.ok_or_else(|| CoreError::not_found("owning api for parent", parent))
    }

    fn validate_relation_fields(
        &self,
        parent: ParentRef,
        child_kind: WorkItemKind,
        section: &str,
        offset: usize,
        coverage: u32,
    ) -> Result<()> {
        if relation_table(child_kind, parent.kind).is_none() {
            return Err(CoreError::validation(
                "child_type",
                format!("{} cannot be mapped onto {}", child_kind, parent.kind),
            ));
        }
        if coverage > 100 {
            return Err(CoreError::validation(
                "coverage",
                format!("coverage must be within [0, 100], got {}", coverage),
            ));
        }
        if section.is_empty() {
            return Err(CoreError::validation(
                "section",
                format!(
                    "section must not be empty; use the {:?} marker for unmatched work items",
                    UNMATCHED_SECTION
                ),
            ));
        }
        // The offset bound only applies to real excerpts of a text-bearing
        // parent; the unmatched marker is exempt.
        if parent.kind == ParentKind::Api && section != UNMATCHED_SECTION {
            let api = self.get_api(parent.id)?;
            let text_len = match &api.data {
                WorkItemData::Api {
                    raw_specification, ..
                } => raw_specification.chars().count(),
                _ => 0,
            };
            if offset > text_len {
                return Err(CoreError::validation(
                    "offset",
                    format!("offset {} is outside [0, {}]", offset, text_len),
                ));
            }
        }
        Ok(())
    }

    fn parent_exists(&self, parent: ParentRef) -> Result<()> {
        let item = WorkItemRef {
            kind: parent.kind.as_work_item_kind(),
            id: parent.id,
        };
        self.fetch_work_item(item).map(|_| ())
    }

    fn push_relation(
        &mut self,
        parent: ParentRef,
        child: WorkItemRef,
        section: &str,
        offset: usize,
        coverage: u32,
        actor: &Actor,
    ) -> u32 {
        let relation_id = self.counters.next_relation();
        self.relations.push(MappingRelation {
            relation_id,
            parent,
            child,
            section: section.to_string(),
            offset,
            coverage,
            created_at: Utc::now(),
            created_by: actor.user_id,
        });
        relation_id
    }

    /// Maps a newly created work item onto a span of the parent's text.
    /// The child gets a fresh identifier and its first version record,
    /// which carries the mapping snapshot.
    pub fn map_new(
        &mut self,
        parent: ParentRef,
        data: WorkItemData,
        section: &str,
        offset: usize,
        coverage: u32,
        actor: &Actor,
    ) -> Result<u32> {
        let api_id = self.owning_api(parent)?;
        self.require(actor, api_id, Action::Write)?;
        self.parent_exists(parent)?;
        self.validate_relation_fields(parent, data.kind(), section, offset, coverage)?;

        let kind = data.kind();
        let id = self.counters.next_for(kind);
        let item = WorkItem {
            id,
            version: 1,
            created_at: Utc::now(),
            created_by: actor.user_id,
            data,
        };
        let child = item.item_ref();
        self.work_items.push(item);

        let relation_id = self.push_relation(parent, child, section, offset, coverage, actor);
        let snapshot = self.fetch_relation(relation_id)?.clone();
        self.record_version(child, Some(&snapshot), actor)?;
        Ok(relation_id)
    }

    /// Maps an already-existing work item onto a span of the parent's
    /// text. No version record is appended; the child's history is
    /// untouched by gaining a new parent.
    pub fn map_existing(
        &mut self,
        parent: ParentRef,
        child: WorkItemRef,
        section: &str,
        offset: usize,
        coverage: u32,
        actor: &Actor,
    ) -> Result<u32> {
        let api_id = self.owning_api(parent)?;
        self.require(actor, api_id, Action::Write)?;
        self.parent_exists(parent)?;
        self.fetch_work_item(child)?;
        self.validate_relation_fields(parent, child.kind, section, offset, coverage)?;
        Ok(self.push_relation(parent, child, section, offset, coverage, actor))
    }

    /// Supersedes a relation with an updated snapshot. The previous state
    /// survives as part of the child's version history.
    pub fn update_mapping(
        &mut self,
        relation_id: u32,
        update: MappingUpdate,
        actor: &Actor,
    ) -> Result<MappingRelation> {
        let current = self.fetch_relation(relation_id)?.clone();
        let api_id = self.owning_api(current.parent)?;
        self.require_any(actor, api_id, &[Action::Write, Action::Edit])?;

        let mut next = current.clone();
        if let Some(section) = update.section {
            next.section = section;
        }
        if let Some(offset) = update.offset {
            next.offset = offset;
        }
        if let Some(coverage) = update.coverage {
            next.coverage = coverage;
        }
        self.validate_relation_fields(
            next.parent,
            next.child.kind,
            &next.section,
            next.offset,
            next.coverage,
        )?;

        self.bump_version(current.child)?;
        self.record_version(current.child, Some(&next), actor)?;
        let slot = self
            .relations
            .iter_mut()
            .find(|r| r.relation_id == relation_id)
            .ok_or_else(|| CoreError::not_found("mapping relation", relation_id))?;
        *slot = next.clone();
        Ok(next)
    }

    /// Relations that would be removed by deleting `relation_id`: the
    /// relation itself plus, transitively, dependents of any child left
    /// without a remaining parent relation. A child still anchored
    /// elsewhere keeps its subtree.
    fn cascade_set(&self, relation_id: u32) -> Result<Vec<u32>> {
        let root = self.fetch_relation(relation_id)?;
        let mut to_delete = vec![root.relation_id];
        let mut worklist = vec![root.child];

        while let Some(child) = worklist.pop() {
            let still_anchored = self
                .relations
                .iter()
                .any(|r| r.child == child && !to_delete.contains(&r.relation_id));
            if still_anchored {
                continue;
            }
            let as_parent = match child.kind {
                WorkItemKind::Requirement => ParentKind::Requirement,
                WorkItemKind::TestSpecification => ParentKind::TestSpecification,
                _ => continue,
            };
            for dep in self.relations.iter().filter(|r| {
                r.parent.kind == as_parent && r.parent.id == child.id
            }) {
                if !to_delete.contains(&dep.relation_id) {
                    to_delete.push(dep.relation_id);
                    worklist.push(dep.child);
                }
            }
        }
        Ok(to_delete)
    }

    /// Deletes a relation and, all-or-nothing, every dependent relation
    /// whose chain to the root ran through it. Returns the removed
    /// relation ids.
    pub fn delete_mapping(&mut self, relation_id: u32, actor: &Actor) -> Result<Vec<u32>> {
        let current = self.fetch_relation(relation_id)?.clone();
        let api_id = self.owning_api(current.parent)?;
        self.require(actor, api_id, Action::Write)?;

        let mut to_delete = self.cascade_set(relation_id)?;
        to_delete.sort_unstable();
        self.relations
            .retain(|r| !to_delete.contains(&r.relation_id));
        Ok(to_delete)
    }

    /// Relations covering a parent, ordered by offset ascending with ties
    /// broken by relation id (insertion order) so highlighted rendering
    /// stays stable.
    pub fn list_for_parent(
        &self,
        parent: ParentRef,
        child_kind: Option<WorkItemKind>,
    ) -> Vec<&MappingRelation> {
        let mut rels: Vec<&MappingRelation> = self
            .relations
            .iter()
            .filter(|r| r.parent == parent)
            .filter(|r| child_kind.map_or(true, |k| r.child.kind == k))
            .collect();
        rels.sort_by_key(|r| (r.offset, r.relation_id));
        rels
    }

    /// Aggregate coverage percentage for a parent artifact, one decimal.
    pub fn coverage_for(&self, parent: ParentRef) -> f64 {
        coverage::aggregate_coverage(self.list_for_parent(parent, None).into_iter())
    }

    pub fn stats(&self) -> StoreStats {
        let count = |kind: WorkItemKind| self.work_items.iter().filter(|w| w.kind() == kind).count();
        StoreStats {
            api_count: count(WorkItemKind::Api),
            requirement_count: count(WorkItemKind::Requirement),
            test_specification_count: count(WorkItemKind::TestSpecification),
            test_case_count: count(WorkItemKind::TestCase),
            justification_count: count(WorkItemKind::Justification),
            document_count: count(WorkItemKind::Document),
            relation_count: self.relations.len(),
            user_count: self.users.len(),
            version_count: self.history.len(),
        }
    }
}

impl Default for TraceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_api(text: &str) -> (TraceStore, Actor, u32) {
        let mut store = TraceStore::new();
        let admin = store.bootstrap_admin();
        let api_id = store
            .add_api("frames", "libframes", "1.2", text.to_string(), &admin)
            .unwrap();
        (store, admin, api_id)
    }

    fn requirement(title: &str) -> WorkItemData {
        WorkItemData::Requirement {
            title: title.to_string(),
            description: format!("{} description", title),
        }
    }

    fn api_parent(id: u32) -> ParentRef {
        ParentRef {
            kind: ParentKind::Api,
            id,
        }
    }

    #[test]
    fn test_map_new_assigns_ids_and_first_version() {
        let (mut store, admin, api_id) = store_with_api("The component shall parse frames.");
        let rel_id = store
            .map_new(
                api_parent(api_id),
                requirement("Parse frames"),
                "parse frames",
                24,
                100,
                &admin,
            )
            .unwrap();

        let rel = store.get_relation(rel_id).unwrap();
        assert_eq!(rel.child.kind, WorkItemKind::Requirement);
        assert_eq!(rel.child.id, 1);

        let child = store.get_work_item(rel.child).unwrap();
        assert_eq!(child.version, 1);
        assert_eq!(store.history(rel.child).len(), 1);
    }

    #[test]
    fn test_work_item_ids_are_per_kind_and_never_reused() {
        let (mut store, admin, api_id) = store_with_api("abc def ghi");
        let r1 = store
            .map_new(api_parent(api_id), requirement("one"), "abc", 0, 100, &admin)
            .unwrap();
        store.delete_mapping(r1, &admin).unwrap();
        let r2 = store
            .map_new(api_parent(api_id), requirement("two"), "def", 4, 100, &admin)
            .unwrap();
        // The second requirement gets id 2 even though the first mapping
        // is gone; identifiers are never reused.
        assert_eq!(store.get_relation(r2).unwrap().child.id, 2);
    }

    #[test]
    fn test_coverage_out_of_range_is_rejected() {
        let (mut store, admin, api_id) = store_with_api("some text");
        let err = store
            .map_new(api_parent(api_id), requirement("r"), "some", 0, 101, &admin)
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { field: "coverage", .. }));
    }

    #[test]
    fn test_empty_section_is_rejected() {
        let (mut store, admin, api_id) = store_with_api("some text");
        let err = store
            .map_new(api_parent(api_id), requirement("r"), "", 0, 50, &admin)
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { field: "section", .. }));
    }

    #[test]
    fn test_offset_out_of_bounds_is_rejected_for_real_sections() {
        let (mut store, admin, api_id) = store_with_api("0123456789");
        let err = store
            .map_new(api_parent(api_id), requirement("r"), "0123", 11, 50, &admin)
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { field: "offset", .. }));

        // The unmatched marker is exempt from the bound.
        assert!(store
            .map_new(
                api_parent(api_id),
                requirement("r"),
                UNMATCHED_SECTION,
                9999,
                50,
                &admin
            )
            .is_ok());
    }

    #[test]
    fn test_disallowed_kind_pair_is_rejected() {
        let (mut store, admin, api_id) = store_with_api("text");
        let rel = store
            .map_new(api_parent(api_id), requirement("r"), "text", 0, 100, &admin)
            .unwrap();
        let req_id = store.get_relation(rel).unwrap().child.id;

        let err = store
            .map_new(
                ParentRef {
                    kind: ParentKind::Requirement,
                    id: req_id,
                },
                WorkItemData::Document {
                    title: "manual".into(),
                    description: String::new(),
                    url: "https://example.com".into(),
                },
                UNMATCHED_SECTION,
                0,
                0,
                &admin,
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { field: "child_type", .. }));
    }

    #[test]
    fn test_list_for_parent_orders_by_offset_then_relation_id() {
        let (mut store, admin, api_id) = store_with_api("aaaa bbbb cccc");
        let late = store
            .map_new(api_parent(api_id), requirement("late"), "cccc", 10, 100, &admin)
            .unwrap();
        let early = store
            .map_new(api_parent(api_id), requirement("early"), "aaaa", 0, 100, &admin)
            .unwrap();
        // Same text and offset as `early`; insertion order breaks the tie.
        let tied = store
            .map_new(api_parent(api_id), requirement("tied"), "aaaa", 0, 100, &admin)
            .unwrap();

        let ids: Vec<u32> = store
            .list_for_parent(api_parent(api_id), None)
            .iter()
            .map(|r| r.relation_id)
            .collect();
        assert_eq!(ids, vec![early, tied, late]);
    }

    #[test]
    fn test_update_mapping_supersedes_and_records_version() {
        let (mut store, admin, api_id) = store_with_api("aaaa bbbb");
        let rel_id = store
            .map_new(api_parent(api_id), requirement("r"), "aaaa", 0, 40, &admin)
            .unwrap();
        let child = store.get_relation(rel_id).unwrap().child;
        let history_before = store.history(child).len();

        let updated = store
            .update_mapping(
                rel_id,
                MappingUpdate {
                    coverage: Some(90),
                    ..Default::default()
                },
                &admin,
            )
            .unwrap();
        assert_eq!(updated.coverage, 90);
        assert_eq!(store.get_relation(rel_id).unwrap().coverage, 90);
        assert_eq!(store.history(child).len(), history_before + 1);
    }

    #[test]
    fn test_update_unknown_relation_is_not_found() {
        let (mut store, admin, _) = store_with_api("text");
        let err = store
            .update_mapping(42, MappingUpdate::default(), &admin)
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[test]
    fn test_mutation_requires_write_on_owning_api() {
        let (mut store, admin, api_id) = store_with_api("aaaa bbbb");
        let rel_id = store
            .map_new(api_parent(api_id), requirement("r"), "aaaa", 0, 40, &admin)
            .unwrap();

        let reader_id = store.add_user("reader", Role::User).unwrap();
        store
            .set_permission(reader_id, api_id, PermissionSet::READ)
            .unwrap();
        let reader = store.get_user_by_handle("reader").unwrap().actor();

        let err = store
            .update_mapping(
                rel_id,
                MappingUpdate {
                    coverage: Some(10),
                    ..Default::default()
                },
                &reader,
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::Permission { .. }));

        let err = store.delete_mapping(rel_id, &reader).unwrap_err();
        assert!(matches!(err, CoreError::Permission { .. }));
    }

    #[test]
    fn test_delete_cascades_through_orphaned_children() {
        let (mut store, admin, api_id) = store_with_api("aaaa bbbb cccc");
        let req_rel = store
            .map_new(api_parent(api_id), requirement("req"), "aaaa", 0, 100, &admin)
            .unwrap();
        let req_id = store.get_relation(req_rel).unwrap().child.id;

        let ts_rel = store
            .map_new(
                ParentRef {
                    kind: ParentKind::Requirement,
                    id: req_id,
                },
                WorkItemData::TestSpecification {
                    title: "ts".into(),
                    preconditions: String::new(),
                    test_description: "check".into(),
                    expected_behavior: "ok".into(),
                },
                UNMATCHED_SECTION,
                0,
                100,
                &admin,
            )
            .unwrap();
        let ts_id = store.get_relation(ts_rel).unwrap().child.id;

        let tc_rel = store
            .map_new(
                ParentRef {
                    kind: ParentKind::TestSpecification,
                    id: ts_id,
                },
                WorkItemData::TestCase {
                    title: "tc".into(),
                    description: String::new(),
                    repository: "repo".into(),
                    relative_path: "tests/t.rs".into(),
                },
                UNMATCHED_SECTION,
                0,
                100,
                &admin,
            )
            .unwrap();

        let deleted = store.delete_mapping(req_rel, &admin).unwrap();
        assert_eq!(deleted, vec![req_rel, ts_rel, tc_rel]);
        assert!(store.relations.is_empty());
    }

    #[test]
    fn test_delete_keeps_children_still_anchored_elsewhere() {
        let (mut store, admin, api_id) = store_with_api("aaaa bbbb cccc");
        let rel_a = store
            .map_new(api_parent(api_id), requirement("req"), "aaaa", 0, 100, &admin)
            .unwrap();
        let req_id = store.get_relation(rel_a).unwrap().child.id;
        // Same requirement mapped a second time, to a different span.
        let rel_b = store
            .map_existing(
                api_parent(api_id),
                WorkItemRef {
                    kind: WorkItemKind::Requirement,
                    id: req_id,
                },
                "bbbb",
                5,
                50,
                &admin,
            )
            .unwrap();
        let ts_rel = store
            .map_new(
                ParentRef {
                    kind: ParentKind::Requirement,
                    id: req_id,
                },
                WorkItemData::TestSpecification {
                    title: "ts".into(),
                    preconditions: String::new(),
                    test_description: "check".into(),
                    expected_behavior: "ok".into(),
                },
                UNMATCHED_SECTION,
                0,
                100,
                &admin,
            )
            .unwrap();

        let deleted = store.delete_mapping(rel_a, &admin).unwrap();
        // The requirement is still anchored through rel_b, so its test
        // specification mapping survives.
        assert_eq!(deleted, vec![rel_a]);
        assert!(store.get_relation(rel_b).is_some());
        assert!(store.get_relation(ts_rel).is_some());
    }

    #[test]
    fn test_owning_api_walks_relation_chain() {
        let (mut store, admin, api_id) = store_with_api("aaaa");
        let req_rel = store
            .map_new(api_parent(api_id), requirement("req"), "aaaa", 0, 100, &admin)
            .unwrap();
        let req_id = store.get_relation(req_rel).unwrap().child.id;
        let ts_rel = store
            .map_new(
                ParentRef {
                    kind: ParentKind::Requirement,
                    id: req_id,
                },
                WorkItemData::TestSpecification {
                    title: "ts".into(),
                    preconditions: String::new(),
                    test_description: "check".into(),
                    expected_behavior: "ok".into(),
                },
                UNMATCHED_SECTION,
                0,
                100,
                &admin,
            )
            .unwrap();
        let ts_id = store.get_relation(ts_rel).unwrap().child.id;

        assert_eq!(
            store
                .owning_api(ParentRef {
                    kind: ParentKind::TestSpecification,
                    id: ts_id,
                })
                .unwrap(),
            api_id
        );
    }

    #[test]
    fn test_map_existing_unknown_child_is_not_found() {
        let (mut store, admin, api_id) = store_with_api("text");
        let err = store
            .map_existing(
                api_parent(api_id),
                WorkItemRef {
                    kind: WorkItemKind::Requirement,
                    id: 7,
                },
                "text",
                0,
                100,
                &admin,
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[test]
    fn test_coverage_for_parent_end_to_end() {
        let text = "a".repeat(100);
        let (mut store, admin, api_id) = store_with_api(&text);
        store
            .map_new(
                api_parent(api_id),
                requirement("first"),
                &text[0..40],
                0,
                100,
                &admin,
            )
            .unwrap();
        store
            .map_new(
                api_parent(api_id),
                requirement("second"),
                &text[40..100],
                40,
                50,
                &admin,
            )
            .unwrap();
        assert_eq!(store.coverage_for(api_parent(api_id)), 70.0);
    }
}
