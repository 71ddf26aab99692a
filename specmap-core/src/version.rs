//! Versioning and forking of mapped work items
//!
//! Every edit of a work item or its mapping relation appends an immutable
//! snapshot record; history is append-only and queryable newest first.
//! Forking produces an independent copy with a fresh identifier and a
//! fresh history, decoupled from the original's future edits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::models::{Actor, WorkItem, WorkItemData, WorkItemRef};
use crate::permission::Action;
use crate::store::TraceStore;

/// Immutable snapshot of a work item (and optionally the mapping relation
/// that was edited alongside it). The snapshots are intentionally untyped
/// at this boundary: they are a historical artifact dump consumed by a
/// generic "show history" view, not a live contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionRecord {
    pub item: WorkItemRef,
    pub version: u32,
    pub object: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub created_by: Uuid,
}

impl TraceStore {
    /// Appends a snapshot of the work item at its current version number.
    /// Callers editing content bump the version first.
    pub(crate) fn record_version(
        &mut self,
        item: WorkItemRef,
        mapping: Option<&crate::models::MappingRelation>,
        actor: &Actor,
    ) -> Result<()> {
        let current = self.fetch_work_item(item)?;
        let object = serde_json::to_value(&current.data)
            .map_err(|e| CoreError::invariant(format!("snapshot serialization failed: {}", e)))?;
        let mapping = match mapping {
            Some(rel) => Some(serde_json::to_value(rel).map_err(|e| {
                CoreError::invariant(format!("mapping snapshot serialization failed: {}", e))
            })?),
            None => None,
        };
        let record = VersionRecord {
            item,
            version: current.version,
            object,
            mapping,
            created_at: Utc::now(),
            created_by: actor.user_id,
        };
        self.history.push(record);
        Ok(())
    }

    /// Increments a work item's version number, returning the new value.
    pub(crate) fn bump_version(&mut self, item: WorkItemRef) -> Result<u32> {
        let slot = self
            .work_items
            .iter_mut()
            .find(|w| w.kind() == item.kind && w.id == item.id)
            .ok_or_else(|| CoreError::not_found("work item", item))?;
        slot.version += 1;
        Ok(slot.version)
    }

    /// Version records for a work item, newest first.
    pub fn history(&self, item: WorkItemRef) -> Vec<&VersionRecord> {
        let mut records: Vec<&VersionRecord> =
            self.history.iter().filter(|r| r.item == item).collect();
        records.sort_by(|a, b| b.version.cmp(&a.version));
        records
    }

    /// Replaces a work item's content, appending a version record and
    /// keeping its identifier and relation linkage. The kind of a work
    /// item is fixed for life. Returns the new version number.
    pub fn edit_work_item(
        &mut self,
        item: WorkItemRef,
        new_data: WorkItemData,
        api_id: u32,
        actor: &Actor,
    ) -> Result<u32> {
        if new_data.kind() != item.kind {
            return Err(CoreError::validation(
                "kind",
                format!(
                    "cannot change a {} into a {}",
                    item.kind,
                    new_data.kind()
                ),
            ));
        }
        self.get_api(api_id)?;
        self.require_any(actor, api_id, &[Action::Write, Action::Edit])?;
        self.fetch_work_item(item)?;

        let version = self.bump_version(item)?;
        let slot = self
            .work_items
            .iter_mut()
            .find(|w| w.kind() == item.kind && w.id == item.id)
            .ok_or_else(|| CoreError::not_found("work item", item))?;
        slot.data = new_data;
        self.record_version(item, None, actor)?;
        Ok(version)
    }

    /// Creates an independent copy of a relation's mapped work item (new
    /// identifier, version 1, fresh history) and a new relation onto the
    /// same parent with the same section, offset and coverage. Requires
    /// write on the target parent artifact; no permission is needed on
    /// the source item.
    pub fn fork_mapping(&mut self, relation_id: u32, actor: &Actor) -> Result<u32> {
        let original = self.fetch_relation(relation_id)?.clone();
        let api_id = self.owning_api(original.parent)?;
        self.require(actor, api_id, Action::Write)?;

        let source = self
            .get_work_item(original.child)
            .ok_or_else(|| {
                CoreError::invariant(format!(
                    "relation {} references missing work item {}",
                    relation_id, original.child
                ))
            })?
            .clone();

        let copy_ref = self.insert_copy(&source, actor);
        let new_relation_id = self.counters.next_relation();
        self.relations.push(crate::models::MappingRelation {
            relation_id: new_relation_id,
            parent: original.parent,
            child: copy_ref,
            section: original.section.clone(),
            offset: original.offset,
            coverage: original.coverage,
            created_at: Utc::now(),
            created_by: actor.user_id,
        });
        let snapshot = self.fetch_relation(new_relation_id)?.clone();
        self.record_version(copy_ref, Some(&snapshot), actor)?;
        Ok(new_relation_id)
    }

    fn insert_copy(&mut self, source: &WorkItem, actor: &Actor) -> WorkItemRef {
        let id = self.counters.next_for(source.kind());
        let copy = WorkItem {
            id,
            version: 1,
            created_at: Utc::now(),
            created_by: actor.user_id,
            data: source.data.clone(),
        };
        let copy_ref = copy.item_ref();
        self.work_items.push(copy);
        copy_ref
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ParentKind, ParentRef, Role, WorkItemKind};
    use crate::permission::PermissionSet;
    use crate::store::MappingUpdate;

    fn setup() -> (TraceStore, Actor, u32, u32) {
        let mut store = TraceStore::new();
        let admin = store.bootstrap_admin();
        let api_id = store
            .add_api(
                "frames",
                "libframes",
                "1.2",
                "The component shall parse frames.".into(),
                &admin,
            )
            .unwrap();
        let rel_id = store
            .map_new(
                ParentRef {
                    kind: ParentKind::Api,
                    id: api_id,
                },
                WorkItemData::Requirement {
                    title: "Parse frames".into(),
                    description: "Frames are parsed".into(),
                },
                "parse frames",
                24,
                100,
                &admin,
            )
            .unwrap();
        (store, admin, api_id, rel_id)
    }

    #[test]
    fn test_edit_appends_record_and_bumps_version() {
        let (mut store, admin, api_id, rel_id) = setup();
        let child = store.get_relation(rel_id).unwrap().child;

        let v2 = store
            .edit_work_item(
                child,
                WorkItemData::Requirement {
                    title: "Parse frames strictly".into(),
                    description: "Frames are parsed and rejected on error".into(),
                },
                api_id,
                &admin,
            )
            .unwrap();
        assert_eq!(v2, 2);

        let records = store.history(child);
        assert_eq!(records.len(), 2);
        // Newest first.
        assert_eq!(records[0].version, 2);
        assert_eq!(records[1].version, 1);
    }

    #[test]
    fn test_version_numbers_are_strictly_increasing() {
        let (mut store, admin, api_id, rel_id) = setup();
        let child = store.get_relation(rel_id).unwrap().child;

        let mut lengths = vec![store.history(child).len()];
        for i in 0..3 {
            store
                .edit_work_item(
                    child,
                    WorkItemData::Requirement {
                        title: format!("rev {}", i),
                        description: String::new(),
                    },
                    api_id,
                    &admin,
                )
                .unwrap();
            lengths.push(store.history(child).len());
        }
        // History never shrinks after an edit.
        assert!(lengths.windows(2).all(|w| w[0] < w[1]));

        let versions: Vec<u32> = store.history(child).iter().map(|r| r.version).collect();
        assert!(versions.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_edit_cannot_change_kind() {
        let (mut store, admin, api_id, rel_id) = setup();
        let child = store.get_relation(rel_id).unwrap().child;
        let err = store
            .edit_work_item(
                child,
                WorkItemData::Justification {
                    description: "not a requirement".into(),
                },
                api_id,
                &admin,
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { field: "kind", .. }));
    }

    #[test]
    fn test_fork_creates_independent_copy() {
        let (mut store, admin, api_id, rel_id) = setup();
        let original_child = store.get_relation(rel_id).unwrap().child;

        let forked_rel = store.fork_mapping(rel_id, &admin).unwrap();
        let forked = store.get_relation(forked_rel).unwrap().clone();
        assert_ne!(forked.child.id, original_child.id);
        assert_eq!(forked.section, "parse frames");
        assert_eq!(forked.coverage, 100);
        assert_eq!(store.get_work_item(forked.child).unwrap().version, 1);
        assert_eq!(store.history(forked.child).len(), 1);

        // Editing the original never touches the fork, and vice versa.
        store
            .edit_work_item(
                original_child,
                WorkItemData::Requirement {
                    title: "Changed original".into(),
                    description: String::new(),
                },
                api_id,
                &admin,
            )
            .unwrap();
        let fork_data = store.get_work_item(forked.child).unwrap().data.clone();
        assert_eq!(
            fork_data,
            WorkItemData::Requirement {
                title: "Parse frames".into(),
                description: "Frames are parsed".into(),
            }
        );

        store
            .edit_work_item(
                forked.child,
                WorkItemData::Requirement {
                    title: "Changed fork".into(),
                    description: String::new(),
                },
                api_id,
                &admin,
            )
            .unwrap();
        let original_data = &store.get_work_item(original_child).unwrap().data;
        assert!(matches!(
            original_data,
            WorkItemData::Requirement { title, .. } if title == "Changed original"
        ));
    }

    #[test]
    fn test_fork_requires_write_on_target_parent() {
        let (mut store, _admin, api_id, rel_id) = setup();
        let reader_id = store.add_user("reader", Role::User).unwrap();
        store
            .set_permission(reader_id, api_id, PermissionSet::READ)
            .unwrap();
        let reader = store.get_user_by_handle("reader").unwrap().actor();

        let err = store.fork_mapping(rel_id, &reader).unwrap_err();
        assert!(matches!(err, CoreError::Permission { .. }));
    }

    #[test]
    fn test_relation_update_bumps_child_version() {
        let (mut store, admin, _api_id, rel_id) = setup();
        let child = store.get_relation(rel_id).unwrap().child;
        assert_eq!(store.get_work_item(child).unwrap().version, 1);

        store
            .update_mapping(
                rel_id,
                MappingUpdate {
                    coverage: Some(55),
                    ..Default::default()
                },
                &admin,
            )
            .unwrap();
        assert_eq!(store.get_work_item(child).unwrap().version, 2);
        assert_eq!(store.history(child)[0].version, 2);
        assert_eq!(child.kind, WorkItemKind::Requirement);
    }
}
