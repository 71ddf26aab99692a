//! Embeddable engine facade over a database backend
//!
//! Reads are pure functions over the current snapshot and may run
//! concurrently. Mutations are serialized per parent artifact through a
//! mutual-exclusion scope keyed by `(parent kind, parent id)`, so two
//! concurrent edits under the same artifact cannot interleave and leave a
//! stale coverage read observable as final. Every mutation is an atomic
//! load-apply-save; a failed apply discards the working copy and leaves
//! the stored state untouched.

use anyhow::Result;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::db::{self, BackendType, DatabaseBackend};
use crate::error::CoreError;
use crate::models::{
    Actor, MappingRelation, ParentKind, ParentRef, Role, WorkItemData, WorkItemKind, WorkItemRef,
};
use crate::permission::{Action, CopyPermissionsOutcome, PermissionSet};
use crate::resolver::{self, ResolvedSet, TraceTarget};
use crate::store::{MappingUpdate, StoreStats, TraceStore};
use crate::version::VersionRecord;

/// Mutual-exclusion scopes, one per parent artifact.
#[derive(Default)]
struct ArtifactLocks {
    inner: Mutex<HashMap<(ParentKind, u32), Arc<Mutex<()>>>>,
}

impl ArtifactLocks {
    fn scope(&self, parent: ParentRef) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock().unwrap();
        map.entry((parent.kind, parent.id))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Stateless-per-call facade over one trace database. The full context of
/// every call (actor, parent, relation) arrives as explicit parameters.
pub struct Engine {
    backend: Box<dyn DatabaseBackend>,
    locks: ArtifactLocks,
}

impl Engine {
    /// Opens (or creates) the database at `path`, inferring the backend
    /// from the file extension unless one is given.
    pub fn open(path: &Path, backend_type: Option<BackendType>) -> Result<Self> {
        let backend = db::open_or_create(path, backend_type)?;
        Ok(Self::from_backend(backend))
    }

    pub fn from_backend(backend: Box<dyn DatabaseBackend>) -> Self {
        Self {
            backend,
            locks: ArtifactLocks::default(),
        }
    }

    pub fn backend(&self) -> &dyn DatabaseBackend {
        self.backend.as_ref()
    }

    /// Snapshot of the whole database for read-side queries.
    pub fn load(&self) -> Result<TraceStore> {
        self.backend.load()
    }

    fn mutate<T>(
        &self,
        scope: Option<ParentRef>,
        apply: impl FnOnce(&mut TraceStore) -> crate::error::Result<T>,
    ) -> Result<T> {
        let scope = scope.map(|p| self.locks.scope(p));
        let _guard = scope.as_ref().map(|s| s.lock().unwrap());

        let mut store = self.backend.load()?;
        let out = apply(&mut store)?;
        self.backend.save(&store)?;
        Ok(out)
    }

    /// Parent scope of a relation, resolved from the current snapshot.
    /// A relation's parent never changes, so the scope stays valid once
    /// the lock is taken.
    fn relation_scope(&self, relation_id: u32) -> Result<ParentRef> {
        let store = self.backend.load()?;
        let rel = store
            .get_relation(relation_id)
            .ok_or_else(|| CoreError::NotFound {
                what: "mapping relation",
                id: relation_id.to_string(),
            })?;
        Ok(rel.parent)
    }

    // Reads

    pub fn coverage_for(&self, parent: ParentRef) -> Result<f64> {
        Ok(self.load()?.coverage_for(parent))
    }

    pub fn list_for_parent(
        &self,
        parent: ParentRef,
        child_kind: Option<WorkItemKind>,
    ) -> Result<Vec<MappingRelation>> {
        Ok(self
            .load()?
            .list_for_parent(parent, child_kind)
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn resolve(&self, api_id: u32, target: TraceTarget) -> Result<ResolvedSet> {
        let store = self.load()?;
        Ok(resolver::resolve(&store, api_id, target)?)
    }

    pub fn history(&self, item: WorkItemRef) -> Result<Vec<VersionRecord>> {
        Ok(self.load()?.history(item).into_iter().cloned().collect())
    }

    pub fn stats(&self) -> Result<StoreStats> {
        self.backend.stats()
    }

    /// Actor for a CLI/host invocation: a registered user by handle, or
    /// the resident admin when no handle is given (registering it on
    /// first use).
    pub fn resolve_actor(&self, handle: Option<&str>) -> Result<Actor> {
        match handle {
            Some(handle) => {
                let store = self.load()?;
                let user = store
                    .get_user_by_handle(handle)
                    .ok_or_else(|| CoreError::NotFound {
                        what: "user",
                        id: handle.to_string(),
                    })?;
                Ok(user.actor())
            }
            None => self.mutate(None, |store| Ok(store.bootstrap_admin())),
        }
    }

    // Mutations

    pub fn add_user(&self, handle: &str, role: Role) -> Result<Uuid> {
        self.mutate(None, |store| store.add_user(handle, role))
    }

    pub fn add_api(
        &self,
        name: &str,
        library: &str,
        library_version: &str,
        raw_specification: String,
        actor: &Actor,
    ) -> Result<u32> {
        self.mutate(None, |store| {
            store.add_api(name, library, library_version, raw_specification, actor)
        })
    }

    pub fn map_new(
        &self,
        parent: ParentRef,
        data: WorkItemData,
        section: &str,
        offset: usize,
        coverage: u32,
        actor: &Actor,
    ) -> Result<u32> {
        self.mutate(Some(parent), |store| {
            store.map_new(parent, data, section, offset, coverage, actor)
        })
    }

    pub fn map_existing(
        &self,
        parent: ParentRef,
        child: WorkItemRef,
        section: &str,
        offset: usize,
        coverage: u32,
        actor: &Actor,
    ) -> Result<u32> {
        self.mutate(Some(parent), |store| {
            store.map_existing(parent, child, section, offset, coverage, actor)
        })
    }

    pub fn update_mapping(
        &self,
        relation_id: u32,
        update: MappingUpdate,
        actor: &Actor,
    ) -> Result<MappingRelation> {
        let scope = self.relation_scope(relation_id)?;
        self.mutate(Some(scope), |store| {
            store.update_mapping(relation_id, update, actor)
        })
    }

    pub fn delete_mapping(&self, relation_id: u32, actor: &Actor) -> Result<Vec<u32>> {
        let scope = self.relation_scope(relation_id)?;
        self.mutate(Some(scope), |store| store.delete_mapping(relation_id, actor))
    }

    pub fn edit_work_item(
        &self,
        item: WorkItemRef,
        new_data: WorkItemData,
        api_id: u32,
        actor: &Actor,
    ) -> Result<u32> {
        let scope = ParentRef {
            kind: ParentKind::Api,
            id: api_id,
        };
        self.mutate(Some(scope), |store| {
            store.edit_work_item(item, new_data, api_id, actor)
        })
    }

    pub fn fork_mapping(&self, relation_id: u32, actor: &Actor) -> Result<u32> {
        let scope = self.relation_scope(relation_id)?;
        self.mutate(Some(scope), |store| store.fork_mapping(relation_id, actor))
    }

    pub fn set_permission(
        &self,
        user_id: Uuid,
        api_id: u32,
        perms: PermissionSet,
    ) -> Result<PermissionSet> {
        let scope = ParentRef {
            kind: ParentKind::Api,
            id: api_id,
        };
        self.mutate(Some(scope), |store| {
            store.set_permission(user_id, api_id, perms)
        })
    }

    pub fn set_all(&self, api_id: u32, action: Action, enabled: bool) -> Result<Vec<Uuid>> {
        let scope = ParentRef {
            kind: ParentKind::Api,
            id: api_id,
        };
        self.mutate(Some(scope), |store| store.set_all(api_id, action, enabled))
    }

    /// Copies the source artifact's permission table onto each target
    /// under that target's own mutation scope. Targets fail
    /// independently; the outcome lists both sides.
    pub fn copy_permissions(
        &self,
        source_api_id: u32,
        target_api_ids: &[u32],
        actor: &Actor,
    ) -> Result<CopyPermissionsOutcome> {
        // Own on the source gates the whole operation.
        {
            let store = self.load()?;
            store.get_api(source_api_id)?;
            store.require(actor, source_api_id, Action::Own)?;
        }

        let mut outcome = CopyPermissionsOutcome::default();
        for &target in target_api_ids {
            let scope = ParentRef {
                kind: ParentKind::Api,
                id: target,
            };
            let result = self.mutate(Some(scope), |store| {
                store.copy_permissions(source_api_id, &[target], actor)
            });
            match result {
                Ok(partial) => {
                    outcome.copied.extend(partial.copied);
                    outcome.failed.extend(partial.failed);
                }
                Err(e) => outcome.failed.push((target, e.to_string())),
            }
        }
        Ok(outcome)
    }
}
