//! Direct and indirect relation resolution
//!
//! A work item is *direct* when its relation is attached straight to the
//! root artifact, and *indirect* when it is reachable only through an
//! intermediate work item (a test specification under a requirement, a
//! test case under a test specification). Justifications and documents
//! never act as intermediate hops.
//!
//! Relations always point from a child kind strictly rootward in the
//! fixed kind ordering, so cycles cannot occur by construction; the
//! resolver still validates the ordering defensively and refuses to
//! operate on a store that breaks it.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{CoreError, Result};
use crate::models::{relation_table, MappingRelation, ParentKind, ParentRef, WorkItemKind};
use crate::store::TraceStore;

/// How a resolved relation reaches the root artifact.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Origin {
    Direct,
    Indirect,
}

/// Which target kind a resolution query expands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceTarget {
    TestSpecifications,
    TestCases,
}

impl TraceTarget {
    pub fn kind(&self) -> WorkItemKind {
        match self {
            TraceTarget::TestSpecifications => WorkItemKind::TestSpecification,
            TraceTarget::TestCases => WorkItemKind::TestCase,
        }
    }
}

impl std::str::FromStr for TraceTarget {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "test-specifications" | "test-specification" => Ok(TraceTarget::TestSpecifications),
            "test-cases" | "test-case" => Ok(TraceTarget::TestCases),
            other => Err(CoreError::validation(
                "target",
                format!("cannot resolve indirect relations for: {}", other),
            )),
        }
    }
}

/// One relation in a resolution result, tagged with how it reached the
/// root.
#[derive(Debug, Clone)]
pub struct ResolvedRelation {
    pub relation: MappingRelation,
    pub origin: Origin,
}

/// The full expanded set for one query. Holds both direct and indirect
/// relations so a caller can flip the "show indirect" toggle without
/// re-querying.
#[derive(Debug, Default)]
pub struct ResolvedSet {
    items: Vec<ResolvedRelation>,
}

impl ResolvedSet {
    /// Every reachable relation, direct and indirect.
    pub fn all(&self) -> &[ResolvedRelation] {
        &self.items
    }

    /// Only the relations attached straight to the root.
    pub fn direct_only(&self) -> Vec<&ResolvedRelation> {
        self.items
            .iter()
            .filter(|r| r.origin == Origin::Direct)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

/// Checks every stored relation against the fixed kind ordering and the
/// allowed kind-pair table. A violation means a caller or a prior
/// migration wrote a malformed relation.
pub fn validate_kind_ordering(store: &TraceStore) -> Result<()> {
    for rel in &store.relations {
        if relation_table(rel.child.kind, rel.parent.kind).is_none() {
            return Err(CoreError::invariant(format!(
                "relation {} maps {} onto {}, which the domain does not allow",
                rel.relation_id, rel.child.kind, rel.parent.kind
            )));
        }
        if rel.parent.kind.rank() <= rel.child.kind.rank() {
            return Err(CoreError::invariant(format!(
                "relation {} points away from the root: {} is not above {}",
                rel.relation_id, rel.parent.kind, rel.child.kind
            )));
        }
    }
    Ok(())
}

/// Expands the relations of `target` kind reachable from a root artifact,
/// tagging each as direct or indirect. Deduplicated by relation id.
pub fn resolve(store: &TraceStore, api_id: u32, target: TraceTarget) -> Result<ResolvedSet> {
    store.get_api(api_id)?;
    validate_kind_ordering(store)?;

    let root = ParentRef {
        kind: ParentKind::Api,
        id: api_id,
    };

    // Requirements mapped straight onto the root; the only intermediate
    // hop a test specification can hang from.
    let reqs_on_root: HashSet<u32> = store
        .relations
        .iter()
        .filter(|r| r.parent == root && r.child.kind == WorkItemKind::Requirement)
        .map(|r| r.child.id)
        .collect();

    let mut items = Vec::new();
    let mut seen: HashSet<u32> = HashSet::new();
    let mut push = |rel: &MappingRelation, origin: Origin, items: &mut Vec<ResolvedRelation>| {
        if seen.insert(rel.relation_id) {
            items.push(ResolvedRelation {
                relation: rel.clone(),
                origin,
            });
        }
    };

    match target {
        TraceTarget::TestSpecifications => {
            for rel in store.list_for_parent(root, Some(WorkItemKind::TestSpecification)) {
                push(rel, Origin::Direct, &mut items);
            }
            for rel in store.relations.iter().filter(|r| {
                r.child.kind == WorkItemKind::TestSpecification
                    && r.parent.kind == ParentKind::Requirement
                    && reqs_on_root.contains(&r.parent.id)
            }) {
                push(rel, Origin::Indirect, &mut items);
            }
        }
        TraceTarget::TestCases => {
            for rel in store.list_for_parent(root, Some(WorkItemKind::TestCase)) {
                push(rel, Origin::Direct, &mut items);
            }
            // Test specifications reachable from the root, directly or
            // through a requirement.
            let mut reachable_specs: HashSet<u32> = store
                .relations
                .iter()
                .filter(|r| r.parent == root && r.child.kind == WorkItemKind::TestSpecification)
                .map(|r| r.child.id)
                .collect();
            reachable_specs.extend(
                store
                    .relations
                    .iter()
                    .filter(|r| {
                        r.child.kind == WorkItemKind::TestSpecification
                            && r.parent.kind == ParentKind::Requirement
                            && reqs_on_root.contains(&r.parent.id)
                    })
                    .map(|r| r.child.id),
            );
            for rel in store.relations.iter().filter(|r| {
                r.child.kind == WorkItemKind::TestCase
                    && r.parent.kind == ParentKind::TestSpecification
                    && reachable_specs.contains(&r.parent.id)
            }) {
                push(rel, Origin::Indirect, &mut items);
            }
        }
    }

    Ok(ResolvedSet { items })
}

/// Work items of a resolved set, looked up in the store. Items missing
/// from the store indicate a dangling relation and are skipped.
pub fn resolved_work_items<'a>(
    store: &'a TraceStore,
    set: &ResolvedSet,
) -> Vec<(&'a crate::models::WorkItem, Origin)> {
    set.all()
        .iter()
        .filter_map(|r| store.get_work_item(r.relation.child).map(|item| (item, r.origin)))
        .collect()
}
