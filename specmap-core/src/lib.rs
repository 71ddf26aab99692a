pub mod coverage;
pub mod db;
pub mod engine;
pub mod error;
pub mod models;
pub mod permission;
pub mod registry;
pub mod resolver;
pub mod storage;
pub mod store;
pub mod version;

// Re-export commonly used types
pub use coverage::{aggregate_coverage, library_coverage, round1, weighted_coverage};
pub use engine::Engine;
pub use error::{CoreError, Result};
pub use models::{
    relation_table, Actor, MappingRelation, ParentKind, ParentRef, RelationTableId, Role, User,
    WorkItem, WorkItemData, WorkItemKind, WorkItemRef, UNMATCHED_SECTION,
};
pub use permission::{Action, CopyPermissionsOutcome, PermissionEntry, PermissionSet};
pub use registry::{determine_database_path, get_registry_path, Registry};
pub use resolver::{resolve, resolved_work_items, Origin, ResolvedRelation, ResolvedSet, TraceTarget};
pub use storage::Storage;
pub use store::{MappingUpdate, StoreStats, TraceStore};
pub use version::VersionRecord;
