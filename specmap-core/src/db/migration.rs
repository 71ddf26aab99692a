//! Migration utilities for converting between storage backends
//!
//! This module provides functions to migrate a trace database between
//! YAML and SQLite backends, as well as export to JSON format for
//! interoperability.

use anyhow::{Context, Result};
use std::path::Path;

use super::traits::DatabaseBackend;
use super::{SqliteBackend, YamlBackend};
use crate::store::TraceStore;

/// Migrates data from a YAML file to a SQLite database
///
/// Returns the number of work items migrated.
pub fn migrate_yaml_to_sqlite<P1: AsRef<Path>, P2: AsRef<Path>>(
    yaml_path: P1,
    sqlite_path: P2,
) -> Result<usize> {
    let yaml_backend = YamlBackend::new(yaml_path);
    let sqlite_backend = SqliteBackend::new(sqlite_path)?;

    let store = yaml_backend
        .load()
        .context("Failed to load YAML database")?;

    let item_count = store.work_items.len();

    sqlite_backend
        .save(&store)
        .context("Failed to save to SQLite database")?;

    Ok(item_count)
}

/// Migrates data from a SQLite database to a YAML file
///
/// Returns the number of work items migrated.
pub fn migrate_sqlite_to_yaml<P1: AsRef<Path>, P2: AsRef<Path>>(
    sqlite_path: P1,
    yaml_path: P2,
) -> Result<usize> {
    let sqlite_backend = SqliteBackend::new(sqlite_path)?;
    let yaml_backend = YamlBackend::new(yaml_path);

    let store = sqlite_backend
        .load()
        .context("Failed to load SQLite database")?;

    let item_count = store.work_items.len();

    yaml_backend
        .save(&store)
        .context("Failed to save to YAML file")?;

    Ok(item_count)
}

/// Exports a trace database to a JSON file, for consumption by other
/// tools and for backup/restore.
pub fn export_to_json<P: AsRef<Path>>(store: &TraceStore, json_path: P) -> Result<()> {
    let json = serde_json::to_string_pretty(store).context("Failed to serialize store to JSON")?;
    std::fs::write(json_path.as_ref(), json)
        .with_context(|| format!("Failed to write JSON file: {:?}", json_path.as_ref()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ParentKind, ParentRef, WorkItemData};
    use tempfile::tempdir;

    #[test]
    fn test_yaml_to_sqlite_round_trip() {
        let dir = tempdir().unwrap();
        let yaml_path = dir.path().join("trace.yaml");
        let sqlite_path = dir.path().join("trace.db");

        let mut store = TraceStore::new();
        let admin = store.bootstrap_admin();
        let api_id = store
            .add_api("frames", "libframes", "1.2", "aaaa bbbb".into(), &admin)
            .unwrap();
        store
            .map_new(
                ParentRef {
                    kind: ParentKind::Api,
                    id: api_id,
                },
                WorkItemData::Requirement {
                    title: "R".into(),
                    description: String::new(),
                },
                "aaaa",
                0,
                100,
                &admin,
            )
            .unwrap();
        YamlBackend::new(&yaml_path).save(&store).unwrap();

        let migrated = migrate_yaml_to_sqlite(&yaml_path, &sqlite_path).unwrap();
        assert_eq!(migrated, 2);

        let back_path = dir.path().join("back.yaml");
        let migrated_back = migrate_sqlite_to_yaml(&sqlite_path, &back_path).unwrap();
        assert_eq!(migrated_back, 2);

        let reloaded = YamlBackend::new(&back_path).load().unwrap();
        assert_eq!(reloaded.relations.len(), 1);
        assert_eq!(reloaded.users.len(), 1);
    }

    #[test]
    fn test_export_to_json_writes_full_store() {
        let dir = tempdir().unwrap();
        let json_path = dir.path().join("trace.json");

        let mut store = TraceStore::new();
        let admin = store.bootstrap_admin();
        store
            .add_api("frames", "libframes", "1.2", "text".into(), &admin)
            .unwrap();

        export_to_json(&store, &json_path).unwrap();
        let contents = std::fs::read_to_string(&json_path).unwrap();
        assert!(contents.contains("\"frames\""));
        assert!(contents.contains("\"admin\""));
    }
}
