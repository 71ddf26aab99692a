//! SQLite database storage backend
//!
//! This backend stores the trace database in a SQLite database file,
//! providing better concurrent access for larger deployments. Kind and
//! relation columns are first-class; kind-specific work item payloads and
//! history snapshots are stored as JSON documents.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

use super::traits::{BackendType, DatabaseBackend};
use crate::models::{
    MappingRelation, ParentKind, ParentRef, Role, User, WorkItem, WorkItemKind, WorkItemRef,
};
use crate::permission::{PermissionEntry, PermissionSet};
use crate::store::{IdCounters, TraceStore};
use crate::version::VersionRecord;

/// Current schema version
const SCHEMA_VERSION: i32 = 1;

/// SQLite backend implementation
pub struct SqliteBackend {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Creates a new SQLite backend
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;

        // Enable WAL mode for better concurrent access
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        let backend = Self {
            path,
            conn: Mutex::new(conn),
        };

        backend.init_schema()?;
        Ok(backend)
    }

    /// Initialize the database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        let current_version: i32 = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .unwrap_or(0);

        if current_version == 0 {
            conn.execute_batch(include_str!("schema.sql"))?;
        } else if current_version < SCHEMA_VERSION {
            // Future: handle migrations. For now the schema is frozen.
            anyhow::bail!(
                "Database schema version {} is outdated, expected {}",
                current_version,
                SCHEMA_VERSION
            );
        }

        Ok(())
    }

    /// Serializes complex types to JSON for storage
    fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
        serde_json::to_string(value).context("Failed to serialize to JSON")
    }

    /// Deserializes complex types from JSON storage
    fn from_json<T: serde::de::DeserializeOwned>(json: &str) -> Result<T> {
        serde_json::from_str(json).context("Failed to deserialize from JSON")
    }

    fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
        Ok(DateTime::parse_from_rfc3339(s)
            .with_context(|| format!("Bad timestamp in database: {}", s))?
            .with_timezone(&Utc))
    }

    fn parse_uuid(s: &str) -> Result<Uuid> {
        Uuid::parse_str(s).with_context(|| format!("Bad UUID in database: {}", s))
    }

    fn parse_work_item_kind(s: &str) -> Result<WorkItemKind> {
        s.parse::<WorkItemKind>().map_err(anyhow::Error::new)
    }

    fn parse_parent_kind(s: &str) -> Result<ParentKind> {
        s.parse::<ParentKind>().map_err(anyhow::Error::new)
    }

    fn role_to_str(role: Role) -> &'static str {
        match role {
            Role::Admin => "admin",
            Role::User => "user",
            Role::Guest => "guest",
        }
    }

    fn load_work_items(&self, conn: &Connection) -> Result<Vec<WorkItem>> {
        let mut stmt = conn.prepare(
            "SELECT kind, id, version, created_at, created_by, data
             FROM work_items ORDER BY kind, id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut items = Vec::new();
        for row in rows {
            let (_kind, id, version, created_at, created_by, data) = row?;
            items.push(WorkItem {
                id,
                version,
                created_at: Self::parse_timestamp(&created_at)?,
                created_by: Self::parse_uuid(&created_by)?,
                data: Self::from_json(&data)?,
            });
        }
        Ok(items)
    }

    fn load_relations(&self, conn: &Connection) -> Result<Vec<MappingRelation>> {
        let mut stmt = conn.prepare(
            "SELECT relation_id, parent_kind, parent_id, child_kind, child_id,
                    section, section_offset, coverage, created_at, created_by
             FROM relations ORDER BY relation_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, u32>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, u32>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, i64>(6)?,
                row.get::<_, u32>(7)?,
                row.get::<_, String>(8)?,
                row.get::<_, String>(9)?,
            ))
        })?;

        let mut relations = Vec::new();
        for row in rows {
            let (
                relation_id,
                parent_kind,
                parent_id,
                child_kind,
                child_id,
                section,
                section_offset,
                coverage,
                created_at,
                created_by,
            ) = row?;
            relations.push(MappingRelation {
                relation_id,
                parent: ParentRef {
                    kind: Self::parse_parent_kind(&parent_kind)?,
                    id: parent_id,
                },
                child: WorkItemRef {
                    kind: Self::parse_work_item_kind(&child_kind)?,
                    id: child_id,
                },
                section,
                offset: section_offset as usize,
                coverage,
                created_at: Self::parse_timestamp(&created_at)?,
                created_by: Self::parse_uuid(&created_by)?,
            });
        }
        Ok(relations)
    }

    fn load_users(&self, conn: &Connection) -> Result<Vec<User>> {
        let mut stmt =
            conn.prepare("SELECT id, handle, role, created_at FROM users ORDER BY handle")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut users = Vec::new();
        for row in rows {
            let (id, handle, role, created_at) = row?;
            users.push(User {
                id: Self::parse_uuid(&id)?,
                handle,
                role: role.parse::<Role>().map_err(anyhow::Error::new)?,
                created_at: Self::parse_timestamp(&created_at)?,
            });
        }
        Ok(users)
    }

    fn load_permissions(&self, conn: &Connection) -> Result<Vec<PermissionEntry>> {
        let mut stmt = conn.prepare(
            "SELECT user_id, api_id, perms FROM permissions ORDER BY api_id, user_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (user_id, api_id, perms) = row?;
            entries.push(PermissionEntry {
                user_id: Self::parse_uuid(&user_id)?,
                api_id,
                perms: PermissionSet::from_letters(&perms).map_err(anyhow::Error::new)?,
            });
        }
        Ok(entries)
    }

    fn load_history(&self, conn: &Connection) -> Result<Vec<VersionRecord>> {
        let mut stmt = conn.prepare(
            "SELECT item_kind, item_id, version, object, mapping, created_at, created_by
             FROM version_records ORDER BY seq",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (item_kind, item_id, version, object, mapping, created_at, created_by) = row?;
            records.push(VersionRecord {
                item: WorkItemRef {
                    kind: Self::parse_work_item_kind(&item_kind)?,
                    id: item_id,
                },
                version,
                object: Self::from_json(&object)?,
                mapping: match mapping {
                    Some(json) => Some(Self::from_json(&json)?),
                    None => None,
                },
                created_at: Self::parse_timestamp(&created_at)?,
                created_by: Self::parse_uuid(&created_by)?,
            });
        }
        Ok(records)
    }
}

impl DatabaseBackend for SqliteBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Sqlite
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<TraceStore> {
        let conn = self.conn.lock().unwrap();

        let (name, counters): (String, String) = conn
            .query_row("SELECT name, counters FROM metadata WHERE id = 1", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap_or_else(|_| (String::new(), String::new()));
        let counters: IdCounters = if counters.is_empty() {
            IdCounters::default()
        } else {
            Self::from_json(&counters)?
        };

        Ok(TraceStore {
            name,
            work_items: self.load_work_items(&conn)?,
            relations: self.load_relations(&conn)?,
            users: self.load_users(&conn)?,
            permissions: self.load_permissions(&conn)?,
            history: self.load_history(&conn)?,
            counters,
        })
    }

    fn save(&self, store: &TraceStore) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();

        // Full rewrite inside one transaction for atomicity
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM work_items", [])?;
        tx.execute("DELETE FROM relations", [])?;
        tx.execute("DELETE FROM users", [])?;
        tx.execute("DELETE FROM permissions", [])?;
        tx.execute("DELETE FROM version_records", [])?;
        tx.execute("DELETE FROM metadata", [])?;

        tx.execute(
            "INSERT INTO metadata (id, name, counters) VALUES (1, ?1, ?2)",
            params![store.name, Self::to_json(&store.counters)?],
        )?;

        for item in &store.work_items {
            tx.execute(
                "INSERT INTO work_items (kind, id, version, created_at, created_by, data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    item.kind().as_str(),
                    item.id,
                    item.version,
                    item.created_at.to_rfc3339(),
                    item.created_by.to_string(),
                    Self::to_json(&item.data)?,
                ],
            )?;
        }

        for rel in &store.relations {
            tx.execute(
                "INSERT INTO relations
                 (relation_id, parent_kind, parent_id, child_kind, child_id,
                  section, section_offset, coverage, created_at, created_by)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    rel.relation_id,
                    rel.parent.kind.to_string(),
                    rel.parent.id,
                    rel.child.kind.as_str(),
                    rel.child.id,
                    rel.section,
                    rel.offset as i64,
                    rel.coverage,
                    rel.created_at.to_rfc3339(),
                    rel.created_by.to_string(),
                ],
            )?;
        }

        for user in &store.users {
            tx.execute(
                "INSERT INTO users (id, handle, role, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    user.id.to_string(),
                    user.handle,
                    Self::role_to_str(user.role),
                    user.created_at.to_rfc3339(),
                ],
            )?;
        }

        for entry in &store.permissions {
            tx.execute(
                "INSERT INTO permissions (user_id, api_id, perms) VALUES (?1, ?2, ?3)",
                params![
                    entry.user_id.to_string(),
                    entry.api_id,
                    entry.perms.as_letters(),
                ],
            )?;
        }

        for record in &store.history {
            tx.execute(
                "INSERT INTO version_records
                 (item_kind, item_id, version, object, mapping, created_at, created_by)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.item.kind.as_str(),
                    record.item.id,
                    record.version,
                    Self::to_json(&record.object)?,
                    match &record.mapping {
                        Some(value) => Some(Self::to_json(value)?),
                        None => None,
                    },
                    record.created_at.to_rfc3339(),
                    record.created_by.to_string(),
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }
}
