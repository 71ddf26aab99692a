//! Database abstraction traits
//!
//! This module defines the core trait that all storage backends must
//! implement.

use anyhow::Result;

use crate::store::{StoreStats, TraceStore};

/// Types of database backends available
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// YAML file storage (single file)
    Yaml,
    /// SQLite database storage
    Sqlite,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendType::Yaml => write!(f, "YAML"),
            BackendType::Sqlite => write!(f, "SQLite"),
        }
    }
}

/// Core trait for database backends
///
/// Provides a unified interface for storing and retrieving a trace
/// database regardless of the underlying storage mechanism. Backends work
/// with the full [`TraceStore`]; the engine layers per-artifact mutation
/// scopes on top of `load`/`save`.
pub trait DatabaseBackend: Send + Sync {
    /// Returns the backend type
    fn backend_type(&self) -> BackendType;

    /// Returns the path to the database file
    fn path(&self) -> &std::path::Path;

    /// Loads the entire trace database
    fn load(&self) -> Result<TraceStore>;

    /// Saves the entire trace database
    fn save(&self, store: &TraceStore) -> Result<()>;

    /// Returns true if the database file exists
    fn exists(&self) -> bool {
        self.path().exists()
    }

    /// Creates the database with empty data if it doesn't exist
    fn create_if_not_exists(&self) -> Result<()> {
        if !self.exists() {
            self.save(&TraceStore::new())?;
        }
        Ok(())
    }

    /// Returns statistics about the database
    fn stats(&self) -> Result<StoreStats> {
        Ok(self.load()?.stats())
    }
}
