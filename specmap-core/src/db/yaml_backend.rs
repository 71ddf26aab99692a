//! YAML file storage backend
//!
//! This backend stores the whole trace database in a single YAML file,
//! using the existing Storage implementation with file locking support.

use anyhow::Result;
use std::path::{Path, PathBuf};

use super::traits::{BackendType, DatabaseBackend};
use crate::storage::Storage;
use crate::store::TraceStore;

/// YAML file backend implementation
///
/// Wraps [`Storage`] to implement the [`DatabaseBackend`] trait, keeping
/// the fs2 lock protocol of the direct storage path.
pub struct YamlBackend {
    storage: Storage,
    path: PathBuf,
}

impl YamlBackend {
    /// Creates a new YAML backend for the given file path
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            storage: Storage::new(&path),
            path,
        }
    }

    /// Gets a reference to the underlying Storage
    pub fn storage(&self) -> &Storage {
        &self.storage
    }
}

impl DatabaseBackend for YamlBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Yaml
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<TraceStore> {
        self.storage.load()
    }

    fn save(&self, store: &TraceStore) -> Result<()> {
        self.storage.save(store)
    }
}
