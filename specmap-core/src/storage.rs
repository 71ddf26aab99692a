use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::store::TraceStore;

/// Handles saving and loading a trace database from disk with file
/// locking for rudimentary multi-user support
pub struct Storage {
    file_path: PathBuf,
    lock_file_path: PathBuf,
}

impl Storage {
    /// Creates a new Storage instance
    pub fn new<P: AsRef<Path>>(file_path: P) -> Self {
        let file_path = file_path.as_ref().to_path_buf();
        let lock_file_path = file_path.with_extension("yaml.lock");
        Self {
            file_path,
            lock_file_path,
        }
    }

    /// Returns the path to the storage file
    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Acquire an exclusive lock on the file for writing
    /// Returns the lock file handle which must be held during the operation
    fn acquire_write_lock(&self) -> Result<File> {
        if let Some(parent) = self.lock_file_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.lock_file_path)
            .with_context(|| format!("Failed to create lock file: {:?}", self.lock_file_path))?;

        // Try to acquire exclusive lock with timeout
        let start = std::time::Instant::now();
        let timeout = Duration::from_secs(5);

        loop {
            // Called through the trait so the fs2 method wins over the
            // same-named std inherent method on newer toolchains.
            match FileExt::try_lock_exclusive(&lock_file) {
                Ok(()) => return Ok(lock_file),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if start.elapsed() > timeout {
                        anyhow::bail!(
                            "Timeout waiting for file lock - another user may be editing: {:?}",
                            self.file_path
                        );
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Failed to acquire lock on {:?}", self.lock_file_path)
                    })
                }
            }
        }
    }

    /// Acquire a shared lock on the file for reading
    fn acquire_read_lock(&self) -> Result<Option<File>> {
        if !self.lock_file_path.exists() {
            return Ok(None);
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .open(&self.lock_file_path)
            .with_context(|| format!("Failed to open lock file: {:?}", self.lock_file_path))?;

        let start = std::time::Instant::now();
        let timeout = Duration::from_secs(5);

        loop {
            match FileExt::try_lock_shared(&lock_file) {
                Ok(()) => return Ok(Some(lock_file)),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if start.elapsed() > timeout {
                        anyhow::bail!(
                            "Timeout waiting for file lock - another user may be editing: {:?}",
                            self.file_path
                        );
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Failed to acquire lock on {:?}", self.lock_file_path)
                    })
                }
            }
        }
    }

    /// Loads the trace database from the YAML file with file locking
    pub fn load(&self) -> Result<TraceStore> {
        // Create the file if it doesn't exist
        if !self.file_path.exists() {
            let parent = self
                .file_path
                .parent()
                .context("Failed to get parent directory")?;
            fs::create_dir_all(parent)?;
            let default_store = TraceStore::new();
            self.save(&default_store)?;
            return Ok(default_store);
        }

        // Acquire shared lock for reading
        let _lock = self.acquire_read_lock()?;

        let file = File::open(&self.file_path)
            .with_context(|| format!("Failed to open file: {:?}", self.file_path))?;
        let reader = BufReader::new(file);

        let store: TraceStore = serde_yaml::from_reader(reader)
            .with_context(|| format!("Failed to parse YAML from {:?}", self.file_path))?;

        Ok(store)
    }

    /// Saves the trace database to the YAML file with file locking
    pub fn save(&self, store: &TraceStore) -> Result<()> {
        if let Some(parent) = self.file_path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Acquire exclusive lock for writing
        let mut lock_file = self.acquire_write_lock()?;

        // Write lock holder info (optional, for debugging)
        let _ = writeln!(
            lock_file,
            "Locked by PID {} at {}",
            std::process::id(),
            chrono::Utc::now().to_rfc3339()
        );

        let yaml = serde_yaml::to_string(store)?;
        fs::write(&self.file_path, yaml)?;

        // Lock is automatically released when lock_file is dropped
        Ok(())
    }

    /// Perform an atomic update operation with proper locking
    /// This reloads the file, applies changes, and saves atomically.
    /// If the update function fails, nothing is written: the working
    /// copy is discarded and the on-disk state is untouched.
    pub fn update_atomically<T, F>(&self, update_fn: F) -> Result<(TraceStore, T)>
    where
        F: FnOnce(&mut TraceStore) -> crate::error::Result<T>,
    {
        // Acquire exclusive lock
        let mut lock_file = self.acquire_write_lock()?;

        let _ = writeln!(
            lock_file,
            "Locked by PID {} at {}",
            std::process::id(),
            chrono::Utc::now().to_rfc3339()
        );

        // Load latest version from disk
        let mut store = if self.file_path.exists() {
            let file = File::open(&self.file_path)
                .with_context(|| format!("Failed to open file: {:?}", self.file_path))?;
            let reader = BufReader::new(file);
            serde_yaml::from_reader(reader)
                .with_context(|| format!("Failed to parse YAML from {:?}", self.file_path))?
        } else {
            TraceStore::new()
        };

        let out = update_fn(&mut store)?;

        let yaml = serde_yaml::to_string(&store)?;
        fs::write(&self.file_path, yaml)?;

        // Lock is released when lock_file is dropped
        Ok((store, out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ParentKind, ParentRef, WorkItemData};
    use tempfile::tempdir;

    #[test]
    fn test_load_creates_empty_database() {
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path().join("trace.yaml"));
        let store = storage.load().unwrap();
        assert!(store.work_items.is_empty());
        assert!(storage.path().exists());
    }

    #[test]
    fn test_save_and_reload_round_trip() {
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path().join("trace.yaml"));

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
        storage.save(&store).unwrap();

        let reloaded = storage.load().unwrap();
        assert_eq!(reloaded.work_items.len(), 2);
        assert_eq!(reloaded.relations.len(), 1);
        assert_eq!(
            reloaded.coverage_for(ParentRef {
                kind: ParentKind::Api,
                id: api_id,
            }),
            store.coverage_for(ParentRef {
                kind: ParentKind::Api,
                id: api_id,
            })
        );
    }

    #[test]
    fn test_failed_update_leaves_file_untouched() {
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path().join("trace.yaml"));

        let mut store = TraceStore::new();
        let admin = store.bootstrap_admin();
        store
            .add_api("frames", "libframes", "1.2", "text".into(), &admin)
            .unwrap();
        storage.save(&store).unwrap();

        let result = storage.update_atomically(|s| {
            s.name = "should not persist".into();
            Err::<(), _>(crate::error::CoreError::validation("field", "forced failure"))
        });
        assert!(result.is_err());

        let reloaded = storage.load().unwrap();
        assert_eq!(reloaded.name, "");
        assert_eq!(reloaded.work_items.len(), 1);
    }
}
