//! Durable key/value storage for persisted session records.
//!
//! The host hands the plugin a storage key; backends decide where the record
//! lives. Writes must be all-or-nothing: a failed `store` leaves the previous
//! value readable.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid storage key {key:?}")]
    InvalidKey { key: String },
    #[error(transparent)]
    Secrets(#[from] crate::secrets::SecretsError),
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Backend for persisted records addressed by a host-provided key.
pub trait SessionStorage: Send + Sync {
    /// Returns `None` when nothing is stored under `key`.
    fn load(&self, key: &str) -> StorageResult<Option<String>>;

    /// Replaces the record under `key` atomically.
    fn store(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Removes the record; removing a missing key is not an error.
    fn remove(&self, key: &str) -> StorageResult<()>;
}

/// Stores each key as a JSON file in a directory.
///
/// Writes go to a sibling temporary file which is synced and then renamed
/// over the target, so readers only ever see the old or the new record.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        let trimmed = key.trim();
        if trimmed.is_empty() || trimmed.contains("..") {
            return Err(StorageError::InvalidKey { key: key.into() });
        }
        let file_name: String = trimmed
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        Ok(self.root.join(format!("{file_name}.json")))
    }
}

impl SessionStorage for FileStorage {
    fn load(&self, key: &str) -> StorageResult<Option<String>> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }

    fn store(&self, key: &str, value: &str) -> StorageResult<()> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.root).map_err(|source| StorageError::Io {
            path: self.root.clone(),
            source,
        })?;

        let tmp_path = path.with_extension("json.tmp");
        let write_tmp = || -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(value.as_bytes())?;
            file.sync_all()
        };
        if let Err(source) = write_tmp() {
            let _ = fs::remove_file(&tmp_path);
            return Err(StorageError::Io {
                path: tmp_path,
                source,
            });
        }

        fs::rename(&tmp_path, &path).map_err(|source| {
            let _ = fs::remove_file(&tmp_path);
            StorageError::Io {
                path: path.clone(),
                source,
            }
        })?;
        tracing::debug!(path = %path.display(), "stored session record");
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }
}

/// Process-local storage, used by tests and hosts without durable state.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StorageResult<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| StorageError::Unavailable("memory storage lock poisoned".into()))
    }
}

impl SessionStorage for MemoryStorage {
    fn load(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn store(&self, key: &str, value: &str) -> StorageResult<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_storage_round_trips_and_removes() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("sessions"));

        assert_eq!(storage.load("ncloud/session").unwrap(), None);
        storage.store("ncloud/session", "{\"a\":1}").unwrap();
        assert_eq!(
            storage.load("ncloud/session").unwrap().as_deref(),
            Some("{\"a\":1}")
        );

        storage.store("ncloud/session", "{\"a\":2}").unwrap();
        assert_eq!(
            storage.load("ncloud/session").unwrap().as_deref(),
            Some("{\"a\":2}")
        );

        storage.remove("ncloud/session").unwrap();
        storage.remove("ncloud/session").unwrap();
        assert_eq!(storage.load("ncloud/session").unwrap(), None);
    }

    #[test]
    fn file_storage_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        storage.store("key", "value").unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["key.json"]);
    }

    #[test]
    fn file_storage_rejects_traversal_keys() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        assert!(matches!(
            storage.store("../escape", "x"),
            Err(StorageError::InvalidKey { .. })
        ));
        assert!(matches!(
            storage.load("  "),
            Err(StorageError::InvalidKey { .. })
        ));
    }

    #[test]
    fn failed_write_keeps_previous_record() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        storage.store("session", "old").unwrap();

        // A directory squatting on the temp path makes the write fail.
        fs::create_dir(dir.path().join("session.json.tmp")).unwrap();
        assert!(storage.store("session", "new").is_err());
        assert_eq!(storage.load("session").unwrap().as_deref(), Some("old"));
    }

    #[test]
    fn memory_storage_round_trips() {
        let storage = MemoryStorage::new();
        storage.store("k", "v").unwrap();
        assert_eq!(storage.load("k").unwrap().as_deref(), Some("v"));
        storage.remove("k").unwrap();
        assert_eq!(storage.load("k").unwrap(), None);
    }
}
