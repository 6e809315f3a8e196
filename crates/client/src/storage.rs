//! Local key-value persistence.
//!
//! Browser builds back this with `localStorage`; server-side rendering gets
//! [`NullStorage`]; the CLI uses [`FileStorage`]. Stores only ever see the
//! [`KeyValueStorage`] capability.
//!
//! Storage failures never escape to callers of the stores. The `read_json`,
//! `write_json` and `erase` helpers log and swallow them, so a broken or
//! missing backend degrades to "nothing persisted".

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::warn;

/// Keys shared by the stores. Each store owns distinct keys; there is no
/// transaction across keys.
pub mod keys {
    pub const AUTH_TOKEN: &str = "authToken";
    pub const USER_ROLE: &str = "userRole";
    pub const ACCOUNT_STATUS: &str = "accountStatus";
    pub const USER_ID: &str = "userId";
    pub const USERNAME: &str = "username";
    pub const USER_EMAIL: &str = "userEmail";
    pub const ANONYMOUS_CART: &str = "anonymousCart";
    pub const USER_FAVORITES: &str = "userFavorites";

    /// Keys written by the token store.
    pub const SESSION: [&str; 6] = [
        AUTH_TOKEN,
        USER_ROLE,
        ACCOUNT_STATUS,
        USER_ID,
        USERNAME,
        USER_EMAIL,
    ];
}

/// Errors raised by a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Reading or writing the backing file failed.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file or a stored value is not valid JSON.
    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backend refused the operation (quota exceeded, private mode, ...).
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// String-valued key-value storage.
pub trait KeyValueStorage: Send + Sync {
    /// Read a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a value, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove a value. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Read a string value, treating failures as absent.
pub fn read_string(storage: &dyn KeyValueStorage, key: &str) -> Option<String> {
    match storage.get(key) {
        Ok(value) => value,
        Err(e) => {
            warn!(key, error = %e, "Failed to read from storage");
            None
        }
    }
}

/// Read and decode a JSON value, treating failures and corrupt data as absent.
pub fn read_json<T: DeserializeOwned>(storage: &dyn KeyValueStorage, key: &str) -> Option<T> {
    let raw = read_string(storage, key)?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key, error = %e, "Ignoring corrupt stored value");
            None
        }
    }
}

/// Write a string value, logging failures.
pub fn write_string(storage: &dyn KeyValueStorage, key: &str, value: &str) {
    if let Err(e) = storage.set(key, value) {
        warn!(key, error = %e, "Failed to write to storage");
    }
}

/// Encode and write a JSON value, logging failures.
pub fn write_json<T: Serialize>(storage: &dyn KeyValueStorage, key: &str, value: &T) {
    match serde_json::to_string(value) {
        Ok(raw) => write_string(storage, key, &raw),
        Err(e) => warn!(key, error = %e, "Failed to encode value for storage"),
    }
}

/// Remove a value, logging failures.
pub fn erase(storage: &dyn KeyValueStorage, key: &str) {
    if let Err(e) = storage.remove(key) {
        warn!(key, error = %e, "Failed to remove from storage");
    }
}

// =============================================================================
// Backends
// =============================================================================

/// Storage for targets without a persistent store. Reads find nothing and
/// writes are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStorage;

impl KeyValueStorage for NullStorage {
    fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Ok(None)
    }

    fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
        Ok(())
    }

    fn remove(&self, _key: &str) -> Result<(), StorageError> {
        Ok(())
    }
}

/// In-process storage, used by tests and by hosts that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a key is currently present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

/// Storage persisted as a single JSON object on disk.
///
/// Every write rewrites the whole file through a temporary sibling and a
/// rename, so a crash mid-write leaves the previous contents intact.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    /// Use the file at `path`, which need not exist yet.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>, StorageError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) if raw.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn update(
        &self,
        mutate: impl FnOnce(&mut BTreeMap<String, String>),
    ) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.load()?;
        mutate(&mut entries);
        self.store(&entries)
    }
}

impl KeyValueStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.update(|entries| {
            entries.remove(key);
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;

    /// Backend whose every operation fails, for exercising degrade paths.
    pub(crate) struct BrokenStorage;

    impl KeyValueStorage for BrokenStorage {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Unavailable("quota exceeded".to_string()))
        }

        fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("quota exceeded".to_string()))
        }

        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("quota exceeded".to_string()))
        }
    }

    #[test]
    fn test_memory_storage_roundtrip() {
        let storage = MemoryStorage::new();
        storage.set("k", "v").unwrap();
        assert_eq!(storage.get("k").unwrap().as_deref(), Some("v"));
        storage.remove("k").unwrap();
        assert!(!storage.contains("k"));
    }

    #[test]
    fn test_null_storage_forgets_everything() {
        let storage = NullStorage;
        write_string(&storage, keys::AUTH_TOKEN, "abc");
        assert_eq!(read_string(&storage, keys::AUTH_TOKEN), None);
    }

    #[test]
    fn test_broken_storage_degrades_to_absent() {
        let storage = BrokenStorage;
        write_json(&storage, keys::USER_FAVORITES, &vec![1, 2]);
        assert_eq!(read_json::<Vec<i32>>(&storage, keys::USER_FAVORITES), None);
        erase(&storage, keys::USER_FAVORITES);
    }

    #[test]
    fn test_corrupt_json_reads_as_absent() {
        let storage = MemoryStorage::new();
        storage.set(keys::ANONYMOUS_CART, "{not json").unwrap();
        assert_eq!(
            read_json::<serde_json::Value>(&storage, keys::ANONYMOUS_CART),
            None
        );
    }

    #[test]
    fn test_file_storage_persists_across_instances() {
        let dir = std::env::temp_dir().join(format!("marketstall-{}", uuid::Uuid::new_v4()));
        let path = dir.join("storage.json");

        let first = FileStorage::new(&path);
        first.set(keys::USERNAME, "ada").unwrap();
        first.set(keys::USER_ROLE, "USER").unwrap();
        first.remove(keys::USER_ROLE).unwrap();

        let second = FileStorage::new(&path);
        assert_eq!(second.get(keys::USERNAME).unwrap().as_deref(), Some("ada"));
        assert_eq!(second.get(keys::USER_ROLE).unwrap(), None);

        std::fs::remove_dir_all(dir).unwrap();
    }
}
