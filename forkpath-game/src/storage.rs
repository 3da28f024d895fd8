//! Durable integer key-value persistence.
//!
//! The engine only ever stores integers under the keys in
//! [`crate::constants`]. Writes land in memory first and reach durable
//! storage on [`KeyValueStore::flush`].
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Errors raised by a [`KeyValueStore`] backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to access store file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("store file {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("store is read-only; refused to write `{key}`")]
    ReadOnly { key: String },
}

/// Integer key-value persistence used by the ledger, catalog, and settings.
///
/// Implementations are cheap handles: cloning one must share the same
/// underlying storage so every service observes the same values.
pub trait KeyValueStore {
    /// Read the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get_int(&self, key: &str) -> Result<Option<i64>, StorageError>;

    /// Store `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend refuses the write.
    fn set_int(&self, key: &str, value: i64) -> Result<(), StorageError>;

    /// Remove `key` if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend refuses the write.
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Persist pending writes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    fn flush(&self) -> Result<(), StorageError>;

    /// Whether a value exists for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn contains(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get_int(key)?.is_some())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct MemoryInner {
    values: BTreeMap<String, i64>,
    read_only: bool,
    flushes: usize,
}

/// In-process store. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with existing values.
    #[must_use]
    pub fn with_values<K: Into<String>>(values: impl IntoIterator<Item = (K, i64)>) -> Self {
        let store = Self::new();
        {
            let mut inner = lock(&store.inner);
            inner
                .values
                .extend(values.into_iter().map(|(k, v)| (k.into(), v)));
        }
        store
    }

    /// Reject every subsequent write until re-enabled.
    pub fn set_read_only(&self, read_only: bool) {
        lock(&self.inner).read_only = read_only;
    }

    /// Copy of every stored value.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, i64> {
        lock(&self.inner).values.clone()
    }

    /// Number of successful flushes, useful to assert persistence cadence.
    #[must_use]
    pub fn flush_count(&self) -> usize {
        lock(&self.inner).flushes
    }
}

impl KeyValueStore for MemoryStore {
    fn get_int(&self, key: &str) -> Result<Option<i64>, StorageError> {
        Ok(lock(&self.inner).values.get(key).copied())
    }

    fn set_int(&self, key: &str, value: i64) -> Result<(), StorageError> {
        let mut inner = lock(&self.inner);
        if inner.read_only {
            return Err(StorageError::ReadOnly {
                key: key.to_string(),
            });
        }
        inner.values.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut inner = lock(&self.inner);
        if inner.read_only {
            return Err(StorageError::ReadOnly {
                key: key.to_string(),
            });
        }
        inner.values.remove(key);
        Ok(())
    }

    fn flush(&self) -> Result<(), StorageError> {
        lock(&self.inner).flushes += 1;
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
struct FileDocument {
    values: BTreeMap<String, i64>,
}

#[derive(Debug)]
struct FileInner {
    path: PathBuf,
    document: FileDocument,
}

/// Store backed by a single JSON object file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    inner: Arc<Mutex<FileInner>>,
}

impl JsonFileStore {
    /// Open the store at `path`, starting empty when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let document = match fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => FileDocument::default(),
            Ok(raw) => serde_json::from_str(&raw).map_err(|source| StorageError::Json {
                path: path.clone(),
                source,
            })?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => FileDocument::default(),
            Err(source) => return Err(StorageError::Io { path, source }),
        };
        Ok(Self {
            inner: Arc::new(Mutex::new(FileInner { path, document })),
        })
    }

    /// Location of the backing file.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        lock(&self.inner).path.clone()
    }
}

impl KeyValueStore for JsonFileStore {
    fn get_int(&self, key: &str) -> Result<Option<i64>, StorageError> {
        Ok(lock(&self.inner).document.values.get(key).copied())
    }

    fn set_int(&self, key: &str, value: i64) -> Result<(), StorageError> {
        lock(&self.inner)
            .document
            .values
            .insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        lock(&self.inner).document.values.remove(key);
        Ok(())
    }

    fn flush(&self) -> Result<(), StorageError> {
        let inner = lock(&self.inner);
        let encoded =
            serde_json::to_string_pretty(&inner.document).map_err(|source| StorageError::Json {
                path: inner.path.clone(),
                source,
            })?;
        // Write beside the target and rename so a crash never leaves half a file.
        let staging = inner.path.with_extension("tmp");
        fs::write(&staging, encoded).map_err(|source| StorageError::Io {
            path: staging.clone(),
            source,
        })?;
        fs::rename(&staging, &inner.path).map_err(|source| StorageError::Io {
            path: inner.path.clone(),
            source,
        })
    }
}
