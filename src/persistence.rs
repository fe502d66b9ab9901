//! Key/value persistence for the conversation store
//!
//! The store serializes its conversations to a single JSON blob and hands
//! it to a [`Persistence`] backend under a configured key.
//! [`SledPersistence`] keeps blobs in an embedded `sled` database;
//! [`MemoryPersistence`] is a process-local map for tests and ephemeral use.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use directories::ProjectDirs;

use crate::error::{ChatError, Result};

/// Blob storage keyed by string.
pub trait Persistence: Send + Sync {
    /// Store `blob` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns `ChatError::Storage` if the backend rejects the write.
    fn save(&self, key: &str, blob: &[u8]) -> Result<()>;

    /// Load the blob stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `ChatError::Storage` if the backend cannot be read.
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;
}

/// Persistence backed by an embedded `sled` database.
#[derive(Debug, Clone)]
pub struct SledPersistence {
    db: sled::Db,
}

impl SledPersistence {
    /// Open or create a database at `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the database directory
    ///
    /// # Errors
    ///
    /// Returns `ChatError::Storage` if the database cannot be opened
    ///
    /// # Examples
    ///
    /// ```
    /// use chatstream::persistence::{Persistence, SledPersistence};
    ///
    /// # fn main() -> chatstream::error::Result<()> {
    /// let dir = tempfile::tempdir()?;
    /// let store = SledPersistence::open(dir.path().join("history"))?;
    /// store.save("k", b"v")?;
    /// assert_eq!(store.load("k")?, Some(b"v".to_vec()));
    /// # Ok(())
    /// # }
    /// ```
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)
            .map_err(|e| ChatError::Storage(format!("Failed to open database: {}", e)))?;
        Ok(Self { db })
    }

    /// Open the database at `path`, or in the platform data directory when
    /// no path is given.
    ///
    /// # Errors
    ///
    /// Returns `ChatError::Storage` if the data directory cannot be
    /// determined or the database cannot be opened
    pub fn open_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::open(path),
            None => Self::open(default_history_path()?),
        }
    }
}

/// Platform data directory location of the history database.
///
/// # Errors
///
/// Returns `ChatError::Storage` if no home directory can be determined.
pub fn default_history_path() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("com", "chatstream", "chatstream")
        .ok_or_else(|| ChatError::Storage("Could not determine data directory".into()))?;
    Ok(proj_dirs.data_dir().join("history"))
}

impl Persistence for SledPersistence {
    fn save(&self, key: &str, blob: &[u8]) -> Result<()> {
        self.db
            .insert(key.as_bytes(), blob)
            .map_err(|e| ChatError::Storage(format!("Insert failed: {}", e)))?;

        self.db
            .flush()
            .map_err(|e| ChatError::Storage(format!("Flush failed: {}", e)))?;

        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let value = self
            .db
            .get(key.as_bytes())
            .map_err(|e| ChatError::Storage(format!("Get failed: {}", e)))?;
        Ok(value.map(|v| v.to_vec()))
    }
}

/// In-memory persistence.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryPersistence {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Persistence for MemoryPersistence {
    fn save(&self, key: &str, blob: &[u8]) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| ChatError::Storage("memory store lock poisoned".to_string()))?;
        entries.insert(key.to_string(), blob.to_vec());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| ChatError::Storage("memory store lock poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }
}
