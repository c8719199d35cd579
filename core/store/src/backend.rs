//! Storage backends for persisted store files.
//!
//! A backend holds one opaque encrypted blob per store. The memory backend
//! keeps blobs in a process-wide registry so that reopening the same URI
//! within a process finds the provisioned store; the file backend persists
//! to disk with an atomic replace.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use tracing::debug;

use keyfort_common::{Error, Result};

/// Backend for loading and saving a store blob.
///
/// # Errors
/// All operations surface I/O failures as `Backend` errors.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Location string the backend was created from.
    fn location(&self) -> &str;

    /// Load the blob, or `None` when the store does not exist.
    async fn load(&self) -> Result<Option<Vec<u8>>>;

    /// Persist the blob, replacing any previous content atomically.
    async fn save(&self, bytes: Vec<u8>) -> Result<()>;

    /// Delete the blob. Returns whether it existed.
    async fn remove(&self) -> Result<bool>;
}

static MEMORY_STORES: Lazy<Mutex<HashMap<String, Vec<u8>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// In-memory backend, shared per name across the process.
pub struct MemoryBackend {
    location: String,
    name: String,
}

impl MemoryBackend {
    pub fn new(name: &str, location: &str) -> Self {
        Self {
            location: location.to_string(),
            name: name.to_string(),
        }
    }

    fn registry() -> std::sync::MutexGuard<'static, HashMap<String, Vec<u8>>> {
        match MEMORY_STORES.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn location(&self) -> &str {
        &self.location
    }

    async fn load(&self) -> Result<Option<Vec<u8>>> {
        Ok(Self::registry().get(&self.name).cloned())
    }

    async fn save(&self, bytes: Vec<u8>) -> Result<()> {
        debug!(store = %self.name, size = bytes.len(), "saving in-memory store");
        Self::registry().insert(self.name.clone(), bytes);
        Ok(())
    }

    async fn remove(&self) -> Result<bool> {
        Ok(Self::registry().remove(&self.name).is_some())
    }
}

/// File-backed store blob.
pub struct FileBackend {
    location: String,
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: PathBuf, location: &str) -> Self {
        Self {
            location: location.to_string(),
            path,
        }
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    fn location(&self) -> &str {
        &self.location
    }

    async fn load(&self) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Backend(format!(
                "Failed to read store file '{}': {}",
                self.path.display(),
                e
            ))),
        }
    }

    async fn save(&self, bytes: Vec<u8>) -> Result<()> {
        // Write to a shadow file and rename over the target so that a
        // crash mid-write cannot corrupt an existing store
        let tmp = self.path.with_extension("tmp");
        debug!(path = %self.path.display(), size = bytes.len(), "saving store file");
        tokio::fs::write(&tmp, &bytes).await.map_err(|e| {
            Error::Backend(format!(
                "Failed to write store file '{}': {}",
                tmp.display(),
                e
            ))
        })?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            Error::Backend(format!(
                "Failed to replace store file '{}': {}",
                self.path.display(),
                e
            ))
        })
    }

    async fn remove(&self) -> Result<bool> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Backend(format!(
                "Failed to remove store file '{}': {}",
                self.path.display(),
                e
            ))),
        }
    }
}
