//! In-memory storage backend.
//!
//! Thread-safe via `RwLock`. Used by tests and dry runs; modification
//! times can be set explicitly so selection by watermark is reproducible.

use super::{join_id, Storage};
use crate::error::{EtlError, Result};
use crate::models::FileRef;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone)]
struct StoredFile {
    folder: String,
    name: String,
    bytes: Vec<u8>,
    modified_time: DateTime<Utc>,
}

impl StoredFile {
    fn file_ref(&self, id: &str) -> FileRef {
        FileRef {
            file_id: id.to_string(),
            name: self.name.clone(),
            modified_time: self.modified_time,
            size: self.bytes.len() as u64,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    files: Arc<RwLock<BTreeMap<String, StoredFile>>>,
    fail_paths: Arc<RwLock<Vec<String>>>,
}

fn poisoned() -> EtlError {
    EtlError::Storage {
        message: "lock poisoned".to_string(),
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a file with an explicit modification time
    pub fn insert_with_time(
        &self,
        folder: &str,
        name: &str,
        bytes: impl Into<Vec<u8>>,
        modified_time: DateTime<Utc>,
    ) -> Result<FileRef> {
        let id = join_id(folder, name);
        let stored = StoredFile {
            folder: folder.trim_matches('/').to_string(),
            name: name.to_string(),
            bytes: bytes.into(),
            modified_time,
        };
        let file = stored.file_ref(&id);
        self.files.write().map_err(|_| poisoned())?.insert(id, stored);
        Ok(file)
    }

    /// Make every operation on ids starting with `prefix` fail
    pub fn inject_failure(&self, prefix: impl Into<String>) -> Result<()> {
        self.fail_paths
            .write()
            .map_err(|_| poisoned())?
            .push(prefix.into());
        Ok(())
    }

    pub fn clear_failures(&self) -> Result<()> {
        self.fail_paths.write().map_err(|_| poisoned())?.clear();
        Ok(())
    }

    /// Contents of a file by folder and name, if present
    pub fn contents(&self, folder: &str, name: &str) -> Option<Vec<u8>> {
        let files = self.files.read().ok()?;
        files.get(&join_id(folder, name)).map(|f| f.bytes.clone())
    }

    /// Number of files stored under a folder
    pub fn count(&self, folder: &str) -> usize {
        let folder = folder.trim_matches('/');
        self.files
            .read()
            .map(|files| files.values().filter(|f| f.folder == folder).count())
            .unwrap_or(0)
    }

    fn check(&self, id: &str) -> Result<()> {
        let fail_paths = self.fail_paths.read().map_err(|_| poisoned())?;
        if fail_paths.iter().any(|p| id.starts_with(p.as_str())) {
            return Err(EtlError::Storage {
                message: format!("injected failure for {}", id),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn list_files(&self, folder: &str) -> Result<Vec<FileRef>> {
        let folder = folder.trim_matches('/');
        self.check(folder)?;
        let files = self.files.read().map_err(|_| poisoned())?;
        Ok(files
            .iter()
            .filter(|(_, f)| f.folder == folder)
            .map(|(id, f)| f.file_ref(id))
            .collect())
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>> {
        self.check(file_id)?;
        let files = self.files.read().map_err(|_| poisoned())?;
        files
            .get(file_id)
            .map(|f| f.bytes.clone())
            .ok_or_else(|| EtlError::FileNotFound {
                file_id: file_id.to_string(),
            })
    }

    async fn upload(
        &self,
        folder: &str,
        name: &str,
        bytes: Vec<u8>,
        _mime_type: &str,
    ) -> Result<FileRef> {
        self.check(&join_id(folder, name))?;
        self.insert_with_time(folder, name, bytes, Utc::now())
    }
}
