//! Directory-tree storage backend

use super::{join_id, Storage};
use crate::error::{EtlError, Result};
use crate::models::FileRef;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::task;
use tracing::debug;

/// Storage rooted at a local directory; file ids are paths relative to it
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an id under the root, refusing anything that escapes it
    fn resolve(&self, id: &str) -> Result<PathBuf> {
        let relative = Path::new(id.trim_start_matches('/'));
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(EtlError::Storage {
                message: format!("invalid storage path: {}", id),
            });
        }
        Ok(self.root.join(relative))
    }
}

fn file_ref(id: String, name: String, metadata: &std::fs::Metadata) -> FileRef {
    let modified_time = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    FileRef {
        file_id: id,
        name,
        modified_time,
        size: metadata.len(),
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn list_files(&self, folder: &str) -> Result<Vec<FileRef>> {
        let dir = self.resolve(folder)?;
        if !fs::try_exists(&dir).await? {
            debug!("Folder {} does not exist, listing as empty", dir.display());
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            // Skip in-flight temp files from concurrent uploads
            if name.starts_with(".tmp") {
                continue;
            }
            files.push(file_ref(join_id(folder, &name), name, &metadata));
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>> {
        let path = self.resolve(file_id)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(EtlError::FileNotFound {
                file_id: file_id.to_string(),
            }),
            Err(e) => Err(EtlError::Io(e)),
        }
    }

    async fn upload(
        &self,
        folder: &str,
        name: &str,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> Result<FileRef> {
        let id = join_id(folder, name);
        let target = self.resolve(&id)?;
        let dir = target
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        fs::create_dir_all(&dir).await?;

        debug!(
            "Writing {} ({} bytes, {})",
            target.display(),
            bytes.len(),
            mime_type
        );

        let target_for_task = target.clone();
        let metadata = task::spawn_blocking(move || -> Result<std::fs::Metadata> {
            let mut temp = tempfile::Builder::new().prefix(".tmp").tempfile_in(&dir)?;
            temp.write_all(&bytes)?;
            temp.as_file().sync_all()?;
            temp.persist(&target_for_task)
                .map_err(|e| EtlError::Io(e.error))?;
            Ok(std::fs::metadata(&target_for_task)?)
        })
        .await
        .map_err(|e| EtlError::Storage {
            message: format!("upload task failed: {}", e),
        })??;

        Ok(file_ref(id, name.to_string(), &metadata))
    }
}
