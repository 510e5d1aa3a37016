//! File storage abstraction.
//!
//! The pipeline only needs to list a folder, read a file by id and write a
//! named file into a folder. Writing a name that already exists in the
//! folder replaces it.
//!
//! Backends:
//! - [`LocalStorage`]: a directory tree, writes are atomic (temp + rename)
//! - [`MemoryStorage`]: in-process, with failure injection for tests

pub mod local;
pub mod memory;

pub use local::LocalStorage;
pub use memory::MemoryStorage;

use crate::error::Result;
use crate::models::FileRef;
use async_trait::async_trait;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Files directly inside `folder`, in no particular order.
    ///
    /// A folder that does not exist lists as empty.
    async fn list_files(&self, folder: &str) -> Result<Vec<FileRef>>;

    /// Full contents of a file.
    ///
    /// Returns `EtlError::FileNotFound` if the id is unknown.
    async fn download(&self, file_id: &str) -> Result<Vec<u8>>;

    /// Create or replace `folder/name`.
    async fn upload(
        &self,
        folder: &str,
        name: &str,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> Result<FileRef>;

    /// Look a file up by name
    async fn find(&self, folder: &str, name: &str) -> Result<Option<FileRef>> {
        Ok(self
            .list_files(folder)
            .await?
            .into_iter()
            .find(|f| f.name == name))
    }
}

/// Join a folder and a file name into a storage id
pub fn join_id(folder: &str, name: &str) -> String {
    let folder = folder.trim_matches('/');
    if folder.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", folder, name)
    }
}
