//! Per plant+dryer processing checkpoints.
//!
//! A checkpoint holds the modification-time watermark of the last run and a
//! ledger of the files it processed. It is stored as one JSON document per
//! partition, `last_run_timestamp_{plant}_{dryer}.json`, in the checkpoint
//! folder. The field names match the documents the plants already have.
//!
//! Updates are compare-and-swap on the document's `version`: the store
//! re-reads the current document and refuses to write when another run has
//! advanced it in the meantime.

use crate::constants::{CHECKPOINT_FILE_PREFIX, CHECKPOINT_LEDGER_LIMIT};
use crate::error::{EtlError, Result};
use crate::models::{FileOutcome, FileStatus, Plant};
use crate::storage::Storage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One ledger line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedFileEntry {
    #[serde(rename = "fileId")]
    pub file_id: String,
    #[serde(rename = "fileName")]
    pub file_name: String,
    #[serde(rename = "processedAt")]
    pub processed_at: DateTime<Utc>,
    pub status: FileStatus,
    pub records_processed: usize,
}

impl From<&FileOutcome> for ProcessedFileEntry {
    fn from(outcome: &FileOutcome) -> Self {
        Self {
            file_id: outcome.file.file_id.clone(),
            file_name: outcome.file.name.clone(),
            processed_at: outcome.processed_at,
            status: outcome.status,
            records_processed: outcome.records_processed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(rename = "planta")]
    pub plant: Plant,
    #[serde(rename = "secadora")]
    pub dryer: String,
    /// Maximum modification time among files processed so far
    #[serde(rename = "last_run")]
    pub last_run_timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "last_processed_files", default)]
    pub processed_files: Vec<ProcessedFileEntry>,
    #[serde(default)]
    pub total_files_processed: usize,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub version: u64,
}

impl Checkpoint {
    /// A partition that has never run: everything is new
    pub fn new(plant: Plant, dryer: impl Into<String>) -> Self {
        Self {
            plant,
            dryer: dryer.into(),
            last_run_timestamp: None,
            processed_files: Vec::new(),
            total_files_processed: 0,
            last_updated: None,
            version: 0,
        }
    }

    /// Next state after a run. Only successful files enter the ledger, which
    /// keeps the newest [`CHECKPOINT_LEDGER_LIMIT`] entries, and the watermark
    /// never moves backwards. The version is left to the store.
    pub fn advance(
        &self,
        outcomes: &[FileOutcome],
        new_watermark: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Checkpoint {
        let successful: Vec<ProcessedFileEntry> = outcomes
            .iter()
            .filter(|o| o.is_success())
            .map(ProcessedFileEntry::from)
            .collect();

        let last_run_timestamp = match (self.last_run_timestamp, new_watermark) {
            (Some(old), Some(new)) => Some(old.max(new)),
            (old, new) => old.or(new),
        };

        let mut processed_files = self.processed_files.clone();
        let added = successful.len();
        processed_files.extend(successful);
        if processed_files.len() > CHECKPOINT_LEDGER_LIMIT {
            processed_files.drain(..processed_files.len() - CHECKPOINT_LEDGER_LIMIT);
        }

        Checkpoint {
            plant: self.plant,
            dryer: self.dryer.clone(),
            last_run_timestamp,
            processed_files,
            total_files_processed: self.total_files_processed + added,
            last_updated: Some(now),
            version: self.version,
        }
    }
}

/// `last_run_timestamp_{plant}_{dryer}.json` with spaces and slashes made
/// safe for a file name
pub fn checkpoint_file_name(plant: Plant, dryer: &str) -> String {
    let sanitize = |s: &str| s.trim().replace([' ', '/', '\\'], "_");
    format!(
        "{}_{}_{}.json",
        CHECKPOINT_FILE_PREFIX,
        sanitize(plant.code()),
        sanitize(dryer)
    )
}

/// Checkpoint persistence over a storage backend
#[derive(Clone)]
pub struct CheckpointStore {
    storage: Arc<dyn Storage>,
    folder: String,
}

impl std::fmt::Debug for CheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointStore")
            .field("folder", &self.folder)
            .finish()
    }
}

impl CheckpointStore {
    pub fn new(storage: Arc<dyn Storage>, folder: impl Into<String>) -> Self {
        Self {
            storage,
            folder: folder.into(),
        }
    }

    /// Current checkpoint; a partition with no document starts empty
    pub async fn load(&self, plant: Plant, dryer: &str) -> Result<Checkpoint> {
        let unavailable = |reason: String| EtlError::CheckpointUnavailable {
            plant: plant.to_string(),
            dryer: dryer.to_string(),
            reason,
        };

        let name = checkpoint_file_name(plant, dryer);
        let Some(file) = self
            .storage
            .find(&self.folder, &name)
            .await
            .map_err(|e| unavailable(e.to_string()))?
        else {
            debug!("No checkpoint {} yet, starting from scratch", name);
            return Ok(Checkpoint::new(plant, dryer));
        };

        let bytes = self
            .storage
            .download(&file.file_id)
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        let checkpoint: Checkpoint = serde_json::from_slice(&bytes)
            .map_err(|e| unavailable(format!("{}: {}", name, e)))?;

        debug!(
            "Loaded checkpoint {} (version {}, watermark {:?})",
            name, checkpoint.version, checkpoint.last_run_timestamp
        );
        Ok(checkpoint)
    }

    /// Dryers of a plant that already have a checkpoint document, by the
    /// name stored in the document
    pub async fn dryers(&self, plant: Plant) -> Result<Vec<String>> {
        let prefix = format!("{}_{}_", CHECKPOINT_FILE_PREFIX, plant.code());
        let mut dryers = Vec::new();
        for file in self.storage.list_files(&self.folder).await? {
            let Some(stem) = file
                .name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".json"))
            else {
                continue;
            };
            let stored = self
                .storage
                .download(&file.file_id)
                .await
                .ok()
                .and_then(|bytes| serde_json::from_slice::<Checkpoint>(&bytes).ok());
            match stored {
                Some(checkpoint) => dryers.push(checkpoint.dryer),
                None => {
                    warn!("Unreadable checkpoint {}, using its file name", file.name);
                    dryers.push(stem.to_string());
                }
            }
        }
        dryers.sort();
        dryers.dedup();
        Ok(dryers)
    }

    /// Write `next` if the stored checkpoint is still at `expected.version`.
    /// Returns the written checkpoint with its new version.
    pub async fn update(&self, expected: &Checkpoint, next: Checkpoint) -> Result<Checkpoint> {
        let plant = expected.plant;
        let dryer = expected.dryer.as_str();
        let write_error = |reason: String| EtlError::CheckpointWrite {
            plant: plant.to_string(),
            dryer: dryer.to_string(),
            reason,
        };

        let current = self
            .load(plant, dryer)
            .await
            .map_err(|e| write_error(e.to_string()))?;
        if current.version != expected.version {
            return Err(EtlError::CheckpointConflict {
                plant: plant.to_string(),
                dryer: dryer.to_string(),
                expected: expected.version,
                found: current.version,
            });
        }

        let next = Checkpoint {
            version: expected.version + 1,
            ..next
        };
        let bytes = serde_json::to_vec_pretty(&next)?;
        let name = checkpoint_file_name(plant, dryer);
        self.storage
            .upload(&self.folder, &name, bytes, "application/json")
            .await
            .map_err(|e| write_error(e.to_string()))?;

        info!(
            "Checkpoint {} advanced to {:?} (version {})",
            name, next.last_run_timestamp, next.version
        );
        Ok(next)
    }
}
