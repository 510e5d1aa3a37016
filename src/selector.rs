//! Incremental file selection against a checkpoint watermark

use crate::checkpoint::Checkpoint;
use crate::models::{FileOutcome, FileRef};
use chrono::{DateTime, Utc};
use tracing::debug;

/// Files modified strictly after the checkpoint watermark, oldest first
/// (ties broken by name). Without a watermark every file is new.
///
/// `accept` filters out files that are not raw sensor exports.
pub fn select_new<F>(checkpoint: &Checkpoint, listing: Vec<FileRef>, accept: F) -> Vec<FileRef>
where
    F: Fn(&FileRef) -> bool,
{
    let total = listing.len();
    let mut selected: Vec<FileRef> = listing
        .into_iter()
        .filter(|f| accept(f))
        .filter(|f| match checkpoint.last_run_timestamp {
            Some(watermark) => f.modified_time > watermark,
            None => true,
        })
        .collect();
    selected.sort_by(|a, b| {
        a.modified_time
            .cmp(&b.modified_time)
            .then_with(|| a.name.cmp(&b.name))
    });

    debug!(
        "Selected {} of {} files after watermark {:?}",
        selected.len(),
        total,
        checkpoint.last_run_timestamp
    );
    selected
}

/// Watermark after a run: the newest modification time among successful
/// files, never below the current one. `None` when nothing succeeded.
pub fn new_watermark(checkpoint: &Checkpoint, outcomes: &[FileOutcome]) -> Option<DateTime<Utc>> {
    let newest = outcomes
        .iter()
        .filter(|o| o.is_success())
        .map(|o| o.file.modified_time)
        .max()?;
    Some(match checkpoint.last_run_timestamp {
        Some(current) => current.max(newest),
        None => newest,
    })
}
