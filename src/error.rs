//! Error handling for the drying-sensor ETL.
//!
//! Provides error types with enough context (file, plant, dryer) to report a
//! per-file failure without aborting the rest of a run.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A raw sensor file could not be parsed. The whole file is rejected.
    #[error("Parse error in {file} at line {line}: {reason}")]
    Parse {
        file: String,
        line: usize,
        reason: String,
    },

    #[error("Unsupported plant code: {code}")]
    UnsupportedPlant { code: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("File not found in storage: {file_id}")]
    FileNotFound { file_id: String },

    /// The checkpoint store could not be read before any work started.
    #[error("Checkpoint unavailable for {plant}/{dryer}: {reason}")]
    CheckpointUnavailable {
        plant: String,
        dryer: String,
        reason: String,
    },

    /// Another writer advanced the checkpoint since it was read.
    #[error(
        "Checkpoint conflict for {plant}/{dryer}: expected version {expected}, found {found}"
    )]
    CheckpointConflict {
        plant: String,
        dryer: String,
        expected: u64,
        found: u64,
    },

    #[error("Checkpoint write failed for {plant}/{dryer}: {reason}")]
    CheckpointWrite {
        plant: String,
        dryer: String,
        reason: String,
    },

    /// Lab control files or calibration curve documents are malformed.
    #[error("Invalid reference data in {file}: {reason}")]
    ReferenceData { file: String, reason: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl EtlError {
    /// Shorthand for a parse failure at a given line
    pub fn parse(file: &str, line: usize, reason: impl Into<String>) -> Self {
        EtlError::Parse {
            file: file.to_string(),
            line,
            reason: reason.into(),
        }
    }

    /// Shorthand for a reference-data failure
    pub fn reference(file: &str, reason: impl Into<String>) -> Self {
        EtlError::ReferenceData {
            file: file.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
