//! Secado Processor Library
//!
//! Incremental ETL for grain-dryer sensor data. Raw voltage exports from the
//! plants' loggers are normalized into one reading schema, matched with the
//! laboratory's batch records, converted to physical temperature and
//! humidity through per-variety calibration curves, and consolidated into a
//! historical table keyed by batch.
//!
//! This library provides:
//! - Parsing of the JPV and RB export formats ([`parser`])
//! - Lab window matching with a configurable overlap policy ([`lab`])
//! - Two-stage calibration with fixed and time-indexed corrections ([`calibration`])
//! - Per plant+dryer checkpoints so each raw file is ingested once
//!   ([`checkpoint`], [`selector`])
//! - First-seen-wins historical consolidation ([`consolidator`])
//! - Run orchestration over a pluggable storage backend ([`pipeline`], [`storage`])

pub mod calibration;
pub mod checkpoint;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod consolidator;
pub mod constants;
pub mod error;
pub mod lab;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod reference;
pub mod selector;
pub mod storage;
pub mod table;

pub use calibration::{CalibrationEngine, CurveSet, CurveYearPolicy};
pub use checkpoint::{Checkpoint, CheckpointStore};
pub use classifier::{Classifier, NullClassifier};
pub use config::{EtlConfig, OutputFormat};
pub use consolidator::{consolidate, HistoricalDataset};
pub use error::{EtlError, Result};
pub use lab::{LabCrosser, OverlapPolicy};
pub use models::{CalibratedReading, FileRef, LabRecord, LabeledReading, Plant, Reading, RunReport, Variable};
pub use parser::FormatParser;
pub use pipeline::Pipeline;
pub use storage::{LocalStorage, MemoryStorage, Storage};
pub use table::StringTable;
