//! Run orchestration.
//!
//! A partition run takes one plant+dryer from its checkpoint to a new
//! watermark:
//!
//! 1. load the checkpoint (the only fatal step besides listing the raw folder)
//! 2. select raw files modified after the watermark
//! 3. load lab records and calibration curves for the plant
//! 4. per file, concurrently: parse, cross with lab, calibrate, write the
//!    processed table, validate and write the validated table
//! 5. advance the checkpoint from the successful files
//!
//! A file that fails at any step is reported and does not stop the others.
//! Consolidation is a separate run over a plant's validated folder.

pub mod report;

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::classifier::{validate, Classifier, NullClassifier};
use crate::config::{EtlConfig, FolderKind};
use crate::consolidator::{consolidate, ConsolidationReport, HistoricalDataset};
use crate::constants::HISTORICAL_FILE_STEM;
use crate::error::{EtlError, Result};
use crate::models::{FileOutcome, FileRef, FileStatus, Plant, RunReport};
use crate::parser::FormatParser;
use crate::reference::{ReferenceLoader, References};
use crate::selector::{new_watermark, select_new};
use crate::storage::Storage;
use crate::table::{decode_named, format_for_name, output_file_name, processed_table, validated_table};

use chrono::{DateTime, Datelike, Utc};
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use tokio::task;
use tracing::{debug, error, info, warn};

/// Result of one consolidation run
#[derive(Debug, Clone)]
pub struct ConsolidationRun {
    pub plant: Plant,
    pub folder: String,
    pub output_file: String,
    pub files: Vec<String>,
    pub rows: usize,
    pub report: ConsolidationReport,
    pub warnings: Vec<String>,
}

/// Per plant+dryer ETL runs over a storage backend
pub struct Pipeline {
    storage: Arc<dyn Storage>,
    config: EtlConfig,
    parser: FormatParser,
    classifier: Arc<dyn Classifier>,
    checkpoints: CheckpointStore,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("classifier", &self.classifier.name())
            .finish()
    }
}

impl Pipeline {
    pub fn new(storage: Arc<dyn Storage>, config: EtlConfig) -> Result<Self> {
        config.validate()?;
        let parser = FormatParser::from_config(&config)?;
        let checkpoints = CheckpointStore::new(storage.clone(), config.checkpoint_folder.clone());
        Ok(Self {
            storage,
            config,
            parser,
            classifier: Arc::new(NullClassifier),
            checkpoints,
        })
    }

    /// Use a classification model for validated rows
    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn config(&self) -> &EtlConfig {
        &self.config
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// Process every new raw file of one dryer and advance its checkpoint
    pub async fn run_partition(&self, plant: Plant, dryer: &str) -> Result<RunReport> {
        let started_at = Utc::now();
        let checkpoint = self.checkpoints.load(plant, dryer).await?;

        let raw_folder = self.config.raw_folder(plant, dryer);
        let listing = self.storage.list_files(&raw_folder).await?;
        let files_listed = listing.len();
        let selected = select_new(&checkpoint, listing, |f| self.config.is_sensor_file(&f.name));

        info!(
            "{}/{}: {} of {} files in {} are new",
            plant,
            dryer,
            selected.len(),
            files_listed,
            raw_folder
        );

        let mut report = RunReport {
            plant,
            dryer: dryer.to_string(),
            started_at,
            finished_at: started_at,
            files_listed,
            files_selected: selected.len(),
            outcomes: Vec::new(),
            previous_watermark: checkpoint.last_run_timestamp,
            new_watermark: checkpoint.last_run_timestamp,
            checkpoint_error: None,
            reference_warnings: Vec::new(),
        };

        if selected.is_empty() {
            report.finished_at = Utc::now();
            return Ok(report);
        }

        let references = ReferenceLoader::new(self.storage.as_ref(), &self.config)?
            .load(plant)
            .await;
        report.reference_warnings = references.warnings.clone();

        report.outcomes = self
            .process_files(plant, dryer, &selected, &references, started_at)
            .await;

        self.advance_checkpoint(&checkpoint, &mut report).await;
        report.finished_at = Utc::now();
        Ok(report)
    }

    /// Run every dryer of a plant that already has a checkpoint
    pub async fn run_all_dryers(&self, plant: Plant) -> Result<Vec<RunReport>> {
        let dryers = self.checkpoints.dryers(plant).await?;
        if dryers.is_empty() {
            warn!("No checkpoints found for {}, nothing to run", plant);
        }
        let mut reports = Vec::with_capacity(dryers.len());
        for dryer in dryers {
            reports.push(self.run_partition(plant, &dryer).await?);
        }
        Ok(reports)
    }

    async fn process_files(
        &self,
        plant: Plant,
        dryer: &str,
        files: &[FileRef],
        references: &References,
        run_at: DateTime<Utc>,
    ) -> Vec<FileOutcome> {
        let pb = if self.config.show_progress {
            ProgressBar::new(files.len() as u64)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) = ProgressStyle::default_bar().template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        ) {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb.set_message("Processing files");

        let concurrent_limit = self.config.max_concurrent_files.min(files.len()).max(1);
        debug!("Processing {} files, {} at a time", files.len(), concurrent_limit);

        let mut outcomes: Vec<FileOutcome> = stream::iter(files)
            .map(|file| {
                let pb = pb.clone();
                async move {
                    pb.set_message(format!("Processing: {}", file.name));
                    let outcome = match self.process_file(plant, dryer, file, references, run_at).await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            error!("Failed to process {}: {}", file.name, e);
                            FileOutcome::failed(file.clone(), e.to_string())
                        }
                    };
                    pb.inc(1);
                    outcome
                }
            })
            .buffer_unordered(concurrent_limit)
            .collect()
            .await;

        pb.finish_with_message("Processing complete");
        outcomes.sort_by(|a, b| {
            a.file
                .modified_time
                .cmp(&b.file.modified_time)
                .then_with(|| a.file.name.cmp(&b.file.name))
        });
        outcomes
    }

    async fn process_file(
        &self,
        plant: Plant,
        dryer: &str,
        file: &FileRef,
        references: &References,
        run_at: DateTime<Utc>,
    ) -> Result<FileOutcome> {
        let bytes = self.storage.download(&file.file_id).await?;

        let parser = self.parser.clone();
        let name = file.name.clone();
        let hint = dryer.to_string();
        let parsed = task::spawn_blocking(move || {
            parser.parse_with_hint(&bytes, &name, plant, Some(hint.as_str()))
        })
        .await
        .map_err(|e| EtlError::parse(&file.name, 0, format!("parser task failed: {}", e)))??;

        let mut warnings = Vec::new();
        if parsed.stats.unknown_variables > 0 {
            warnings.push(format!(
                "{} rows with unrecognized variables discarded",
                parsed.stats.unknown_variables
            ));
        }
        if parsed.stats.duplicates_dropped > 0 {
            warnings.push(format!(
                "{} duplicate readings dropped",
                parsed.stats.duplicates_dropped
            ));
        }

        let records_processed = parsed.readings.len();
        let year = parsed
            .readings
            .first()
            .map(|r| r.year)
            .unwrap_or_else(|| run_at.year());
        let crossed = references.crosser_for(year).cross(parsed.readings);
        if crossed.ambiguous > 0 {
            warnings.push(format!(
                "{} readings fell in overlapping lab windows",
                crossed.ambiguous
            ));
        }

        let (calibrated, calibration) = references.engine().calibrate(crossed.labeled);
        warnings.extend(calibration.unavailable.iter().map(|u| u.to_string()));

        let format = self.config.output_format;
        let compression = self.config.compression;
        let stem = file.stem().to_string();

        let processed = processed_table(&calibrated).encode(format, compression)?;
        let processed_name = output_file_name(&stem, "processed", run_at, format);
        self.storage
            .upload(
                &self.config.folder(plant, FolderKind::Processed),
                &processed_name,
                processed,
                format.mime_type(),
            )
            .await?;

        let validated_rows = validate(&calibrated, self.classifier.as_ref());
        let validated_file = if validated_rows.is_empty() {
            debug!("{}: no lab-matched rows, no validated output", file.name);
            None
        } else {
            let validated = validated_table(&validated_rows).encode(format, compression)?;
            let validated_name = output_file_name(&stem, "validated", run_at, format);
            self.storage
                .upload(
                    &self.config.folder(plant, FolderKind::Validated),
                    &validated_name,
                    validated,
                    format.mime_type(),
                )
                .await?;
            Some(validated_name)
        };

        for warning in &warnings {
            warn!("{}: {}", file.name, warning);
        }
        debug!(
            "{}: {} readings, {} matched lab, {} calibrated",
            file.name, records_processed, crossed.matched, calibration.readings_calibrated
        );

        Ok(FileOutcome {
            file: file.clone(),
            status: FileStatus::Processed,
            processed_at: Utc::now(),
            records_processed,
            records_matched_lab: crossed.matched,
            records_calibrated: calibration.readings_calibrated,
            output_file: Some(processed_name),
            validated_file,
            error: None,
            warnings,
        })
    }

    async fn advance_checkpoint(&self, checkpoint: &Checkpoint, report: &mut RunReport) {
        let Some(watermark) = new_watermark(checkpoint, &report.outcomes) else {
            warn!(
                "{}/{}: no file succeeded, checkpoint left at {:?}",
                report.plant, report.dryer, checkpoint.last_run_timestamp
            );
            return;
        };

        let next = checkpoint.advance(&report.outcomes, Some(watermark), Utc::now());
        match self.checkpoints.update(checkpoint, next).await {
            Ok(written) => report.new_watermark = written.last_run_timestamp,
            Err(e) => {
                error!(
                    "{}/{}: outputs written but checkpoint not advanced: {}",
                    report.plant, report.dryer, e
                );
                report.checkpoint_error = Some(e.to_string());
            }
        }
    }

    /// Merge every validated table of a plant into the historical dataset
    pub async fn run_consolidation(&self, plant: Plant) -> Result<ConsolidationRun> {
        let folder = self.config.folder(plant, FolderKind::Validated);
        let historical_name = self.config.historical_file_name();
        let mut warnings = Vec::new();

        let mut listing = self.storage.list_files(&folder).await?;
        listing.sort_by(|a, b| a.name.cmp(&b.name));

        let existing = match listing.iter().find(|f| f.name == historical_name) {
            Some(file) => {
                let bytes = self.storage.download(&file.file_id).await?;
                HistoricalDataset::from_table(decode_named(&file.name, bytes)?)
            }
            None => HistoricalDataset::empty(),
        };

        let mut batches = Vec::new();
        for file in &listing {
            if file.name.starts_with(HISTORICAL_FILE_STEM) || format_for_name(&file.name).is_none() {
                continue;
            }
            let table = match self.storage.download(&file.file_id).await {
                Ok(bytes) => decode_named(&file.name, bytes),
                Err(e) => Err(e),
            };
            match table {
                Ok(table) => batches.push((file.name.clone(), table)),
                Err(e) => warnings.push(format!("{}: {}", file.name, e)),
            }
        }
        for warning in &warnings {
            warn!("Skipping validated table {}", warning);
        }

        let files: Vec<String> = batches.iter().map(|(name, _)| name.clone()).collect();
        let (dataset, report) = consolidate(existing, &batches);

        let bytes = dataset
            .table()
            .encode(self.config.output_format, self.config.compression)?;
        self.storage
            .upload(
                &folder,
                &historical_name,
                bytes,
                self.config.output_format.mime_type(),
            )
            .await?;

        info!(
            "{}: historical dataset has {} rows ({} new from {} files)",
            plant,
            dataset.len(),
            report.appended,
            files.len()
        );

        Ok(ConsolidationRun {
            plant,
            folder,
            output_file: historical_name,
            files,
            rows: dataset.len(),
            report,
            warnings,
        })
    }
}
