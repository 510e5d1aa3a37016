//! Command-line interface.
//!
//! `process` runs one dryer (or every dryer with a checkpoint) of a plant,
//! `consolidate` rebuilds the plant's historical table from its validated
//! folder, and `checkpoint` prints a dryer's current checkpoint.

use crate::config::{EtlConfig, OutputFormat};
use crate::models::Plant;
use crate::pipeline::{report, Pipeline};
use crate::storage::LocalStorage;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "secado", version)]
#[command(about = "Normalize, calibrate and consolidate grain-dryer sensor data")]
pub struct Args {
    /// TOML configuration file
    #[arg(short, long, global = true, env = "SECADO_CONFIG")]
    pub config: Option<PathBuf>,

    /// Storage root directory (overrides the configuration)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Process new raw sensor files of a dryer
    Process {
        /// Plant code (JPV or RB)
        #[arg(short, long)]
        plant: Plant,

        /// Dryer name
        #[arg(short, long, required_unless_present = "all_dryers")]
        dryer: Option<String>,

        /// Every dryer that already has a checkpoint
        #[arg(long, conflicts_with = "dryer")]
        all_dryers: bool,

        /// Output table format
        #[arg(long, value_parser = parse_format)]
        format: Option<OutputFormat>,

        /// Rebuild the historical table afterwards
        #[arg(long)]
        consolidate: bool,

        /// Maximum files processed at once
        #[arg(short = 'j', long)]
        jobs: Option<usize>,
    },

    /// Merge the plant's validated tables into the historical table
    Consolidate {
        #[arg(short, long)]
        plant: Plant,
    },

    /// Show a dryer's checkpoint
    Checkpoint {
        #[arg(short, long)]
        plant: Plant,

        #[arg(short, long)]
        dryer: String,
    },
}

fn parse_format(value: &str) -> std::result::Result<OutputFormat, String> {
    match value.to_lowercase().as_str() {
        "csv" => Ok(OutputFormat::Csv),
        "parquet" => Ok(OutputFormat::Parquet),
        other => Err(format!("unknown format '{}', expected csv or parquet", other)),
    }
}

impl Args {
    pub fn log_level(&self) -> &'static str {
        if self.verbose { "debug" } else { "info" }
    }

    /// Defaults, then the config file, then environment, then flags
    pub fn load_config(&self) -> Result<EtlConfig> {
        let mut config = match &self.config {
            Some(path) => EtlConfig::load(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
            None => EtlConfig::default(),
        };
        config.apply_env_overrides();
        if let Some(root) = &self.root {
            config = config.with_storage_root(root.clone());
        }
        if let Command::Process { format, jobs, .. } = &self.command {
            if let Some(format) = format {
                config = config.with_output_format(*format);
            }
            if let Some(jobs) = jobs {
                config = config.with_max_concurrent_files(*jobs);
            }
        }
        config.validate()?;
        debug!("Effective configuration: {:?}", config);
        Ok(config)
    }
}

/// Run the selected command. Returns the process exit code.
pub async fn run(args: Args) -> Result<i32> {
    let config = args.load_config()?;
    let storage = Arc::new(LocalStorage::new(config.storage_root.clone()));
    let pipeline = Pipeline::new(storage, config)?;

    match args.command {
        Command::Process {
            plant,
            dryer,
            all_dryers,
            consolidate,
            ..
        } => {
            let reports = match (dryer, all_dryers) {
                (_, true) => pipeline.run_all_dryers(plant).await?,
                (Some(dryer), false) => vec![pipeline.run_partition(plant, &dryer).await?],
                (None, false) => bail!("either --dryer or --all-dryers is required"),
            };
            for run in &reports {
                report::print_run_summary(run);
            }
            if consolidate {
                let run = pipeline.run_consolidation(plant).await?;
                report::print_consolidation_summary(&run);
            }
            let degraded = reports
                .iter()
                .any(|r| r.failed() > 0 || r.checkpoint_error.is_some());
            Ok(if degraded { 2 } else { 0 })
        }
        Command::Consolidate { plant } => {
            let run = pipeline.run_consolidation(plant).await?;
            report::print_consolidation_summary(&run);
            Ok(0)
        }
        Command::Checkpoint { plant, dryer } => {
            let checkpoint = pipeline.checkpoints().load(plant, &dryer).await?;
            report::print_checkpoint(&checkpoint);
            Ok(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_process_args() {
        let args = Args::try_parse_from([
            "secado", "process", "--plant", "jpv", "--dryer", "3", "--format", "parquet",
        ])
        .unwrap();
        match &args.command {
            Command::Process {
                plant,
                dryer,
                format,
                ..
            } => {
                assert_eq!(*plant, Plant::Jpv);
                assert_eq!(dryer.as_deref(), Some("3"));
                assert_eq!(*format, Some(OutputFormat::Parquet));
            }
            _ => panic!("Expected process command"),
        }
    }

    #[test]
    fn test_dryer_required_without_all_dryers() {
        assert!(Args::try_parse_from(["secado", "process", "--plant", "RB"]).is_err());
        assert!(Args::try_parse_from(["secado", "process", "--plant", "RB", "--all-dryers"]).is_ok());
        assert!(Args::try_parse_from(["secado", "process", "--plant", "XX", "--dryer", "1"]).is_err());
    }

    #[test]
    fn test_root_flag_overrides_config() {
        let args = Args::try_parse_from([
            "secado", "--root", "/srv/secado", "checkpoint", "--plant", "RB", "--dryer", "1",
        ])
        .unwrap();
        let config = args.load_config().unwrap();
        assert_eq!(config.storage_root, PathBuf::from("/srv/secado"));
    }
}
