//! Configuration management and validation.
//!
//! Provides the run configuration: where each plant's folders live in
//! storage, how local logger timestamps are interpreted, the lab overlap and
//! curve-year policies, concurrency, and the format of output tables.
//! Configuration can come from defaults, a TOML file, and environment
//! variables (in that order of precedence, lowest first).

use crate::calibration::CurveYearPolicy;
use crate::constants::{
    CHECKPOINT_FOLDER, DEFAULT_SENSOR_EXTENSIONS, DEFAULT_SOURCE_UTC_OFFSET_HOURS,
    HISTORICAL_FILE_STEM,
};
use crate::error::{EtlError, Result};
use crate::lab::OverlapPolicy;
use crate::models::Plant;
use chrono::FixedOffset;
use polars::prelude::ParquetCompression;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable overriding the storage root
pub const STORAGE_ROOT_ENV: &str = "SECADO_STORAGE_ROOT";

/// Table encoding for processed, validated and historical outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Csv,
    Parquet,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Parquet => "parquet",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "text/csv",
            OutputFormat::Parquet => "application/vnd.apache.parquet",
        }
    }
}

/// Supported compression algorithms for parquet output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    Snappy,
    Zstd,
    Lz4,
    Uncompressed,
}

impl CompressionAlgorithm {
    /// Convert to polars ParquetCompression type
    pub fn to_polars_compression(&self) -> ParquetCompression {
        match self {
            CompressionAlgorithm::Snappy => ParquetCompression::Snappy,
            CompressionAlgorithm::Zstd => ParquetCompression::Zstd(None),
            CompressionAlgorithm::Lz4 => ParquetCompression::Lz4Raw,
            CompressionAlgorithm::Uncompressed => ParquetCompression::Uncompressed,
        }
    }
}

/// Per-plant folders in storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderKind {
    Raw,
    Lab,
    Curves,
    Processed,
    Validated,
}

impl FolderKind {
    pub const ALL: [FolderKind; 5] = [
        FolderKind::Raw,
        FolderKind::Lab,
        FolderKind::Curves,
        FolderKind::Processed,
        FolderKind::Validated,
    ];

    /// Environment variable overriding this folder for a plant,
    /// e.g. `LAB_FOLDER_JPV`
    pub fn env_var(&self, plant: Plant) -> String {
        let kind = match self {
            FolderKind::Raw => "RAW",
            FolderKind::Lab => "LAB",
            FolderKind::Curves => "CURVES",
            FolderKind::Processed => "PROCESSED",
            FolderKind::Validated => "VALIDATED",
        };
        format!("{}_FOLDER_{}", kind, plant.code())
    }
}

/// Folder templates; `{plant}` is replaced with the plant code and, for the
/// raw folder, `{dryer}` with the dryer name
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FolderLayout {
    pub raw: String,
    pub lab: String,
    pub curves: String,
    pub processed: String,
    pub validated: String,

    /// Explicit folders keyed by the override variable name
    /// (e.g. `PROCESSED_FOLDER_RB`)
    pub overrides: BTreeMap<String, String>,
}

impl Default for FolderLayout {
    fn default() -> Self {
        Self {
            raw: "{plant}/raw/{dryer}".to_string(),
            lab: "{plant}/lab".to_string(),
            curves: "{plant}/curves".to_string(),
            processed: "{plant}/processed".to_string(),
            validated: "{plant}/validated".to_string(),
            overrides: BTreeMap::new(),
        }
    }
}

impl FolderLayout {
    /// Resolve the folder of a given kind for a plant
    pub fn folder(&self, plant: Plant, kind: FolderKind) -> String {
        if let Some(folder) = self.overrides.get(&kind.env_var(plant)) {
            return folder.clone();
        }
        let template = match kind {
            FolderKind::Raw => &self.raw,
            FolderKind::Lab => &self.lab,
            FolderKind::Curves => &self.curves,
            FolderKind::Processed => &self.processed,
            FolderKind::Validated => &self.validated,
        };
        template.replace("{plant}", plant.code())
    }
}

/// Global configuration for ETL runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EtlConfig {
    /// Root directory used by the local storage backend
    pub storage_root: PathBuf,

    pub folders: FolderLayout,

    /// Folder holding per plant+dryer checkpoint documents
    pub checkpoint_folder: String,

    /// Whole-hour UTC offset of the loggers' local clocks
    pub source_utc_offset_hours: i32,

    /// Resolution of overlapping lab windows
    pub overlap_policy: OverlapPolicy,

    /// Fallback when no curve exists for a reading's year
    pub curve_year_policy: CurveYearPolicy,

    /// Maximum concurrent file processing
    pub max_concurrent_files: usize,

    pub output_format: OutputFormat,

    pub compression: CompressionAlgorithm,

    /// Extensions (without dot, lowercase) considered raw sensor files
    pub sensor_extensions: Vec<String>,

    /// Draw a progress bar while processing files
    pub show_progress: bool,
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            storage_root: default_storage_root(),
            folders: FolderLayout::default(),
            checkpoint_folder: CHECKPOINT_FOLDER.to_string(),
            source_utc_offset_hours: DEFAULT_SOURCE_UTC_OFFSET_HOURS,
            overlap_policy: OverlapPolicy::default(),
            curve_year_policy: CurveYearPolicy::default(),
            max_concurrent_files: num_cpus::get().clamp(1, 8),
            output_format: OutputFormat::Csv,
            compression: CompressionAlgorithm::Snappy,
            sensor_extensions: DEFAULT_SENSOR_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            show_progress: true,
        }
    }
}

/// `<data dir>/secado-processor`, or a relative folder when the platform
/// has no data directory
pub fn default_storage_root() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("secado-processor"))
        .unwrap_or_else(|| PathBuf::from("secado-data"))
}

impl EtlConfig {
    /// Load configuration from a TOML file; missing keys keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: EtlConfig = toml::from_str(&text)?;
        debug!("Loaded configuration from {}", path.display());
        config.validate()?;
        Ok(config)
    }

    /// Apply `SECADO_STORAGE_ROOT` and `{KIND}_FOLDER_{PLANT}` variables
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup(STORAGE_ROOT_ENV).filter(|v| !v.trim().is_empty()) {
            debug!("Storage root overridden to {}", root);
            self.storage_root = PathBuf::from(root);
        }

        for plant in Plant::ALL {
            for kind in FolderKind::ALL {
                let key = kind.env_var(plant);
                if let Some(folder) = lookup(&key).filter(|v| !v.trim().is_empty()) {
                    debug!("{} overridden to {}", key, folder);
                    self.folders.overrides.insert(key, folder);
                }
            }
        }
    }

    /// Reject settings that cannot produce a valid run
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_files == 0 {
            return Err(EtlError::Configuration {
                message: "max_concurrent_files must be at least 1".to_string(),
            });
        }
        self.source_offset()?;
        if self.sensor_extensions.is_empty() {
            return Err(EtlError::Configuration {
                message: "sensor_extensions must not be empty".to_string(),
            });
        }
        if self.checkpoint_folder.trim().is_empty() {
            return Err(EtlError::Configuration {
                message: "checkpoint_folder must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// The loggers' fixed UTC offset
    pub fn source_offset(&self) -> Result<FixedOffset> {
        if !(-12..=14).contains(&self.source_utc_offset_hours) {
            return Err(EtlError::Configuration {
                message: format!(
                    "source_utc_offset_hours out of range: {}",
                    self.source_utc_offset_hours
                ),
            });
        }
        FixedOffset::east_opt(self.source_utc_offset_hours * 3600).ok_or_else(|| {
            EtlError::Configuration {
                message: format!(
                    "invalid source_utc_offset_hours: {}",
                    self.source_utc_offset_hours
                ),
            }
        })
    }

    pub fn folder(&self, plant: Plant, kind: FolderKind) -> String {
        self.folders.folder(plant, kind)
    }

    /// Raw sensor folder of one dryer
    pub fn raw_folder(&self, plant: Plant, dryer: &str) -> String {
        let dryer = dryer.trim().replace(['/', '\\'], "_");
        self.folder(plant, FolderKind::Raw).replace("{dryer}", &dryer)
    }

    /// Name of the consolidated table in the plant's validated folder
    pub fn historical_file_name(&self) -> String {
        format!("{}.{}", HISTORICAL_FILE_STEM, self.output_format.extension())
    }

    /// Whether a file name has one of the configured sensor extensions
    pub fn is_sensor_file(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        self.sensor_extensions
            .iter()
            .any(|ext| lower.ends_with(&format!(".{}", ext.trim_start_matches('.').to_lowercase())))
    }

    /// Set the storage root
    pub fn with_storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.storage_root = root.into();
        self
    }

    /// Set maximum concurrent files
    pub fn with_max_concurrent_files(mut self, max_files: usize) -> Self {
        self.max_concurrent_files = max_files;
        self
    }

    pub fn with_overlap_policy(mut self, policy: OverlapPolicy) -> Self {
        self.overlap_policy = policy;
        self
    }

    pub fn with_curve_year_policy(mut self, policy: CurveYearPolicy) -> Self {
        self.curve_year_policy = policy;
        self
    }

    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    pub fn with_source_utc_offset_hours(mut self, hours: i32) -> Self {
        self.source_utc_offset_hours = hours;
        self
    }

    /// Disable the progress bar (tests, non-interactive runs)
    pub fn without_progress(mut self) -> Self {
        self.show_progress = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        let config = EtlConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.checkpoint_folder, "etl_timestamps");
        assert_eq!(config.historical_file_name(), "df_historico.csv");
        assert_eq!(config.source_offset().unwrap().local_minus_utc(), -3 * 3600);
    }

    #[test]
    fn test_folder_templates_and_overrides() {
        let mut config = EtlConfig::default();
        assert_eq!(config.folder(Plant::Jpv, FolderKind::Lab), "JPV/lab");
        assert_eq!(config.folder(Plant::Rb, FolderKind::Validated), "RB/validated");

        let vars: HashMap<&str, &str> = [
            ("LAB_FOLDER_JPV", "shared/lab-jpv"),
            ("SECADO_STORAGE_ROOT", "/data/secado"),
            ("PROCESSED_FOLDER_RB", ""),
        ]
        .into_iter()
        .collect();
        config.apply_overrides_from(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.folder(Plant::Jpv, FolderKind::Lab), "shared/lab-jpv");
        assert_eq!(config.folder(Plant::Rb, FolderKind::Lab), "RB/lab");
        // Empty values are ignored
        assert_eq!(config.folder(Plant::Rb, FolderKind::Processed), "RB/processed");
        assert_eq!(config.storage_root, PathBuf::from("/data/secado"));
    }

    #[test]
    fn test_raw_folder_per_dryer() {
        let config = EtlConfig::default();
        assert_eq!(config.raw_folder(Plant::Jpv, "2"), "JPV/raw/2");
        assert_eq!(config.raw_folder(Plant::Rb, "A/B"), "RB/raw/A_B");
    }

    #[test]
    fn test_load_partial_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
storage_root = "/tmp/secado"
max_concurrent_files = 2
output_format = "parquet"
overlap_policy = "earliest_start"

[folders]
raw = "raw/{{plant}}"
"#
        )
        .unwrap();

        let config = EtlConfig::load(file.path()).unwrap();
        assert_eq!(config.storage_root, PathBuf::from("/tmp/secado"));
        assert_eq!(config.max_concurrent_files, 2);
        assert_eq!(config.output_format, OutputFormat::Parquet);
        assert_eq!(config.overlap_policy, OverlapPolicy::EarliestStart);
        assert_eq!(config.folder(Plant::Rb, FolderKind::Raw), "raw/RB");
        assert_eq!(config.folder(Plant::Rb, FolderKind::Lab), "RB/lab");
        assert_eq!(config.historical_file_name(), "df_historico.parquet");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EtlConfig::default().with_max_concurrent_files(0);
        match config.validate().unwrap_err() {
            EtlError::Configuration { message } => assert!(message.contains("max_concurrent")),
            _ => panic!("Expected Configuration error"),
        }

        let config = EtlConfig::default().with_source_utc_offset_hours(20);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sensor_file_extensions() {
        let config = EtlConfig::default();
        assert!(config.is_sensor_file("JPV_SENSOR1.TXT"));
        assert!(config.is_sensor_file("rb_sensor2.csv"));
        assert!(!config.is_sensor_file("JPV_2024_Curvas.toml"));
    }
}
