//! Core data structures for the drying-sensor ETL.
//!
//! Defines plant and variable tags, the canonical reading record and the
//! wrappers that the lab crosser and calibration engine add on top of it,
//! storage file references, and per-run reporting structures.

use crate::constants::{VOLT_HUM, VOLT_TEM};
use crate::error::{EtlError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Drying plants, each with its own logger export format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Plant {
    #[serde(rename = "JPV")]
    Jpv,
    #[serde(rename = "RB")]
    Rb,
}

impl Plant {
    pub const ALL: [Plant; 2] = [Plant::Jpv, Plant::Rb];

    /// Plant code as used in file names and folder variables
    pub fn code(&self) -> &'static str {
        match self {
            Plant::Jpv => "JPV",
            Plant::Rb => "RB",
        }
    }

    /// Detect the plant code as a standalone token in a file name
    pub fn from_file_name(name: &str) -> Option<Self> {
        let upper = name.to_uppercase();
        let mut tokens = upper.split(|c: char| !c.is_ascii_alphanumeric());
        tokens.find_map(|token| match token {
            "JPV" => Some(Plant::Jpv),
            "RB" => Some(Plant::Rb),
            _ => None,
        })
    }
}

impl fmt::Display for Plant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Plant {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "JPV" => Ok(Plant::Jpv),
            "RB" => Ok(Plant::Rb),
            _ => Err(EtlError::UnsupportedPlant {
                code: s.to_string(),
            }),
        }
    }
}

/// Canonical voltage channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Variable {
    #[serde(rename = "VOLT_HUM")]
    VoltHum,
    #[serde(rename = "VOLT_TEM")]
    VoltTem,
}

impl Variable {
    pub fn as_str(&self) -> &'static str {
        match self {
            Variable::VoltHum => VOLT_HUM,
            Variable::VoltTem => VOLT_TEM,
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One normalized sensor sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    pub variable: Variable,
    pub value: f64,
    pub plant: Plant,
    /// Calendar year of the sample in plant-local time; selects the curve
    pub year: i32,
    pub sensor_id: String,
    pub source_file: String,
    /// Raw date field for formats that split date and time
    pub raw_date: Option<String>,
    pub raw_time: Option<String>,
}

/// One laboratory control entry for a drying batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabRecord {
    pub tachada_id: String,
    pub variety: String,
    pub sensor_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub humidity_initial: Option<f64>,
    pub humidity_final: Option<f64>,
    pub in_doubt: bool,
}

impl LabRecord {
    /// Inclusive window check
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t <= self.end
    }
}

/// Lab fields attached to a reading that fell inside a batch window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabMatch {
    pub tachada_id: String,
    pub variety: String,
    pub humidity_initial: Option<f64>,
    pub humidity_final: Option<f64>,
    pub in_doubt: bool,
}

impl From<&LabRecord> for LabMatch {
    fn from(record: &LabRecord) -> Self {
        Self {
            tachada_id: record.tachada_id.clone(),
            variety: record.variety.clone(),
            humidity_initial: record.humidity_initial,
            humidity_final: record.humidity_final,
            in_doubt: record.in_doubt,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabeledReading {
    pub reading: Reading,
    pub lab: Option<LabMatch>,
}

impl LabeledReading {
    pub fn variety(&self) -> Option<&str> {
        self.lab.as_ref().map(|l| l.variety.as_str())
    }
}

/// A labeled reading with the physical values computed for its
/// (timestamp, sensor) pair. Both channels of the pair carry the same values.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibratedReading {
    pub labeled: LabeledReading,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
}

/// A file as listed by a storage backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub file_id: String,
    pub name: String,
    pub modified_time: DateTime<Utc>,
    pub size: u64,
}

impl FileRef {
    /// File name without its last extension
    pub fn stem(&self) -> &str {
        match self.name.rfind('.') {
            Some(idx) if idx > 0 => &self.name[..idx],
            _ => &self.name,
        }
    }

    pub fn extension(&self) -> Option<String> {
        let idx = self.name.rfind('.')?;
        Some(self.name[idx + 1..].to_lowercase())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Processed,
    Failed,
}

/// Result of processing one raw sensor file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOutcome {
    pub file: FileRef,
    pub status: FileStatus,
    pub processed_at: DateTime<Utc>,
    pub records_processed: usize,
    pub records_matched_lab: usize,
    pub records_calibrated: usize,
    pub output_file: Option<String>,
    pub validated_file: Option<String>,
    pub error: Option<String>,
    pub warnings: Vec<String>,
}

impl FileOutcome {
    pub fn failed(file: FileRef, error: impl Into<String>) -> Self {
        Self {
            file,
            status: FileStatus::Failed,
            processed_at: Utc::now(),
            records_processed: 0,
            records_matched_lab: 0,
            records_calibrated: 0,
            output_file: None,
            validated_file: None,
            error: Some(error.into()),
            warnings: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == FileStatus::Processed
    }
}

/// Everything that happened in one plant+dryer run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub plant: Plant,
    pub dryer: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub files_listed: usize,
    pub files_selected: usize,
    pub outcomes: Vec<FileOutcome>,
    pub previous_watermark: Option<DateTime<Utc>>,
    pub new_watermark: Option<DateTime<Utc>>,
    /// Set when outputs were written but the checkpoint could not be advanced
    pub checkpoint_error: Option<String>,
    pub reference_warnings: Vec<String>,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn total_records(&self) -> usize {
        self.outcomes.iter().map(|o| o.records_processed).sum()
    }
}

/// Output of the external classification model for one row
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub prediction: Option<String>,
    pub probability: Option<f64>,
}

/// One calibrated, lab-matched, classified row in wide form
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedBatchRecord {
    pub plant: Plant,
    pub year: i32,
    pub sensor_id: String,
    pub timestamp: DateTime<Utc>,
    pub volt_hum: Option<f64>,
    pub volt_tem: Option<f64>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub lab: LabMatch,
    pub source_file: String,
    pub classification: Classification,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plant_from_file_name() {
        assert_eq!(
            Plant::from_file_name("JPV_2024_SENSOR30.txt"),
            Some(Plant::Jpv)
        );
        assert_eq!(Plant::from_file_name("rb-sensor2-2025.csv"), Some(Plant::Rb));
        assert_eq!(Plant::from_file_name("HERB_2024.csv"), None);
        assert_eq!(Plant::from_file_name("readings.csv"), None);
    }

    #[test]
    fn test_plant_from_str() {
        assert_eq!("jpv".parse::<Plant>().unwrap(), Plant::Jpv);
        assert_eq!(" RB ".parse::<Plant>().unwrap(), Plant::Rb);
        match "XYZ".parse::<Plant>().unwrap_err() {
            EtlError::UnsupportedPlant { code } => assert_eq!(code, "XYZ"),
            _ => panic!("Expected UnsupportedPlant error"),
        }
    }

    #[test]
    fn test_file_ref_stem_and_extension() {
        let file = FileRef {
            file_id: "1".to_string(),
            name: "JPV_SENSOR1.2024.txt".to_string(),
            modified_time: Utc::now(),
            size: 0,
        };
        assert_eq!(file.stem(), "JPV_SENSOR1.2024");
        assert_eq!(file.extension().as_deref(), Some("txt"));
    }

    #[test]
    fn test_lab_record_window_is_inclusive() {
        let start = "2024-03-01T10:00:00Z".parse().unwrap();
        let end = "2024-03-01T12:00:00Z".parse().unwrap();
        let record = LabRecord {
            tachada_id: "7".to_string(),
            variety: "Merin".to_string(),
            sensor_id: "1".to_string(),
            start,
            end,
            humidity_initial: None,
            humidity_final: None,
            in_doubt: false,
        };
        assert!(record.contains(start));
        assert!(record.contains(end));
        assert!(!record.contains(end + chrono::Duration::seconds(1)));
    }
}
