//! Reference data discovery and loading.
//!
//! Lab control files live in the plant's lab folder and carry the plant code
//! and year in their name (`JPV_2024_Control_Tachadas.csv`). Calibration
//! curve documents live in the curves folder and are named
//! `{YEAR}_Curvas_{PLANT}.toml`.
//!
//! Reference data never stops a run. A file that cannot be read or parsed
//! is skipped with a warning, and readings it would have matched pass
//! through unlabeled or uncalibrated.

use crate::calibration::{parse_curve_document, CalibrationEngine, CurveSet, CurveYearPolicy};
use crate::config::{EtlConfig, FolderKind};
use crate::constants::{CURVE_FILE_EXTENSION, CURVE_FILE_MARKER, LAB_FILE_EXTENSIONS};
use crate::error::Result;
use crate::lab::{parse_lab_file, LabCrosser, OverlapPolicy};
use crate::models::{FileRef, LabRecord, Plant};
use crate::parser::year_from_name;
use crate::storage::Storage;
use chrono::FixedOffset;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

fn curve_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(&format!(r"(?i)(20[0-9]{{2}}).*?{}", CURVE_FILE_MARKER)).ok())
        .as_ref()
}

/// Whether `name` is a lab control file for `plant`
pub fn is_lab_file(name: &str, plant: Plant) -> bool {
    let extension_ok = name
        .rsplit_once('.')
        .is_some_and(|(_, ext)| LAB_FILE_EXTENSIONS.contains(&ext.to_lowercase().as_str()));
    extension_ok && Plant::from_file_name(name) == Some(plant)
}

/// Whether `name` is a curve document for `plant`, as `{YEAR}…Curvas…{PLANT}.toml`
pub fn is_curve_file(name: &str, plant: Plant) -> bool {
    let Some((stem, ext)) = name.rsplit_once('.') else {
        return false;
    };
    if !ext.eq_ignore_ascii_case(CURVE_FILE_EXTENSION) {
        return false;
    }
    let Some(m) = curve_pattern().and_then(|p| p.find(stem)) else {
        return false;
    };
    Plant::from_file_name(&stem[m.end()..]) == Some(plant)
}

/// Lab indexes per year plus the calibration engine for one plant
#[derive(Debug, Default)]
pub struct References {
    by_year: BTreeMap<i32, LabCrosser>,
    undated: Option<LabCrosser>,
    empty: LabCrosser,
    engine: CalibrationEngine,
    pub lab_files: Vec<String>,
    pub curve_files: Vec<String>,
    pub warnings: Vec<String>,
}

impl References {
    /// No lab records and no curves
    pub fn none() -> Self {
        Self::default()
    }

    /// Lab index for a reading year: the file of that year, else the most
    /// recent one, else a file without a year in its name
    pub fn crosser_for(&self, year: i32) -> &LabCrosser {
        if let Some(crosser) = self.by_year.get(&year) {
            return crosser;
        }
        self.by_year
            .values()
            .next_back()
            .or(self.undated.as_ref())
            .unwrap_or(&self.empty)
    }

    pub fn engine(&self) -> &CalibrationEngine {
        &self.engine
    }

    pub fn lab_record_count(&self) -> usize {
        self.by_year
            .values()
            .chain(self.undated.iter())
            .map(LabCrosser::record_count)
            .sum()
    }
}

/// Loads a plant's reference data from storage
pub struct ReferenceLoader<'a> {
    storage: &'a dyn Storage,
    config: &'a EtlConfig,
    offset: FixedOffset,
}

impl<'a> ReferenceLoader<'a> {
    pub fn new(storage: &'a dyn Storage, config: &'a EtlConfig) -> Result<Self> {
        Ok(Self {
            storage,
            config,
            offset: config.source_offset()?,
        })
    }

    pub async fn load(&self, plant: Plant) -> References {
        let mut warnings = Vec::new();

        let (by_year, undated, lab_files) = self.load_lab(plant, &mut warnings).await;
        let (curves, curve_files) = self.load_curves(plant, &mut warnings).await;

        for warning in &warnings {
            warn!("{}", warning);
        }
        info!(
            "{} references: {} lab files, {} curve files ({} curves)",
            plant,
            lab_files.len(),
            curve_files.len(),
            curves.len()
        );

        let policy: OverlapPolicy = self.config.overlap_policy;
        let to_crosser = |records: Vec<LabRecord>| LabCrosser::new(records, policy);
        References {
            by_year: by_year.into_iter().map(|(y, r)| (y, to_crosser(r))).collect(),
            undated: undated.map(to_crosser),
            empty: LabCrosser::empty(),
            engine: CalibrationEngine::new(curves, self.curve_policy()),
            lab_files,
            curve_files,
            warnings,
        }
    }

    fn curve_policy(&self) -> CurveYearPolicy {
        self.config.curve_year_policy
    }

    async fn list(&self, plant: Plant, kind: FolderKind, warnings: &mut Vec<String>) -> Vec<FileRef> {
        let folder = self.config.folder(plant, kind);
        match self.storage.list_files(&folder).await {
            Ok(mut files) => {
                files.sort_by(|a, b| a.name.cmp(&b.name));
                files
            }
            Err(e) => {
                warnings.push(format!("cannot list {}: {}", folder, e));
                Vec::new()
            }
        }
    }

    async fn load_lab(
        &self,
        plant: Plant,
        warnings: &mut Vec<String>,
    ) -> (BTreeMap<i32, Vec<LabRecord>>, Option<Vec<LabRecord>>, Vec<String>) {
        let mut by_year: BTreeMap<i32, Vec<LabRecord>> = BTreeMap::new();
        let mut undated: Option<Vec<LabRecord>> = None;
        let mut loaded = Vec::new();

        for file in self.list(plant, FolderKind::Lab, warnings).await {
            if !is_lab_file(&file.name, plant) {
                continue;
            }
            let bytes = match self.storage.download(&file.file_id).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warnings.push(format!("cannot read lab file {}: {}", file.name, e));
                    continue;
                }
            };
            match parse_lab_file(&bytes, &file.name, self.offset) {
                Ok((records, report)) => {
                    debug!("{}: {:?}", file.name, report);
                    if report.dropped_incomplete + report.dropped_inverted > 0 {
                        warnings.push(format!(
                            "{}: dropped {} incomplete and {} inverted lab rows",
                            file.name, report.dropped_incomplete, report.dropped_inverted
                        ));
                    }
                    match year_from_name(&file.name) {
                        Some(year) => by_year.entry(year).or_default().extend(records),
                        None => undated.get_or_insert_with(Vec::new).extend(records),
                    }
                    loaded.push(file.name);
                }
                Err(e) => warnings.push(e.to_string()),
            }
        }
        (by_year, undated, loaded)
    }

    async fn load_curves(&self, plant: Plant, warnings: &mut Vec<String>) -> (CurveSet, Vec<String>) {
        let mut curves = CurveSet::new();
        let mut loaded = Vec::new();

        for file in self.list(plant, FolderKind::Curves, warnings).await {
            if !is_curve_file(&file.name, plant) {
                continue;
            }
            let bytes = match self.storage.download(&file.file_id).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warnings.push(format!("cannot read curve file {}: {}", file.name, e));
                    continue;
                }
            };
            let document = match parse_curve_document(&bytes, &file.name, self.offset) {
                Ok(document) => document,
                Err(e) => {
                    warnings.push(e.to_string());
                    continue;
                }
            };
            for curve in document {
                if curve.plant != plant {
                    warnings.push(format!(
                        "{}: curve for {} ignored while loading {}",
                        file.name, curve.plant, plant
                    ));
                    continue;
                }
                if let Err(e) = curves.insert(curve, &file.name) {
                    warnings.push(e.to_string());
                }
            }
            loaded.push(file.name);
        }
        (curves, loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use chrono::{TimeZone, Utc};

    const LAB_CSV: &str = "Control de tachadas\n\
        Variedad;Identificador;Inicio;Fin;Sensor;Humedad inicio;Humedad final\n\
        Merin;12.0;01/03/2024 10:00;01/03/2024 14:00;1;22,5;13,1\n";

    const CURVES_TOML: &str = r#"
plant = "JPV"
year = 2024

[temperature]
a = 10.0
b = 1.0

[[humidity]]
variety = "Merin"
a = 0.5
b = 1.0
c = 2.0
"#;

    #[test]
    fn test_file_name_patterns() {
        assert!(is_lab_file("JPV_2024_Control_Tachadas.csv", Plant::Jpv));
        assert!(!is_lab_file("RB_2024_Control_Tachadas.csv", Plant::Jpv));
        assert!(!is_lab_file("JPV_2024_Control.pdf", Plant::Jpv));

        assert!(is_curve_file("2024_Curvas_JPV.toml", Plant::Jpv));
        assert!(is_curve_file("2023 curvas calibracion RB.TOML", Plant::Rb));
        assert!(!is_curve_file("2024_Curvas_JPV.toml", Plant::Rb));
        assert!(!is_curve_file("Curvas_JPV.toml", Plant::Jpv));
        assert!(!is_curve_file("2024_Curvas_JPV.csv", Plant::Jpv));
    }

    #[tokio::test]
    async fn test_load_references() {
        let storage = MemoryStorage::new();
        let t = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        storage
            .insert_with_time("JPV/lab", "JPV_2024_Control_Tachadas.csv", LAB_CSV, t)
            .unwrap();
        storage
            .insert_with_time("JPV/curves", "2024_Curvas_JPV.toml", CURVES_TOML, t)
            .unwrap();
        storage
            .insert_with_time("JPV/curves", "2023_Curvas_JPV.toml", "not = [valid", t)
            .unwrap();

        let config = EtlConfig::default();
        let loader = ReferenceLoader::new(&storage, &config).unwrap();
        let references = loader.load(Plant::Jpv).await;

        assert_eq!(references.lab_record_count(), 1);
        assert_eq!(references.crosser_for(2024).record_count(), 1);
        // No 2025 file: most recent year is used
        assert_eq!(references.crosser_for(2025).record_count(), 1);
        assert_eq!(references.engine().curves().len(), 2);
        assert_eq!(references.curve_files, vec!["2024_Curvas_JPV.toml"]);
        assert_eq!(references.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_folders_degrade() {
        let storage = MemoryStorage::new();
        storage.inject_failure("JPV").unwrap();
        let config = EtlConfig::default();
        let loader = ReferenceLoader::new(&storage, &config).unwrap();
        let references = loader.load(Plant::Jpv).await;

        assert_eq!(references.lab_record_count(), 0);
        assert!(references.engine().curves().is_empty());
        assert_eq!(references.warnings.len(), 2);
    }
}
