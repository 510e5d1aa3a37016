//! Calibration curve documents
//!
//! One TOML document per plant and year:
//!
//! ```toml
//! plant = "JPV"
//! year = 2025
//!
//! [temperature]
//! a = 25.1
//! b = -12.4
//! fixed = { "1" = 0.4, "2" = -0.2 }
//! time_corrections = [{ sensor = "1", from = "2025-03-01 00:00", value = 0.3 }]
//!
//! [[humidity]]
//! variety = "Merin"
//! a = 0.52
//! b = 1.1
//! c = 2.0
//! ```
//!
//! `plant` and `year` may be omitted when the file name carries them.

use super::curves::{
    CalibrationCurve, Coefficients, CurveScope, TimeCorrectionTable,
};
use crate::error::{EtlError, Result};
use crate::models::Plant;
use crate::parser::fields::{parse_local_datetime, DateOrder};
use crate::parser::{normalize_sensor_id, year_from_name};
use chrono::FixedOffset;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

#[derive(Debug, Deserialize)]
struct CurveDocument {
    plant: Option<String>,
    year: Option<i32>,
    temperature: Option<TemperatureSection>,
    #[serde(default)]
    humidity: Vec<HumiditySection>,
}

#[derive(Debug, Deserialize)]
struct TemperatureSection {
    a: f64,
    b: f64,
    #[serde(default)]
    fixed: BTreeMap<String, f64>,
    #[serde(default)]
    time_corrections: Vec<TimeCorrectionEntry>,
}

#[derive(Debug, Deserialize)]
struct HumiditySection {
    variety: String,
    a: f64,
    b: f64,
    c: f64,
    #[serde(default)]
    fixed: BTreeMap<String, f64>,
    #[serde(default)]
    time_corrections: Vec<TimeCorrectionEntry>,
}

#[derive(Debug, Deserialize)]
struct TimeCorrectionEntry {
    sensor: String,
    from: String,
    value: f64,
}

fn sensor_key(raw: &str, file_name: &str) -> Result<String> {
    normalize_sensor_id(raw)
        .ok_or_else(|| EtlError::reference(file_name, format!("invalid sensor id '{}'", raw)))
}

fn fixed_map(raw: BTreeMap<String, f64>, file_name: &str) -> Result<HashMap<String, f64>> {
    raw.into_iter()
        .map(|(sensor, value)| Ok((sensor_key(&sensor, file_name)?, value)))
        .collect()
}

fn time_table(
    raw: Vec<TimeCorrectionEntry>,
    file_name: &str,
    offset: FixedOffset,
) -> Result<TimeCorrectionTable> {
    let entries = raw
        .into_iter()
        .map(|entry| {
            let from = parse_local_datetime(&entry.from, DateOrder::DayFirst, offset)
                .ok_or_else(|| {
                    EtlError::reference(
                        file_name,
                        format!("invalid correction date '{}'", entry.from),
                    )
                })?;
            Ok((sensor_key(&entry.sensor, file_name)?, from, entry.value))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(TimeCorrectionTable::from_entries(entries))
}

/// Parse one curve document into the curves it defines
pub fn parse_curve_document(
    bytes: &[u8],
    file_name: &str,
    offset: FixedOffset,
) -> Result<Vec<CalibrationCurve>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| EtlError::reference(file_name, format!("not UTF-8: {}", e)))?;
    let document: CurveDocument = toml::from_str(text)
        .map_err(|e| EtlError::reference(file_name, e.to_string()))?;

    let plant = match &document.plant {
        Some(code) => code.parse::<Plant>()?,
        None => Plant::from_file_name(file_name)
            .ok_or_else(|| EtlError::reference(file_name, "no plant in document or name"))?,
    };
    let year = document
        .year
        .or_else(|| year_from_name(file_name))
        .ok_or_else(|| EtlError::reference(file_name, "no year in document or name"))?;

    let mut curves = Vec::with_capacity(document.humidity.len() + 1);

    if let Some(section) = document.temperature {
        curves.push(CalibrationCurve {
            plant,
            year,
            scope: CurveScope::Temperature,
            coefficients: Coefficients::Linear {
                a: section.a,
                b: section.b,
            },
            fixed_corrections: fixed_map(section.fixed, file_name)?,
            time_corrections: time_table(section.time_corrections, file_name, offset)?,
        });
    }

    for section in document.humidity {
        if section.variety.trim().is_empty() {
            return Err(EtlError::reference(file_name, "humidity curve without variety"));
        }
        curves.push(CalibrationCurve {
            plant,
            year,
            scope: CurveScope::Variety(section.variety.trim().to_string()),
            coefficients: Coefficients::Quadratic {
                a: section.a,
                b: section.b,
                c: section.c,
            },
            fixed_corrections: fixed_map(section.fixed, file_name)?,
            time_corrections: time_table(section.time_corrections, file_name, offset)?,
        });
    }

    debug!(
        "{}: {} curves for {} {}",
        file_name,
        curves.len(),
        plant,
        year
    );
    Ok(curves)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn uy() -> FixedOffset {
        FixedOffset::west_opt(3 * 3600).unwrap()
    }

    const DOCUMENT: &str = r#"
[temperature]
a = 20.0
b = -5.0
fixed = { "SENSOR 10" = 0.5 }
time_corrections = [
    { sensor = "1", from = "2025-03-01 00:00", value = 0.3 },
    { sensor = "1", from = "01/02/2025", value = 0.1 },
]

[[humidity]]
variety = "Merín"
a = 0.5
b = 1.0
c = 2.0

[[humidity]]
variety = "INOV"
a = 0.4
b = 1.2
c = 1.0
fixed = { "2" = -1.0 }
"#;

    #[test]
    fn test_parse_document_with_name_metadata() {
        let curves =
            parse_curve_document(DOCUMENT.as_bytes(), "2025 Curvas JPV.toml", uy()).unwrap();
        assert_eq!(curves.len(), 3);

        let temperature = &curves[0];
        assert_eq!(temperature.plant, Plant::Jpv);
        assert_eq!(temperature.year, 2025);
        assert_eq!(temperature.scope, CurveScope::Temperature);
        assert_eq!(temperature.fixed_corrections.get("1"), Some(&0.5));

        // 1 Feb is day-first; 15 Feb falls after it, before 1 March
        let t = Utc.with_ymd_and_hms(2025, 2, 15, 0, 0, 0).unwrap();
        assert_eq!(temperature.time_corrections.lookup("1", t), 0.1);

        assert_eq!(curves[1].scope, CurveScope::Variety("Merín".to_string()));
        assert_eq!(curves[2].fixed_corrections.get("2"), Some(&-1.0));
    }

    #[test]
    fn test_explicit_plant_must_be_known() {
        let doc = "plant = \"XX\"\nyear = 2024\n";
        assert!(matches!(
            parse_curve_document(doc.as_bytes(), "curvas.toml", uy()),
            Err(EtlError::UnsupportedPlant { .. })
        ));
    }

    #[test]
    fn test_missing_year_is_reference_error() {
        let doc = "plant = \"RB\"\n";
        match parse_curve_document(doc.as_bytes(), "Curvas RB.toml", uy()).unwrap_err() {
            EtlError::ReferenceData { reason, .. } => assert!(reason.contains("year")),
            _ => panic!("Expected ReferenceData error"),
        }
    }

    #[test]
    fn test_malformed_toml_is_reference_error() {
        let result = parse_curve_document(b"[temperature]\na = \"x\"\n", "2025 Curvas RB.toml", uy());
        assert!(matches!(result, Err(EtlError::ReferenceData { .. })));
    }
}
