//! Validation: wide-form batch rows and the classification model seam.
//!
//! Lab-matched calibrated readings are pivoted to one row per
//! (timestamp, sensor) with both voltage channels side by side, then handed
//! to a [`Classifier`] in a single batch. The model itself lives outside
//! this crate; [`NullClassifier`] leaves its outputs unset.

use crate::models::{CalibratedReading, Classification, ValidatedBatchRecord, Variable};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::warn;

/// A pre-trained model scoring validated rows
pub trait Classifier: Send + Sync {
    /// One classification per input row, in input order
    fn predict(&self, rows: &[ValidatedBatchRecord]) -> Vec<Classification>;

    fn name(&self) -> &str {
        "classifier"
    }
}

/// No model configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NullClassifier;

impl Classifier for NullClassifier {
    fn predict(&self, rows: &[ValidatedBatchRecord]) -> Vec<Classification> {
        vec![Classification::default(); rows.len()]
    }

    fn name(&self) -> &str {
        "none"
    }
}

/// Wide rows for readings that matched a lab batch, in first-seen order.
/// Unmatched readings have no batch and produce no row.
pub fn pivot_validated(readings: &[CalibratedReading]) -> Vec<ValidatedBatchRecord> {
    let mut rows: Vec<ValidatedBatchRecord> = Vec::new();
    let mut index: HashMap<(DateTime<Utc>, &str), usize> = HashMap::new();

    for calibrated in readings {
        let reading = &calibrated.labeled.reading;
        let Some(lab) = calibrated.labeled.lab.as_ref() else {
            continue;
        };
        let key = (reading.timestamp, reading.sensor_id.as_str());
        let idx = *index.entry(key).or_insert_with(|| {
            rows.push(ValidatedBatchRecord {
                plant: reading.plant,
                year: reading.year,
                sensor_id: reading.sensor_id.clone(),
                timestamp: reading.timestamp,
                volt_hum: None,
                volt_tem: None,
                temperature: calibrated.temperature,
                humidity: calibrated.humidity,
                lab: lab.clone(),
                source_file: reading.source_file.clone(),
                classification: Classification::default(),
            });
            rows.len() - 1
        });

        let row = &mut rows[idx];
        let slot = match reading.variable {
            Variable::VoltHum => &mut row.volt_hum,
            Variable::VoltTem => &mut row.volt_tem,
        };
        if slot.is_none() {
            *slot = Some(reading.value);
        }
    }
    rows
}

/// Pivot and classify. A model that returns the wrong number of rows is
/// ignored and the outputs stay unset.
pub fn validate(
    readings: &[CalibratedReading],
    classifier: &dyn Classifier,
) -> Vec<ValidatedBatchRecord> {
    let mut rows = pivot_validated(readings);
    if rows.is_empty() {
        return rows;
    }

    let predictions = classifier.predict(&rows);
    if predictions.len() != rows.len() {
        warn!(
            "Classifier {} returned {} results for {} rows, leaving outputs unset",
            classifier.name(),
            predictions.len(),
            rows.len()
        );
        return rows;
    }
    for (row, classification) in rows.iter_mut().zip(predictions) {
        row.classification = classification;
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LabMatch, LabeledReading, Plant, Reading};
    use chrono::TimeZone;

    fn calibrated(minute: u32, variable: Variable, value: f64, lab: bool) -> CalibratedReading {
        CalibratedReading {
            labeled: LabeledReading {
                reading: Reading {
                    timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 13, minute, 0).unwrap(),
                    variable,
                    value,
                    plant: Plant::Jpv,
                    year: 2024,
                    sensor_id: "1".to_string(),
                    source_file: "JPV_SENSOR1.txt".to_string(),
                    raw_date: None,
                    raw_time: None,
                },
                lab: lab.then(|| LabMatch {
                    tachada_id: "12".to_string(),
                    variety: "Merin".to_string(),
                    humidity_initial: Some(22.0),
                    humidity_final: Some(13.0),
                    in_doubt: false,
                }),
            },
            temperature: lab.then_some(35.0),
            humidity: lab.then_some(17.5),
        }
    }

    struct FixedClassifier(usize);

    impl Classifier for FixedClassifier {
        fn predict(&self, _rows: &[ValidatedBatchRecord]) -> Vec<Classification> {
            vec![
                Classification {
                    prediction: Some("ok".to_string()),
                    probability: Some(0.9),
                };
                self.0
            ]
        }
    }

    #[test]
    fn test_pivot_pairs_channels() {
        let readings = vec![
            calibrated(0, Variable::VoltHum, 1.2, true),
            calibrated(0, Variable::VoltTem, 2.4, true),
            calibrated(1, Variable::VoltHum, 1.3, true),
            calibrated(2, Variable::VoltHum, 1.4, false),
        ];
        let rows = pivot_validated(&readings);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].volt_hum, Some(1.2));
        assert_eq!(rows[0].volt_tem, Some(2.4));
        assert_eq!(rows[0].humidity, Some(17.5));
        assert_eq!(rows[1].volt_tem, None);
    }

    #[test]
    fn test_null_classifier_leaves_outputs_unset() {
        let readings = vec![calibrated(0, Variable::VoltHum, 1.2, true)];
        let rows = validate(&readings, &NullClassifier);
        assert_eq!(rows[0].classification, Classification::default());
    }

    #[test]
    fn test_classifier_outputs_attached() {
        let readings = vec![
            calibrated(0, Variable::VoltHum, 1.2, true),
            calibrated(1, Variable::VoltHum, 1.3, true),
        ];
        let rows = validate(&readings, &FixedClassifier(2));
        assert_eq!(rows[1].classification.prediction.as_deref(), Some("ok"));

        let rows = validate(&readings, &FixedClassifier(1));
        assert!(rows.iter().all(|r| r.classification.prediction.is_none()));
    }
}
