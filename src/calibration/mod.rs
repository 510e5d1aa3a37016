//! Voltage-to-physical calibration.
//!
//! Readings are pivoted to one row per (timestamp, sensor) so the humidity
//! and temperature voltages of the same instant are calibrated together,
//! then expanded back so both channel rows carry the same results.
//!
//! - `TEMPERATURE = V·AT + BT + fixed[sensor] − time_corr[sensor, t]`
//! - `HUMIDITY = V²·AH + V·BH + CH + fixed[sensor] − time_corr[sensor, t]`
//!
//! Only lab-matched readings (which carry a variety) are calibrated. A
//! missing curve leaves the output unset and is reported, never fatal.

pub mod curves;
pub mod loader;

pub use curves::{
    resolve_year, variety_key, CalibrationCurve, Coefficients, CurveScope, CurveSet,
    CurveYearPolicy, TimeCorrectionTable,
};
pub use loader::parse_curve_document;

use crate::models::{CalibratedReading, LabeledReading, Plant, Variable};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// A curve that was needed but not found
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CalibrationUnavailable {
    pub plant: Plant,
    pub year: i32,
    pub scope: CurveScope,
}

impl std::fmt::Display for CalibrationUnavailable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "no {} calibration curve for {} {}",
            self.scope, self.plant, self.year
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct CalibrationReport {
    /// (timestamp, sensor) rows that had a variety
    pub rows_considered: usize,
    /// Readings with at least one calibrated value
    pub readings_calibrated: usize,
    pub unavailable: Vec<CalibrationUnavailable>,
}

#[derive(Debug, Default)]
struct PivotRow {
    members: Vec<usize>,
    volt_hum: Option<f64>,
    volt_tem: Option<f64>,
}

/// Applies a plant's curve set to labeled readings
#[derive(Debug, Clone, Default)]
pub struct CalibrationEngine {
    curves: CurveSet,
    policy: CurveYearPolicy,
}

impl CalibrationEngine {
    pub fn new(curves: CurveSet, policy: CurveYearPolicy) -> Self {
        Self { curves, policy }
    }

    /// An engine without curves; every reading passes through uncalibrated
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn curves(&self) -> &CurveSet {
        &self.curves
    }

    pub fn calibrate(
        &self,
        labeled: Vec<LabeledReading>,
    ) -> (Vec<CalibratedReading>, CalibrationReport) {
        let mut report = CalibrationReport::default();

        // Pivot: first voltage of each channel per (timestamp, sensor)
        let mut pivot: HashMap<(DateTime<Utc>, &str), PivotRow> = HashMap::new();
        for (idx, item) in labeled.iter().enumerate() {
            if item.variety().is_none() {
                continue;
            }
            let row = pivot
                .entry((item.reading.timestamp, item.reading.sensor_id.as_str()))
                .or_default();
            row.members.push(idx);
            let slot = match item.reading.variable {
                Variable::VoltHum => &mut row.volt_hum,
                Variable::VoltTem => &mut row.volt_tem,
            };
            if slot.is_none() {
                *slot = Some(item.reading.value);
            }
        }
        report.rows_considered = pivot.len();

        let mut missing: HashSet<CalibrationUnavailable> = HashSet::new();
        let mut results: Vec<(Option<f64>, Option<f64>)> = vec![(None, None); labeled.len()];

        for ((timestamp, sensor_id), row) in &pivot {
            let Some(&first) = row.members.first() else {
                continue;
            };
            let reading = &labeled[first].reading;
            let variety = labeled[first].variety().unwrap_or_default();

            let temperature = match self.curves.temperature_curve(reading.year, self.policy) {
                Some(curve) => row
                    .volt_tem
                    .and_then(|v| curve.evaluate(sensor_id, v, *timestamp)),
                None => {
                    missing.insert(CalibrationUnavailable {
                        plant: reading.plant,
                        year: reading.year,
                        scope: CurveScope::Temperature,
                    });
                    None
                }
            };

            let humidity = match self.curves.humidity_curve(variety, reading.year, self.policy) {
                Some(curve) => row
                    .volt_hum
                    .and_then(|v| curve.evaluate(sensor_id, v, *timestamp)),
                None => {
                    missing.insert(CalibrationUnavailable {
                        plant: reading.plant,
                        year: reading.year,
                        scope: CurveScope::Variety(variety.to_string()),
                    });
                    None
                }
            };

            for &idx in &row.members {
                results[idx] = (temperature, humidity);
            }
        }
        drop(pivot);

        let mut unavailable: Vec<CalibrationUnavailable> = missing.into_iter().collect();
        unavailable.sort_by(|a, b| {
            (a.plant, a.year, a.scope.to_string()).cmp(&(b.plant, b.year, b.scope.to_string()))
        });
        for item in &unavailable {
            warn!("Calibration unavailable: {}", item);
        }
        report.unavailable = unavailable;

        let calibrated: Vec<CalibratedReading> = labeled
            .into_iter()
            .zip(results)
            .map(|(labeled, (temperature, humidity))| CalibratedReading {
                labeled,
                temperature,
                humidity,
            })
            .collect();
        report.readings_calibrated = calibrated
            .iter()
            .filter(|c| c.temperature.is_some() || c.humidity.is_some())
            .count();

        (calibrated, report)
    }
}
