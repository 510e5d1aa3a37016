//! Calibration curves and their lookup structures

use crate::constants::{TEMPERATURE_SCOPE, VARIETY_ALIASES};
use crate::error::{EtlError, Result};
use crate::models::Plant;
use crate::parser::fields::compact_key;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Range;

/// Fallback when no curve exists for the exact year of a reading
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurveYearPolicy {
    /// Most recent earlier year, else the most recent year available
    #[default]
    PreviousOrLatest,
    /// Only a curve for the reading's own year
    Exact,
}

/// Canonical variety key: accent, case and space insensitive, with known
/// aliases collapsed onto one name
pub fn variety_key(name: &str) -> String {
    let key = compact_key(name);
    VARIETY_ALIASES
        .iter()
        .find(|group| group.contains(&key.as_str()))
        .map(|group| group[0].to_string())
        .unwrap_or(key)
}

/// What a curve converts
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CurveScope {
    Temperature,
    Variety(String),
}

impl fmt::Display for CurveScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CurveScope::Temperature => f.write_str(TEMPERATURE_SCOPE),
            CurveScope::Variety(v) => f.write_str(v),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Coefficients {
    /// `V·a + b`
    Linear { a: f64, b: f64 },
    /// `V²·a + V·b + c`
    Quadratic { a: f64, b: f64, c: f64 },
}

impl Coefficients {
    pub fn apply(&self, v: f64) -> f64 {
        match *self {
            Coefficients::Linear { a, b } => v * a + b,
            Coefficients::Quadratic { a, b, c } => v * v * a + v * b + c,
        }
    }
}

/// Time-varying corrections for all sensors of a curve.
///
/// Entries live in two flat arrays; each sensor owns a contiguous range
/// sorted by effective-from time. The correction at `t` is the latest entry
/// not after `t`, or zero before the first entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeCorrectionTable {
    ranges: HashMap<String, Range<usize>>,
    effective_from: Vec<DateTime<Utc>>,
    values: Vec<f64>,
}

impl TimeCorrectionTable {
    /// Build from (sensor, effective-from, value) entries. When one sensor
    /// has two entries at the same instant the later one wins.
    pub fn from_entries(entries: Vec<(String, DateTime<Utc>, f64)>) -> Self {
        let mut by_sensor: BTreeMap<String, BTreeMap<DateTime<Utc>, f64>> = BTreeMap::new();
        for (sensor, from, value) in entries {
            by_sensor.entry(sensor).or_default().insert(from, value);
        }

        let mut table = TimeCorrectionTable::default();
        for (sensor, steps) in by_sensor {
            let begin = table.values.len();
            for (from, value) in steps {
                table.effective_from.push(from);
                table.values.push(value);
            }
            table.ranges.insert(sensor, begin..table.values.len());
        }
        table
    }

    pub fn lookup(&self, sensor_id: &str, t: DateTime<Utc>) -> f64 {
        let Some(range) = self.ranges.get(sensor_id) else {
            return 0.0;
        };
        let times = &self.effective_from[range.clone()];
        match times.partition_point(|from| *from <= t) {
            0 => 0.0,
            n => self.values[range.start + n - 1],
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// One plant-year curve, either the global temperature curve or the
/// humidity curve of one variety
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationCurve {
    pub plant: Plant,
    pub year: i32,
    pub scope: CurveScope,
    pub coefficients: Coefficients,
    pub fixed_corrections: HashMap<String, f64>,
    pub time_corrections: TimeCorrectionTable,
}

impl CalibrationCurve {
    /// Physical value for a voltage; zero or non-finite voltages are
    /// treated as missing
    pub fn evaluate(&self, sensor_id: &str, voltage: f64, t: DateTime<Utc>) -> Option<f64> {
        if voltage == 0.0 || !voltage.is_finite() {
            return None;
        }
        let fixed = self.fixed_corrections.get(sensor_id).copied().unwrap_or(0.0);
        let varying = self.time_corrections.lookup(sensor_id, t);
        Some(self.coefficients.apply(voltage) + fixed - varying)
    }
}

/// Pick the year to use among the available ones
pub fn resolve_year<I>(available: I, year: i32, policy: CurveYearPolicy) -> Option<i32>
where
    I: IntoIterator<Item = i32>,
{
    let mut exact = None;
    let mut previous = None;
    let mut latest = None;
    for y in available {
        if y == year {
            exact = Some(y);
        }
        if y < year && previous.is_none_or(|p| y > p) {
            previous = Some(y);
        }
        if latest.is_none_or(|l| y > l) {
            latest = Some(y);
        }
    }
    match policy {
        CurveYearPolicy::Exact => exact,
        CurveYearPolicy::PreviousOrLatest => exact.or(previous).or(latest),
    }
}

/// All curves of one plant, indexed by scope and year
#[derive(Debug, Clone, Default)]
pub struct CurveSet {
    temperature: BTreeMap<i32, CalibrationCurve>,
    humidity: HashMap<String, BTreeMap<i32, CalibrationCurve>>,
}

impl CurveSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a curve; a second curve for the same scope and year is rejected
    pub fn insert(&mut self, curve: CalibrationCurve, source: &str) -> Result<()> {
        let year = curve.year;
        let slot = match &curve.scope {
            CurveScope::Temperature => &mut self.temperature,
            CurveScope::Variety(v) => self.humidity.entry(variety_key(v)).or_default(),
        };
        if slot.contains_key(&year) {
            return Err(EtlError::reference(
                source,
                format!("duplicate {} curve for {} {}", curve.scope, curve.plant, year),
            ));
        }
        slot.insert(year, curve);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.temperature.is_empty() && self.humidity.is_empty()
    }

    pub fn len(&self) -> usize {
        self.temperature.len() + self.humidity.values().map(BTreeMap::len).sum::<usize>()
    }

    pub fn temperature_curve(&self, year: i32, policy: CurveYearPolicy) -> Option<&CalibrationCurve> {
        let chosen = resolve_year(self.temperature.keys().copied(), year, policy)?;
        self.temperature.get(&chosen)
    }

    pub fn humidity_curve(
        &self,
        variety: &str,
        year: i32,
        policy: CurveYearPolicy,
    ) -> Option<&CalibrationCurve> {
        let by_year = self.humidity.get(&variety_key(variety))?;
        let chosen = resolve_year(by_year.keys().copied(), year, policy)?;
        by_year.get(&chosen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, d, 0, 0, 0).unwrap()
    }

    fn humidity_curve(variety: &str, year: i32) -> CalibrationCurve {
        CalibrationCurve {
            plant: Plant::Jpv,
            year,
            scope: CurveScope::Variety(variety.to_string()),
            coefficients: Coefficients::Quadratic {
                a: 0.5,
                b: 1.0,
                c: 2.0,
            },
            fixed_corrections: HashMap::new(),
            time_corrections: TimeCorrectionTable::default(),
        }
    }

    #[test]
    fn test_quadratic_humidity() {
        let curve = humidity_curve("Merin", 2025);
        assert_eq!(curve.evaluate("1", 10.0, day(1)), Some(62.0));
        assert_eq!(curve.evaluate("1", 0.0, day(1)), None);
        assert_eq!(curve.evaluate("1", f64::NAN, day(1)), None);
    }

    #[test]
    fn test_fixed_and_time_corrections() {
        let mut curve = humidity_curve("Merin", 2025);
        curve.fixed_corrections.insert("1".to_string(), 1.5);
        curve.time_corrections = TimeCorrectionTable::from_entries(vec![
            ("1".to_string(), day(10), 0.5),
            ("1".to_string(), day(5), 0.25),
            ("2".to_string(), day(1), 9.0),
        ]);

        // Before any entry: no time correction
        assert_eq!(curve.evaluate("1", 10.0, day(4)), Some(63.5));
        // Exactly at an entry
        assert_eq!(curve.evaluate("1", 10.0, day(5)), Some(63.25));
        // Between entries uses the earlier one
        assert_eq!(curve.evaluate("1", 10.0, day(9)), Some(63.25));
        assert_eq!(curve.evaluate("1", 10.0, day(20)), Some(63.0));
        // Sensor without corrections
        assert_eq!(curve.evaluate("3", 10.0, day(20)), Some(62.0));
        assert_eq!(curve.time_corrections.len(), 3);
    }

    #[test]
    fn test_resolve_year() {
        let years = [2022, 2024, 2025];
        assert_eq!(resolve_year(years, 2024, CurveYearPolicy::default()), Some(2024));
        assert_eq!(resolve_year(years, 2023, CurveYearPolicy::default()), Some(2022));
        assert_eq!(resolve_year(years, 2021, CurveYearPolicy::default()), Some(2025));
        assert_eq!(resolve_year(years, 2030, CurveYearPolicy::default()), Some(2025));
        assert_eq!(resolve_year(years, 2023, CurveYearPolicy::Exact), None);
        assert_eq!(resolve_year([], 2023, CurveYearPolicy::default()), None);
    }

    #[test]
    fn test_variety_aliases() {
        assert_eq!(variety_key("Merín"), "merin");
        assert_eq!(variety_key("L 5903"), "merin");
        assert_eq!(variety_key("SLI 9193"), "slio9193");
        assert_eq!(variety_key("Inovación"), "inov");
        assert_eq!(variety_key("Gurí INTA CL"), "guriintacl");
    }

    #[test]
    fn test_curve_set_lookup_and_duplicates() {
        let mut set = CurveSet::new();
        set.insert(humidity_curve("Merín", 2024), "a.toml").unwrap();
        set.insert(humidity_curve("INOV", 2025), "a.toml").unwrap();

        assert!(set.humidity_curve("l5903", 2025, CurveYearPolicy::default()).is_some());
        assert!(set.humidity_curve("L5903", 2025, CurveYearPolicy::Exact).is_none());
        assert!(set.humidity_curve("Olimar", 2025, CurveYearPolicy::default()).is_none());
        assert!(set.temperature_curve(2025, CurveYearPolicy::default()).is_none());

        match set.insert(humidity_curve("merin", 2024), "b.toml").unwrap_err() {
            EtlError::ReferenceData { file, reason } => {
                assert_eq!(file, "b.toml");
                assert!(reason.contains("duplicate"));
            }
            _ => panic!("Expected ReferenceData error"),
        }
        assert_eq!(set.len(), 2);
    }
}
