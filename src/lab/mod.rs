//! Laboratory cross-referencing.
//!
//! Joins canonical readings with the lab's batch records: a reading belongs
//! to a batch when it comes from the batch's sensor and its timestamp,
//! floored to whole seconds, falls inside the batch's inclusive window.
//!
//! Windows on one sensor are not supposed to overlap. When they do, the
//! configured [`OverlapPolicy`] picks one record deterministically and the
//! ambiguity is reported.

pub mod loader;

pub use loader::{parse_lab_file, LabLoadReport};

use crate::models::{LabMatch, LabRecord, LabeledReading, Reading};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Which record wins when several windows contain a reading
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// The batch that started most recently
    #[default]
    LatestStart,
    /// The batch that started first
    EarliestStart,
}

/// Two windows on the same sensor that share at least one instant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowOverlap {
    pub sensor_id: String,
    pub first: String,
    pub second: String,
}

/// Windows of one sensor ordered by start, with the running maximum end
/// so a backward scan can stop early
#[derive(Debug, Default)]
struct SensorWindows {
    records: Vec<(usize, LabRecord)>,
    max_end: Vec<DateTime<Utc>>,
}

impl SensorWindows {
    fn finalize(&mut self) {
        self.records
            .sort_by(|(ia, a), (ib, b)| a.start.cmp(&b.start).then(ia.cmp(ib)));
        let mut running: Option<DateTime<Utc>> = None;
        self.max_end = self
            .records
            .iter()
            .map(|(_, r)| {
                let m = running.map_or(r.end, |m| m.max(r.end));
                running = Some(m);
                m
            })
            .collect();
    }

    /// All records whose window contains `t`, as (input order, record)
    fn containing(&self, t: DateTime<Utc>) -> Vec<&(usize, LabRecord)> {
        let upper = self.records.partition_point(|(_, r)| r.start <= t);
        let mut found = Vec::new();
        for j in (0..upper).rev() {
            if self.max_end[j] < t {
                break;
            }
            if self.records[j].1.end >= t {
                found.push(&self.records[j]);
            }
        }
        found
    }

    fn overlaps(&self, sensor_id: &str) -> Vec<WindowOverlap> {
        let mut overlaps = Vec::new();
        for j in 1..self.records.len() {
            let (_, current) = &self.records[j];
            if current.start <= self.max_end[j - 1] {
                // The overlapping partner is the latest-ending earlier window
                if let Some((_, previous)) = self.records[..j]
                    .iter()
                    .filter(|(_, r)| r.end >= current.start)
                    .max_by_key(|(_, r)| r.end)
                {
                    overlaps.push(WindowOverlap {
                        sensor_id: sensor_id.to_string(),
                        first: previous.tachada_id.clone(),
                        second: current.tachada_id.clone(),
                    });
                }
            }
        }
        overlaps
    }
}

/// Result of crossing one file's readings with the lab records
#[derive(Debug, Clone)]
pub struct CrossOutput {
    pub labeled: Vec<LabeledReading>,
    pub matched: usize,
    /// Readings that fell inside more than one window
    pub ambiguous: usize,
}

/// Per-sensor interval index over lab records
#[derive(Debug, Default)]
pub struct LabCrosser {
    index: HashMap<String, SensorWindows>,
    policy: OverlapPolicy,
    overlaps: Vec<WindowOverlap>,
    record_count: usize,
}

impl LabCrosser {
    pub fn new(records: Vec<LabRecord>, policy: OverlapPolicy) -> Self {
        let record_count = records.len();
        let mut index: HashMap<String, SensorWindows> = HashMap::new();
        for (order, record) in records.into_iter().enumerate() {
            index
                .entry(record.sensor_id.clone())
                .or_default()
                .records
                .push((order, record));
        }

        let mut overlaps = Vec::new();
        for (sensor_id, windows) in index.iter_mut() {
            windows.finalize();
            overlaps.extend(windows.overlaps(sensor_id));
        }
        overlaps.sort_by(|a, b| (&a.sensor_id, &a.first).cmp(&(&b.sensor_id, &b.first)));
        for overlap in &overlaps {
            warn!(
                "Lab windows overlap on sensor {}: batches {} and {}",
                overlap.sensor_id, overlap.first, overlap.second
            );
        }

        debug!(
            "Indexed {} lab records over {} sensors",
            record_count,
            index.len()
        );

        Self {
            index,
            policy,
            overlaps,
            record_count,
        }
    }

    /// An index without records; every reading passes through unmatched
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn record_count(&self) -> usize {
        self.record_count
    }

    pub fn overlaps(&self) -> &[WindowOverlap] {
        &self.overlaps
    }

    /// The record a reading at `t` on `sensor_id` belongs to, and how many
    /// windows contained it
    pub fn lookup(&self, sensor_id: &str, t: DateTime<Utc>) -> (Option<&LabRecord>, usize) {
        let Some(windows) = self.index.get(sensor_id) else {
            return (None, 0);
        };
        let candidates = windows.containing(t.trunc_subsecs(0));
        let count = candidates.len();
        let chosen = match self.policy {
            OverlapPolicy::LatestStart => candidates
                .into_iter()
                .min_by(|(ia, a), (ib, b)| b.start.cmp(&a.start).then(ia.cmp(ib))),
            OverlapPolicy::EarliestStart => candidates
                .into_iter()
                .min_by(|(ia, a), (ib, b)| a.start.cmp(&b.start).then(ia.cmp(ib))),
        };
        (chosen.map(|(_, r)| r), count)
    }

    /// Attach lab fields to every reading that falls inside a batch window
    pub fn cross(&self, readings: Vec<Reading>) -> CrossOutput {
        let mut matched = 0;
        let mut ambiguous = 0;
        let mut reported: HashSet<(String, String)> = HashSet::new();

        let labeled = readings
            .into_iter()
            .map(|reading| {
                let (record, count) = self.lookup(&reading.sensor_id, reading.timestamp);
                if count > 1 {
                    ambiguous += 1;
                    if let Some(record) = record {
                        if reported.insert((reading.sensor_id.clone(), record.tachada_id.clone()))
                        {
                            warn!(
                                "{}: sensor {} reading at {} falls in {} lab windows, using batch {}",
                                reading.source_file,
                                reading.sensor_id,
                                reading.timestamp,
                                count,
                                record.tachada_id
                            );
                        }
                    }
                }
                let lab = record.map(LabMatch::from);
                if lab.is_some() {
                    matched += 1;
                }
                LabeledReading { reading, lab }
            })
            .collect();

        CrossOutput {
            labeled,
            matched,
            ambiguous,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Plant, Variable};
    use chrono::{Duration, TimeZone};

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 19, hour, minute, 0).unwrap()
    }

    fn record(id: &str, sensor: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> LabRecord {
        LabRecord {
            tachada_id: id.to_string(),
            variety: "Merin".to_string(),
            sensor_id: sensor.to_string(),
            start,
            end,
            humidity_initial: Some(22.0),
            humidity_final: Some(13.0),
            in_doubt: false,
        }
    }

    fn reading(sensor: &str, t: DateTime<Utc>) -> Reading {
        Reading {
            timestamp: t,
            variable: Variable::VoltHum,
            value: 2.0,
            plant: Plant::Jpv,
            year: 2025,
            sensor_id: sensor.to_string(),
            source_file: "JPV_SENSOR1.txt".to_string(),
            raw_date: None,
            raw_time: None,
        }
    }

    #[test]
    fn test_match_by_sensor_and_inclusive_window() {
        let crosser = LabCrosser::new(
            vec![
                record("A", "1", at(8, 0), at(10, 0)),
                record("B", "2", at(8, 0), at(10, 0)),
            ],
            OverlapPolicy::default(),
        );
        let output = crosser.cross(vec![
            reading("1", at(8, 0)),
            reading("1", at(10, 0)),
            reading("1", at(10, 1)),
            reading("3", at(9, 0)),
        ]);

        assert_eq!(output.matched, 2);
        assert_eq!(output.ambiguous, 0);
        let ids: Vec<Option<&str>> = output
            .labeled
            .iter()
            .map(|l| l.lab.as_ref().map(|m| m.tachada_id.as_str()))
            .collect();
        assert_eq!(ids, vec![Some("A"), Some("A"), None, None]);
    }

    #[test]
    fn test_subsecond_timestamp_is_floored() {
        let crosser = LabCrosser::new(
            vec![record("A", "1", at(8, 0), at(10, 0))],
            OverlapPolicy::default(),
        );
        let t = at(10, 0) + Duration::milliseconds(500);
        let (found, count) = crosser.lookup("1", t);
        assert_eq!(found.map(|r| r.tachada_id.as_str()), Some("A"));
        assert_eq!(count, 1);
    }

    #[test]
    fn test_overlap_policies() {
        let records = vec![
            record("A", "1", at(8, 0), at(12, 0)),
            record("B", "1", at(10, 0), at(14, 0)),
            record("C", "1", at(9, 0), at(9, 30)),
        ];

        let latest = LabCrosser::new(records.clone(), OverlapPolicy::LatestStart);
        let (found, count) = latest.lookup("1", at(11, 0));
        assert_eq!(found.map(|r| r.tachada_id.as_str()), Some("B"));
        assert_eq!(count, 2);

        let earliest = LabCrosser::new(records, OverlapPolicy::EarliestStart);
        let (found, _) = earliest.lookup("1", at(11, 0));
        assert_eq!(found.map(|r| r.tachada_id.as_str()), Some("A"));

        // Nested window C is found even though B started later
        let (found, count) = latest.lookup("1", at(9, 15));
        assert_eq!(found.map(|r| r.tachada_id.as_str()), Some("C"));
        assert_eq!(count, 2);

        assert_eq!(latest.overlaps().len(), 2);
    }

    #[test]
    fn test_identical_windows_break_ties_by_record_order() {
        let crosser = LabCrosser::new(
            vec![
                record("first", "1", at(8, 0), at(10, 0)),
                record("second", "1", at(8, 0), at(10, 0)),
            ],
            OverlapPolicy::LatestStart,
        );
        let output = crosser.cross(vec![reading("1", at(9, 0))]);
        assert_eq!(output.ambiguous, 1);
        assert_eq!(
            output.labeled[0].lab.as_ref().map(|m| m.tachada_id.as_str()),
            Some("first")
        );
    }

    #[test]
    fn test_empty_crosser_passes_through() {
        let output = LabCrosser::empty().cross(vec![reading("1", at(9, 0))]);
        assert_eq!(output.matched, 0);
        assert!(output.labeled[0].lab.is_none());
        assert_eq!(output.labeled[0].reading.value, 2.0);
    }
}
