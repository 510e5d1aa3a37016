//! Raw sensor file parsing.
//!
//! Turns a JPV or RB logger export into canonical long-form [`Reading`]s:
//! one row per (timestamp, sensor, voltage channel), timestamps in UTC,
//! values in volts. The plant tag selects the format strategy; everything
//! after the strategy (sensor id, year, deduplication) is shared.
//!
//! A file either parses completely or is rejected with a
//! [`EtlError::Parse`] naming the offending line.

pub mod encoding;
pub mod fields;
mod jpv;
mod rb;

#[cfg(test)]
mod tests;

use self::encoding::{decode_text, TextEncoding};
use crate::config::EtlConfig;
use crate::error::{EtlError, Result};
use crate::models::{Plant, Reading, Variable};
use chrono::{DateTime, Datelike, FixedOffset, Utc};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Context shared by the format strategies
pub(crate) struct ParseContext<'a> {
    pub file_name: &'a str,
    pub offset: FixedOffset,
}

/// One sample as read by a format strategy, before sensor and year
/// resolution
#[derive(Debug, Clone)]
pub(crate) struct RawSample {
    pub line: usize,
    pub timestamp: DateTime<Utc>,
    pub variable: Variable,
    pub value: f64,
    pub sensor: Option<String>,
    pub raw_date: Option<String>,
    pub raw_time: Option<String>,
}

#[derive(Debug, Default)]
pub(crate) struct FormatOutput {
    pub samples: Vec<RawSample>,
    pub rows_read: usize,
    pub metadata_rows: usize,
    pub unknown_variables: usize,
    pub empty_values: usize,
}

/// Counters describing what was kept and dropped from one file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub rows_read: usize,
    pub readings: usize,
    pub duplicates_dropped: usize,
    pub metadata_rows: usize,
    pub unknown_variables: usize,
    pub empty_values: usize,
}

/// Readings parsed from one file
#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub readings: Vec<Reading>,
    pub stats: ParseStats,
    pub encoding: TextEncoding,
}

/// Format-aware parser for raw sensor exports
#[derive(Debug, Clone)]
pub struct FormatParser {
    offset: FixedOffset,
}

impl FormatParser {
    /// Create a parser reading naive timestamps in the given UTC offset
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn from_config(config: &EtlConfig) -> Result<Self> {
        Ok(Self::new(config.source_offset()?))
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Parse a raw file; the sensor id must be derivable from the file
    pub fn parse(&self, bytes: &[u8], file_name: &str, plant: Plant) -> Result<ParsedFile> {
        self.parse_with_hint(bytes, file_name, plant, None)
    }

    /// Parse a raw file, falling back to `sensor_hint` when neither the file
    /// name nor an embedded column identifies the sensor
    pub fn parse_with_hint(
        &self,
        bytes: &[u8],
        file_name: &str,
        plant: Plant,
        sensor_hint: Option<&str>,
    ) -> Result<ParsedFile> {
        let (text, encoding) = decode_text(bytes);
        let ctx = ParseContext {
            file_name,
            offset: self.offset,
        };

        let output = match plant {
            Plant::Jpv => jpv::parse(&text, &ctx)?,
            Plant::Rb => rb::parse(&text, &ctx)?,
        };

        let name_sensor = sensor_id_from_name(file_name);
        let hint_sensor = sensor_hint.and_then(normalize_sensor_id);

        let mut stats = ParseStats {
            rows_read: output.rows_read,
            metadata_rows: output.metadata_rows,
            unknown_variables: output.unknown_variables,
            empty_values: output.empty_values,
            ..Default::default()
        };

        let mut seen = HashSet::new();
        let mut readings = Vec::with_capacity(output.samples.len());
        for sample in output.samples {
            let sensor_id = name_sensor
                .clone()
                .or_else(|| sample.sensor.as_deref().and_then(normalize_sensor_id))
                .or_else(|| hint_sensor.clone())
                .ok_or_else(|| {
                    EtlError::parse(file_name, sample.line, "cannot determine sensor id")
                })?;

            if !seen.insert((sample.timestamp, sample.variable, sensor_id.clone())) {
                stats.duplicates_dropped += 1;
                continue;
            }

            readings.push(Reading {
                timestamp: sample.timestamp,
                variable: sample.variable,
                value: sample.value,
                plant,
                year: sample.timestamp.with_timezone(&self.offset).year(),
                sensor_id,
                source_file: file_name.to_string(),
                raw_date: sample.raw_date,
                raw_time: sample.raw_time,
            });
        }

        if readings.is_empty() {
            return Err(EtlError::parse(
                file_name,
                0,
                format!(
                    "no voltage readings ({} rows, {} metadata, {} unknown variables, {} empty values)",
                    stats.rows_read, stats.metadata_rows, stats.unknown_variables, stats.empty_values
                ),
            ));
        }

        stats.readings = readings.len();
        if stats.unknown_variables > 0 {
            warn!(
                "{}: skipped {} rows with unrecognized variable names",
                file_name, stats.unknown_variables
            );
        }
        debug!(
            "{}: parsed {} readings ({:?}), {} duplicates dropped",
            file_name, stats.readings, encoding, stats.duplicates_dropped
        );

        Ok(ParsedFile {
            readings,
            stats,
            encoding,
        })
    }
}

fn sensor_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)sensor\s*[_-]?\s*([0-9]+)").ok())
        .as_ref()
}

fn year_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?:^|[^0-9])(20[0-9]{2})(?:[^0-9]|$)").ok())
        .as_ref()
}

/// Loggers numbered in tens (`SENSOR30`) refer to dryer 3
fn normalize_sensor_number(n: u32) -> u32 {
    if n >= 10 && n % 10 == 0 { n / 10 } else { n }
}

/// Sensor id from a `SENSOR<n>` token in a file name
pub fn sensor_id_from_name(name: &str) -> Option<String> {
    let caps = sensor_pattern()?.captures(name)?;
    let n: u32 = caps.get(1)?.as_str().parse().ok()?;
    Some(normalize_sensor_number(n).to_string())
}

/// Normalize a free-form sensor cell (`3`, `3.0`, `Sensor 30`) to its id
pub fn normalize_sensor_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if let Some(id) = sensor_id_from_name(trimmed) {
        return Some(id);
    }
    let integral = trimmed.split(['.', ',']).next().unwrap_or(trimmed);
    let digits: String = integral.chars().filter(|c| c.is_ascii_digit()).collect();
    let n: u32 = digits.parse().ok()?;
    Some(normalize_sensor_number(n).to_string())
}

/// Four-digit year (20xx) embedded in a file name
pub fn year_from_name(name: &str) -> Option<i32> {
    year_pattern()?
        .captures(name)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}
