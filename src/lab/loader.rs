//! Lab control file loading
//!
//! Control files are spreadsheets exported as delimited text. A few title
//! rows usually precede the real header, dates are written day-first, and
//! ids come out of the spreadsheet as floats (`12.0`).

use crate::constants::{lab_columns, LAB_HEADER_SCAN_ROWS, TRUTHY_VALUES};
use crate::error::{EtlError, Result};
use crate::models::LabRecord;
use crate::parser::encoding::decode_text;
use crate::parser::fields::{
    compact_key, detect_delimiter, find_column, header_names, is_blank, parse_decimal,
    parse_local_datetime, reader_builder, record_line, DateOrder,
};
use crate::parser::normalize_sensor_id;
use chrono::FixedOffset;
use tracing::{debug, warn};

/// Counters for one control file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabLoadReport {
    pub rows_read: usize,
    pub records: usize,
    pub dropped_incomplete: usize,
    pub dropped_inverted: usize,
}

/// Column positions resolved from the header row
#[derive(Debug)]
struct LabColumns {
    variety: usize,
    tachada_id: usize,
    start: usize,
    end: usize,
    sensor: usize,
    humidity_initial: Option<usize>,
    humidity_final: Option<usize>,
    in_doubt: Option<usize>,
}

impl LabColumns {
    fn resolve(headers: &[String]) -> Option<Self> {
        let humidity = |suffixes: &[&str]| {
            headers.iter().position(|h| {
                let key = compact_key(&h.replace('%', ""));
                key.contains("humedad") && suffixes.iter().any(|s| key.contains(s))
            })
        };

        Some(Self {
            variety: find_column(headers, lab_columns::VARIETY)?,
            tachada_id: find_column(headers, lab_columns::TACHADA_ID)?,
            start: find_column(headers, lab_columns::START)?,
            end: find_column(headers, lab_columns::END)?,
            sensor: find_column(headers, lab_columns::SENSOR)?,
            humidity_initial: humidity(&["inicio", "inicial"]),
            humidity_final: humidity(&["final"]),
            in_doubt: find_column(headers, lab_columns::IN_DOUBT),
        })
    }
}

/// Spreadsheet ids come through as `12.0`; keep them as `12`
pub fn normalize_tachada_id(raw: &str) -> Option<String> {
    let s = raw.trim().trim_matches('"').trim();
    if s.is_empty() || s.eq_ignore_ascii_case("nan") {
        return None;
    }
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 => Some(format!("{}", v as i64)),
        _ => Some(s.to_string()),
    }
}

fn is_truthy(raw: &str) -> bool {
    let value = raw.trim().to_lowercase();
    TRUTHY_VALUES.contains(&value.as_str())
}

/// Parse a lab control file into batch records.
///
/// Rows with missing identity, sensor or window fields, or with an end
/// before the start, are dropped and counted. Only a file without a
/// recognizable header is an error.
pub fn parse_lab_file(
    bytes: &[u8],
    file_name: &str,
    offset: FixedOffset,
) -> Result<(Vec<LabRecord>, LabLoadReport)> {
    let (text, _) = decode_text(bytes);

    let (header_line, delimiter, columns) = text
        .lines()
        .take(LAB_HEADER_SCAN_ROWS)
        .enumerate()
        .find_map(|(idx, line)| {
            let delimiter = detect_delimiter(line, &[b';', b',', b'\t']);
            let record = reader_builder(delimiter)
                .has_headers(false)
                .flexible(true)
                .from_reader(line.as_bytes())
                .records()
                .next()?
                .ok()?;
            LabColumns::resolve(&header_names(&record)).map(|c| (idx + 1, delimiter, c))
        })
        .ok_or_else(|| {
            EtlError::reference(
                file_name,
                format!(
                    "no header row with variety, id, start, end and sensor columns in the first {} rows",
                    LAB_HEADER_SCAN_ROWS
                ),
            )
        })?;

    debug!("{}: lab header at line {}: {:?}", file_name, header_line, columns);

    let mut report = LabLoadReport::default();
    let mut records = Vec::new();

    let mut reader = reader_builder(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    for result in reader.records() {
        let record = result.map_err(|e| EtlError::reference(file_name, e.to_string()))?;
        let line_no = record_line(&record);
        if line_no <= header_line || is_blank(&record) {
            continue;
        }
        report.rows_read += 1;
        let cell = |i: usize| record.get(i).unwrap_or("");

        let tachada_id = normalize_tachada_id(cell(columns.tachada_id));
        let variety = Some(cell(columns.variety).trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        let sensor_id = normalize_sensor_id(cell(columns.sensor));
        let start = parse_local_datetime(cell(columns.start), DateOrder::DayFirst, offset);
        let end = parse_local_datetime(cell(columns.end), DateOrder::DayFirst, offset);

        let (Some(tachada_id), Some(variety), Some(sensor_id), Some(start), Some(end)) =
            (tachada_id, variety, sensor_id, start, end)
        else {
            debug!("{}: line {} incomplete, skipped", file_name, line_no);
            report.dropped_incomplete += 1;
            continue;
        };

        if start > end {
            warn!(
                "{}: batch {} ends before it starts (line {}), skipped",
                file_name, tachada_id, line_no
            );
            report.dropped_inverted += 1;
            continue;
        }

        let humidity = |col: Option<usize>| {
            let raw = cell(col?);
            parse_decimal(raw.trim().trim_end_matches('%'))
                .inspect_err(|reason| {
                    warn!("{}: line {}: humidity {}", file_name, line_no, reason)
                })
                .ok()
                .flatten()
        };

        records.push(LabRecord {
            tachada_id,
            variety,
            sensor_id,
            start,
            end,
            humidity_initial: humidity(columns.humidity_initial),
            humidity_final: humidity(columns.humidity_final),
            in_doubt: columns.in_doubt.is_some_and(|c| is_truthy(cell(c))),
        });
    }

    report.records = records.len();
    if report.dropped_incomplete > 0 {
        warn!(
            "{}: {} lab rows missing id, variety, sensor or window",
            file_name, report.dropped_incomplete
        );
    }

    Ok((records, report))
}
