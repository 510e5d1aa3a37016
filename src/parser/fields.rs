//! Field parsing utilities shared by the sensor and lab parsers
//!
//! Header matching, variable-name canonicalization, decimal-comma numbers,
//! local timestamp parsing and the CSV reader setup for delimited exports.

use crate::constants::{
    HUMIDITY_ALIASES, METADATA_VARIABLES, RUNTIME_VARIABLE_PREFIX, TEMPERATURE_ALIASES,
};
use crate::models::Variable;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use csv::{ReaderBuilder, StringRecord, Trim};

/// Order of day and month in slash-separated dates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateOrder {
    MonthFirst,
    DayFirst,
}

/// What a raw variable name refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableClass {
    Channel(Variable),
    Metadata,
    Unknown,
}

/// Replace Spanish accented letters with their base letter
pub fn strip_accents(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'á' | 'à' | 'ä' | 'â' => 'a',
            'é' | 'è' | 'ë' | 'ê' => 'e',
            'í' | 'ì' | 'ï' | 'î' => 'i',
            'ó' | 'ò' | 'ö' | 'ô' => 'o',
            'ú' | 'ù' | 'ü' | 'û' => 'u',
            'ñ' => 'n',
            'Á' | 'À' | 'Ä' | 'Â' => 'A',
            'É' | 'È' | 'Ë' | 'Ê' => 'E',
            'Í' | 'Ì' | 'Ï' | 'Î' => 'I',
            'Ó' | 'Ò' | 'Ö' | 'Ô' => 'O',
            'Ú' | 'Ù' | 'Ü' | 'Û' => 'U',
            'Ñ' => 'N',
            other => other,
        })
        .collect()
}

/// Lowercase, accent-free, alphanumeric-only form used to compare headers
pub fn compact_key(s: &str) -> String {
    strip_accents(s)
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// Index of the first header matching any synonym, synonyms in priority order
pub fn find_column(headers: &[String], synonyms: &[&str]) -> Option<usize> {
    let keys: Vec<String> = headers.iter().map(|h| compact_key(h)).collect();
    synonyms.iter().find_map(|synonym| {
        let wanted = compact_key(synonym);
        keys.iter().position(|k| *k == wanted)
    })
}

/// Strip a leading `<digits>_` tag that some loggers prepend to names
pub fn strip_numeric_prefix(name: &str) -> &str {
    let trimmed = name.trim();
    let digits = trimmed.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 && trimmed[digits..].starts_with('_') {
        &trimmed[digits + 1..]
    } else {
        trimmed
    }
}

/// Uppercase and drop whitespace, underscores, dots and hyphens
pub fn canonical_variable_key(name: &str) -> String {
    strip_numeric_prefix(name)
        .to_uppercase()
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '_' | '.' | '-'))
        .collect()
}

/// Map a raw variable name onto a canonical channel
pub fn classify_variable(name: &str) -> VariableClass {
    let stripped = strip_numeric_prefix(name);
    if stripped.to_uppercase().starts_with(RUNTIME_VARIABLE_PREFIX) {
        return VariableClass::Metadata;
    }
    let key = canonical_variable_key(stripped);
    if HUMIDITY_ALIASES.contains(&key.as_str()) {
        VariableClass::Channel(Variable::VoltHum)
    } else if TEMPERATURE_ALIASES.contains(&key.as_str()) {
        VariableClass::Channel(Variable::VoltTem)
    } else if METADATA_VARIABLES.contains(&key.as_str()) {
        VariableClass::Metadata
    } else {
        VariableClass::Unknown
    }
}

/// Parse a measurement cell.
///
/// Returns `Ok(None)` for empty or explicit missing markers and `Err` for
/// text that is not a number. A single decimal comma (`45,2`) is accepted.
pub fn parse_decimal(raw: &str) -> std::result::Result<Option<f64>, String> {
    let s = raw.trim().trim_matches('"').trim();
    if s.is_empty() || matches!(s.to_lowercase().as_str(), "nan" | "na" | "null" | "none" | "-")
    {
        return Ok(None);
    }

    let normalized = if s.contains(',') && !s.contains('.') && s.matches(',').count() == 1 {
        s.replace(',', ".")
    } else {
        s.to_string()
    };

    match normalized.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(format!("non-numeric value '{}'", raw.trim())),
    }
}

const ISO_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M",
    "%d.%m.%Y %H:%M:%S%.f",
    "%d.%m.%Y %H:%M",
];

const MONTH_FIRST_FORMATS: &[&str] = &[
    "%m/%d/%Y %H:%M:%S%.f",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M %p",
    "%m-%d-%Y %H:%M:%S%.f",
    "%m/%d/%y %H:%M:%S",
];

const DAY_FIRST_FORMATS: &[&str] = &[
    "%d/%m/%Y %H:%M:%S%.f",
    "%d/%m/%Y %H:%M",
    "%d/%m/%Y %I:%M:%S %p",
    "%d-%m-%Y %H:%M:%S%.f",
    "%d-%m-%Y %H:%M",
    "%d/%m/%y %H:%M:%S",
];

const DATE_ONLY_ISO: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d.%m.%Y"];
const DATE_ONLY_MONTH_FIRST: &[&str] = &["%m/%d/%Y", "%m-%d-%Y"];
const DATE_ONLY_DAY_FIRST: &[&str] = &["%d/%m/%Y", "%d-%m-%Y"];

/// Parse a naive local date-time in one of the known layouts
pub fn parse_naive_datetime(raw: &str, order: DateOrder) -> Option<NaiveDateTime> {
    let s = raw.trim().trim_matches('"').trim();
    if s.is_empty() {
        return None;
    }

    let slash_formats = match order {
        DateOrder::MonthFirst => MONTH_FIRST_FORMATS,
        DateOrder::DayFirst => DAY_FIRST_FORMATS,
    };
    if let Some(dt) = ISO_FORMATS
        .iter()
        .chain(slash_formats.iter())
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
    {
        return Some(dt);
    }

    // A bare date is read as local midnight
    let date_formats = match order {
        DateOrder::MonthFirst => DATE_ONLY_MONTH_FIRST,
        DateOrder::DayFirst => DATE_ONLY_DAY_FIRST,
    };
    DATE_ONLY_ISO
        .iter()
        .chain(date_formats.iter())
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Parse a timestamp; explicit offsets are honoured, naive values are read
/// in the loggers' local offset
pub fn parse_local_datetime(
    raw: &str,
    order: DateOrder,
    offset: FixedOffset,
) -> Option<DateTime<Utc>> {
    let s = raw.trim().trim_matches('"').trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = parse_naive_datetime(s, order)?;
    naive
        .and_local_timezone(offset)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// First non-blank line and its 0-based index
pub fn first_line(text: &str) -> Option<(usize, &str)> {
    text.lines().enumerate().find(|(_, l)| !l.trim().is_empty())
}

/// Pick the delimiter that splits the header line into the most fields
pub fn detect_delimiter(header_line: &str, candidates: &[u8]) -> u8 {
    candidates
        .iter()
        .copied()
        .max_by_key(|&d| header_line.split(char::from(d)).count())
        .filter(|&d| header_line.contains(char::from(d)))
        .or_else(|| candidates.first().copied())
        .unwrap_or(b',')
}

/// CSV reader settings shared by every delimited input; cells are trimmed
pub fn reader_builder(delimiter: u8) -> ReaderBuilder {
    let mut builder = ReaderBuilder::new();
    builder.delimiter(delimiter).trim(Trim::All);
    builder
}

/// 1-based line a record starts on
pub fn record_line(record: &StringRecord) -> usize {
    record.position().map_or(0, |p| p.line() as usize)
}

/// Line a CSV error points at, 0 when unknown
pub fn error_line(error: &csv::Error) -> usize {
    error.position().map_or(0, |p| p.line() as usize)
}

/// Rows made only of delimiters (`;;;`) carry no data
pub fn is_blank(record: &StringRecord) -> bool {
    record.iter().all(str::is_empty)
}

/// Header cells as owned strings
pub fn header_names(record: &StringRecord) -> Vec<String> {
    record.iter().map(str::to_string).collect()
}
