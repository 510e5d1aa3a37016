//! RB logger exports
//!
//! Wide delimited tables with separate date and time columns and one column
//! per voltage channel, recorded in hundredths of a volt.

use super::fields::{
    classify_variable, detect_delimiter, error_line, find_column, first_line, header_names,
    is_blank, parse_decimal, parse_local_datetime, reader_builder, record_line, DateOrder,
    VariableClass,
};
use super::{FormatOutput, ParseContext, RawSample};
use crate::constants::{rb_columns, RB_VOLT_SCALE};
use crate::error::{EtlError, Result};
use crate::models::Variable;
use tracing::debug;

pub(super) fn parse(text: &str, ctx: &ParseContext<'_>) -> Result<FormatOutput> {
    let (header_idx, header_line) =
        first_line(text).ok_or_else(|| EtlError::parse(ctx.file_name, 0, "file is empty"))?;
    let delimiter = detect_delimiter(header_line, &[b';', b',']);

    let mut reader = reader_builder(delimiter)
        .has_headers(true)
        .flexible(false)
        .from_reader(text.as_bytes());
    let headers = header_names(
        reader
            .headers()
            .map_err(|e| EtlError::parse(ctx.file_name, header_idx + 1, e.to_string()))?,
    );

    let (date_col, time_col) = match (
        find_column(&headers, rb_columns::DATE),
        find_column(&headers, rb_columns::TIME),
    ) {
        (Some(d), Some(t)) => (d, t),
        (date, _) => {
            let missing = if date.is_none() { "date" } else { "time" };
            return Err(EtlError::parse(
                ctx.file_name,
                header_idx + 1,
                format!("missing {} column in header {:?}", missing, headers),
            ));
        }
    };
    let sensor_col = find_column(&headers, rb_columns::SENSOR);

    let channels: Vec<(usize, Variable)> = headers
        .iter()
        .enumerate()
        .filter_map(|(i, h)| match classify_variable(h) {
            VariableClass::Channel(v) => Some((i, v)),
            _ => None,
        })
        .collect();
    if channels.is_empty() {
        return Err(EtlError::parse(
            ctx.file_name,
            header_idx + 1,
            format!("no voltage columns in header {:?}", headers),
        ));
    }

    debug!(
        "{}: RB header with {} voltage columns, delimiter {:?}",
        ctx.file_name,
        channels.len(),
        char::from(delimiter)
    );

    let mut output = FormatOutput::default();

    for result in reader.records() {
        let record =
            result.map_err(|e| EtlError::parse(ctx.file_name, error_line(&e), e.to_string()))?;
        if is_blank(&record) {
            continue;
        }
        let line_no = record_line(&record);
        output.rows_read += 1;

        let raw_date = &record[date_col];
        let raw_time = &record[time_col];
        let combined = format!("{} {}", raw_date, raw_time);
        let timestamp = parse_local_datetime(&combined, DateOrder::MonthFirst, ctx.offset)
            .ok_or_else(|| {
                EtlError::parse(
                    ctx.file_name,
                    line_no,
                    format!("unparseable timestamp '{}'", combined),
                )
            })?;

        for &(col, variable) in &channels {
            let value = parse_decimal(&record[col])
                .map_err(|reason| EtlError::parse(ctx.file_name, line_no, reason))?;
            let Some(value) = value else {
                output.empty_values += 1;
                continue;
            };
            output.samples.push(RawSample {
                line: line_no,
                timestamp,
                variable,
                value: value * RB_VOLT_SCALE,
                sensor: sensor_col.map(|c| record[c].to_string()),
                raw_date: Some(raw_date.to_string()),
                raw_time: Some(raw_time.to_string()),
            });
        }
    }

    Ok(output)
}
