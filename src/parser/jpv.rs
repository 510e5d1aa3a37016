//! JPV logger exports
//!
//! One row per (variable, time) sample: `VarName`, `TimeString`, `VarValue`,
//! followed by logger bookkeeping columns that are ignored.

use super::fields::{
    classify_variable, detect_delimiter, error_line, find_column, first_line, header_names,
    is_blank, parse_decimal, parse_local_datetime, reader_builder, record_line, DateOrder,
    VariableClass,
};
use super::{FormatOutput, ParseContext, RawSample};
use crate::constants::jpv_columns;
use crate::error::{EtlError, Result};
use tracing::debug;

pub(super) fn parse(text: &str, ctx: &ParseContext<'_>) -> Result<FormatOutput> {
    let (header_idx, header_line) =
        first_line(text).ok_or_else(|| EtlError::parse(ctx.file_name, 0, "file is empty"))?;
    let delimiter = detect_delimiter(header_line, &[b'\t', b';', b',']);

    // Some loggers end every data row with a trailing tab
    let mut reader = reader_builder(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers = header_names(
        reader
            .headers()
            .map_err(|e| EtlError::parse(ctx.file_name, header_idx + 1, e.to_string()))?,
    );

    let var_col = require(&headers, jpv_columns::VARIABLE, "VarName", ctx, header_idx)?;
    let time_col = require(&headers, jpv_columns::TIME, "TimeString", ctx, header_idx)?;
    let value_col = require(&headers, jpv_columns::VALUE, "VarValue", ctx, header_idx)?;
    let sensor_col = find_column(&headers, jpv_columns::SENSOR);

    debug!(
        "{}: JPV header with {} columns, delimiter {:?}",
        ctx.file_name,
        headers.len(),
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
        let trailing_empty =
            record.len() == headers.len() + 1 && record.get(headers.len()) == Some("");
        if record.len() != headers.len() && !trailing_empty {
            return Err(EtlError::parse(
                ctx.file_name,
                line_no,
                format!("expected {} fields, found {}", headers.len(), record.len()),
            ));
        }
        output.rows_read += 1;

        let variable = match classify_variable(&record[var_col]) {
            VariableClass::Channel(v) => v,
            VariableClass::Metadata => {
                output.metadata_rows += 1;
                continue;
            }
            VariableClass::Unknown => {
                output.unknown_variables += 1;
                continue;
            }
        };

        let value = match parse_decimal(&record[value_col])
            .map_err(|reason| EtlError::parse(ctx.file_name, line_no, reason))?
        {
            Some(v) => v,
            None => {
                output.empty_values += 1;
                continue;
            }
        };

        let raw_time = &record[time_col];
        let timestamp = parse_local_datetime(raw_time, DateOrder::MonthFirst, ctx.offset)
            .ok_or_else(|| {
                EtlError::parse(
                    ctx.file_name,
                    line_no,
                    format!("unparseable timestamp '{}'", raw_time),
                )
            })?;

        output.samples.push(RawSample {
            line: line_no,
            timestamp,
            variable,
            value,
            sensor: sensor_col.and_then(|c| record.get(c)).map(str::to_string),
            raw_date: None,
            raw_time: None,
        });
    }

    Ok(output)
}

fn require(
    headers: &[String],
    synonyms: &[&str],
    label: &str,
    ctx: &ParseContext<'_>,
    header_idx: usize,
) -> Result<usize> {
    find_column(headers, synonyms).ok_or_else(|| {
        EtlError::parse(
            ctx.file_name,
            header_idx + 1,
            format!("missing {} column in header {:?}", label, headers),
        )
    })
}
