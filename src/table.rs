//! Output tables.
//!
//! Processed, validated and historical tables are exchanged as text columns
//! with a fixed order, so a file written by one run reads back identically
//! in the next regardless of encoding. [`StringTable`] is that in-memory
//! shape; encoding goes through a polars `DataFrame` for both CSV and
//! Parquet.

use crate::config::{CompressionAlgorithm, OutputFormat};
use crate::constants::{OUTPUT_TIMESTAMP_FORMAT, PROCESSED_COLUMNS, VALIDATED_COLUMNS};
use crate::error::{EtlError, Result};
use crate::models::{CalibratedReading, ValidatedBatchRecord};
use chrono::{DateTime, SecondsFormat, Utc};
use polars::prelude::*;
use std::io::Cursor;
use tracing::debug;

/// Rows of optional text cells under named columns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StringTable {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

impl StringTable {
    pub fn new<S: AsRef<str>>(columns: &[S]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.as_ref().to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Option<String>>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Append a column, filling existing rows with nulls. No-op if present.
    pub fn add_column(&mut self, name: &str) -> usize {
        if let Some(idx) = self.column_index(name) {
            return idx;
        }
        self.columns.push(name.to_string());
        for row in &mut self.rows {
            row.push(None);
        }
        self.columns.len() - 1
    }

    /// Append a row; short rows are padded with nulls, long rows truncated
    pub fn push_row(&mut self, mut row: Vec<Option<String>>) {
        row.resize(self.columns.len(), None);
        self.rows.push(row);
    }

    /// Cell value, with empty strings read as null
    pub fn value(&self, row: usize, column: &str) -> Option<&str> {
        let idx = self.column_index(column)?;
        self.rows
            .get(row)?
            .get(idx)?
            .as_deref()
            .filter(|v| !v.is_empty())
    }

    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let columns: Vec<Column> = self
            .columns
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let values: Vec<Option<String>> =
                    self.rows.iter().map(|row| row[idx].clone()).collect();
                Series::new(name.as_str().into(), values).into_column()
            })
            .collect();
        Ok(DataFrame::new(columns)?)
    }

    /// Every column is read as text
    pub fn from_dataframe(df: &DataFrame) -> Result<Self> {
        let mut columns = Vec::with_capacity(df.width());
        let mut cells: Vec<Vec<Option<String>>> = Vec::with_capacity(df.width());
        for column in df.get_columns() {
            columns.push(column.name().to_string());
            let text = column.cast(&DataType::String)?;
            let values = text
                .str()?
                .into_iter()
                .map(|v| v.map(str::to_string))
                .collect();
            cells.push(values);
        }

        let rows = (0..df.height())
            .map(|i| cells.iter().map(|col| col[i].clone()).collect())
            .collect();
        Ok(Self { columns, rows })
    }

    pub fn encode(&self, format: OutputFormat, compression: CompressionAlgorithm) -> Result<Vec<u8>> {
        let mut df = self.to_dataframe()?;
        let mut buffer = Vec::new();
        match format {
            OutputFormat::Csv => {
                CsvWriter::new(&mut buffer)
                    .include_header(true)
                    .finish(&mut df)?;
            }
            OutputFormat::Parquet => {
                ParquetWriter::new(&mut buffer)
                    .with_compression(compression.to_polars_compression())
                    .finish(&mut df)?;
            }
        }
        debug!(
            "Encoded {} rows x {} columns as {} ({} bytes)",
            df.height(),
            df.width(),
            format.extension(),
            buffer.len()
        );
        Ok(buffer)
    }

    pub fn decode(bytes: Vec<u8>, format: OutputFormat) -> Result<Self> {
        let df = match format {
            OutputFormat::Csv => CsvReadOptions::default()
                .with_has_header(true)
                .with_infer_schema_length(Some(0))
                .into_reader_with_file_handle(Cursor::new(bytes))
                .finish()?,
            OutputFormat::Parquet => ParquetReader::new(Cursor::new(bytes)).finish()?,
        };
        Self::from_dataframe(&df)
    }
}

/// Table format from a file name's extension
pub fn format_for_name(name: &str) -> Option<OutputFormat> {
    let ext = name.rsplit_once('.')?.1.to_lowercase();
    match ext.as_str() {
        "csv" => Some(OutputFormat::Csv),
        "parquet" => Some(OutputFormat::Parquet),
        _ => None,
    }
}

/// `{stem}_{kind}_{YYYYMMDDTHHMMSSZ}.{ext}`
pub fn output_file_name(stem: &str, kind: &str, at: DateTime<Utc>, format: OutputFormat) -> String {
    format!(
        "{}_{}_{}.{}",
        stem,
        kind,
        at.format(OUTPUT_TIMESTAMP_FORMAT),
        format.extension()
    )
}

pub fn format_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn number(value: Option<f64>) -> Option<String> {
    value.filter(|v| v.is_finite()).map(|v| v.to_string())
}

/// Long-form table, one row per reading
pub fn processed_table(readings: &[CalibratedReading]) -> StringTable {
    let mut table = StringTable::new(PROCESSED_COLUMNS);
    for calibrated in readings {
        let reading = &calibrated.labeled.reading;
        let lab = calibrated.labeled.lab.as_ref();
        table.push_row(vec![
            Some(reading.plant.to_string()),
            Some(reading.year.to_string()),
            Some(reading.sensor_id.clone()),
            Some(format_timestamp(reading.timestamp)),
            Some(reading.variable.to_string()),
            number(Some(reading.value)),
            lab.map(|l| l.variety.clone()),
            lab.map(|l| l.tachada_id.clone()),
            number(lab.and_then(|l| l.humidity_initial)),
            number(lab.and_then(|l| l.humidity_final)),
            lab.map(|l| l.in_doubt.to_string()),
            number(calibrated.temperature),
            number(calibrated.humidity),
            Some(reading.source_file.clone()),
            reading.raw_date.clone(),
            reading.raw_time.clone(),
        ]);
    }
    table
}

/// Wide-form table, one row per (timestamp, sensor)
pub fn validated_table(records: &[ValidatedBatchRecord]) -> StringTable {
    let mut table = StringTable::new(VALIDATED_COLUMNS);
    for record in records {
        table.push_row(vec![
            Some(record.plant.to_string()),
            Some(record.year.to_string()),
            Some(record.sensor_id.clone()),
            Some(format_timestamp(record.timestamp)),
            number(record.volt_hum),
            number(record.volt_tem),
            number(record.temperature),
            number(record.humidity),
            Some(record.lab.variety.clone()),
            Some(record.lab.tachada_id.clone()),
            number(record.lab.humidity_initial),
            number(record.lab.humidity_final),
            Some(record.lab.in_doubt.to_string()),
            Some(record.source_file.clone()),
            record.classification.prediction.clone(),
            number(record.classification.probability),
        ]);
    }
    table
}

/// Decode a stored table, picking the format from its name
pub fn decode_named(name: &str, bytes: Vec<u8>) -> Result<StringTable> {
    let format = format_for_name(name).ok_or_else(|| EtlError::Storage {
        message: format!("{} is not a csv or parquet table", name),
    })?;
    StringTable::decode(bytes, format)
}
