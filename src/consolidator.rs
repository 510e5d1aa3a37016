//! Historical consolidation of validated batches.
//!
//! The historical dataset holds one row per `tachada_id`. Consolidation
//! appends rows for identifiers not seen before and otherwise keeps the row
//! already present; later duplicates are dropped whole. The `source_files`
//! column records every validated file that carried a given identifier, so
//! applying the same batch twice leaves the dataset unchanged.

use crate::constants::{SOURCE_FILES_COLUMN, SOURCE_FILES_SEPARATOR, TACHADA_ID_COLUMN};
use crate::table::StringTable;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Counters for one consolidation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsolidationReport {
    pub existing_rows: usize,
    pub incoming_rows: usize,
    pub appended: usize,
    pub duplicates_dropped: usize,
    pub skipped_unkeyed: usize,
    pub files: usize,
}

/// The consolidated table, keyed by `tachada_id`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoricalDataset {
    table: StringTable,
}

impl HistoricalDataset {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Wrap a stored table; `source_files` is moved to the last column
    pub fn from_table(table: StringTable) -> Self {
        let mut dataset = Self { table };
        dataset.move_source_files_last();
        dataset
    }

    pub fn table(&self) -> &StringTable {
        &self.table
    }

    pub fn into_table(self) -> StringTable {
        self.table
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Provenance list of the row with this identifier
    pub fn source_files(&self, tachada_id: &str) -> Option<Vec<String>> {
        let row = (0..self.table.len())
            .find(|&i| self.table.value(i, TACHADA_ID_COLUMN) == Some(tachada_id))?;
        Some(split_sources(self.table.value(row, SOURCE_FILES_COLUMN)))
    }

    fn move_source_files_last(&mut self) {
        let Some(idx) = self.table.column_index(SOURCE_FILES_COLUMN) else {
            return;
        };
        if idx + 1 == self.table.columns().len() {
            return;
        }
        let mut columns: Vec<String> = self.table.columns().to_vec();
        let name = columns.remove(idx);
        columns.push(name);
        let mut reordered = StringTable::new(&columns);
        for row in self.table.rows() {
            let mut row = row.clone();
            let cell = row.remove(idx);
            row.push(cell);
            reordered.push_row(row);
        }
        self.table = reordered;
    }
}

fn split_sources(cell: Option<&str>) -> Vec<String> {
    cell.map(|s| {
        s.split(SOURCE_FILES_SEPARATOR)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

/// Merge validated batches, each tagged with the file it came from, into
/// the existing dataset. Batches are applied in the order given.
pub fn consolidate(
    existing: HistoricalDataset,
    batches: &[(String, StringTable)],
) -> (HistoricalDataset, ConsolidationReport) {
    let mut report = ConsolidationReport {
        existing_rows: existing.len(),
        files: batches.len(),
        ..Default::default()
    };

    // Column union: existing first, then new in first-seen order
    let mut columns: Vec<String> = existing
        .table
        .columns()
        .iter()
        .filter(|c| c.as_str() != SOURCE_FILES_COLUMN)
        .cloned()
        .collect();
    for (_, batch) in batches {
        for column in batch.columns() {
            if column != SOURCE_FILES_COLUMN && !columns.contains(column) {
                columns.push(column.clone());
            }
        }
    }
    if !columns.iter().any(|c| c == TACHADA_ID_COLUMN) {
        columns.insert(0, TACHADA_ID_COLUMN.to_string());
    }

    let mut out = StringTable::new(&columns);
    let source_idx = out.add_column(SOURCE_FILES_COLUMN);
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut sources: Vec<Vec<String>> = Vec::new();

    let append = |out: &mut StringTable,
                  sources: &mut Vec<Vec<String>>,
                  table: &StringTable,
                  row: usize,
                  provenance: Vec<String>| {
        let cells = columns
            .iter()
            .map(|c| table.value(row, c).map(str::to_string))
            .collect();
        out.push_row(cells);
        sources.push(provenance);
    };

    for row in 0..existing.table.len() {
        let Some(id) = existing.table.value(row, TACHADA_ID_COLUMN) else {
            report.skipped_unkeyed += 1;
            continue;
        };
        let provenance = split_sources(existing.table.value(row, SOURCE_FILES_COLUMN));
        match index.get(id) {
            Some(&kept) => {
                merge_sources(&mut sources[kept], provenance);
                report.duplicates_dropped += 1;
            }
            None => {
                index.insert(id.to_string(), out.len());
                append(&mut out, &mut sources, &existing.table, row, provenance);
            }
        }
    }

    for (source, batch) in batches {
        report.incoming_rows += batch.len();
        let mut unkeyed = 0;
        for row in 0..batch.len() {
            let Some(id) = batch.value(row, TACHADA_ID_COLUMN) else {
                unkeyed += 1;
                continue;
            };
            match index.get(id) {
                Some(&kept) => {
                    merge_sources(&mut sources[kept], vec![source.clone()]);
                    report.duplicates_dropped += 1;
                }
                None => {
                    index.insert(id.to_string(), out.len());
                    append(&mut out, &mut sources, batch, row, vec![source.clone()]);
                    report.appended += 1;
                }
            }
        }
        if unkeyed > 0 {
            warn!("{}: {} rows without {} skipped", source, unkeyed, TACHADA_ID_COLUMN);
            report.skipped_unkeyed += unkeyed;
        }
    }

    let mut table = StringTable::new(out.columns());
    for (row, provenance) in out.rows().iter().zip(&sources) {
        let mut row = row.clone();
        row[source_idx] = (!provenance.is_empty()).then(|| provenance.join(SOURCE_FILES_SEPARATOR));
        table.push_row(row);
    }

    debug!(
        "Consolidated {} existing + {} incoming rows: {} appended, {} duplicates dropped",
        report.existing_rows, report.incoming_rows, report.appended, report.duplicates_dropped
    );
    (HistoricalDataset { table }, report)
}

fn merge_sources(kept: &mut Vec<String>, incoming: Vec<String>) {
    for source in incoming {
        if !kept.contains(&source) {
            kept.push(source);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(rows: &[(&str, &str)]) -> StringTable {
        let mut table = StringTable::new(&["tachada_id", "HUMIDITY"]);
        for (id, humidity) in rows {
            let id = (!id.is_empty()).then(|| id.to_string());
            table.push_row(vec![id, Some(humidity.to_string())]);
        }
        table
    }

    #[test]
    fn test_first_seen_row_wins() {
        let batches = vec![
            ("a_validated.csv".to_string(), batch(&[("1", "18.0"), ("2", "19.5")])),
            ("b_validated.csv".to_string(), batch(&[("2", "99.0"), ("3", "20.1")])),
        ];
        let (dataset, report) = consolidate(HistoricalDataset::empty(), &batches);

        assert_eq!(dataset.len(), 3);
        assert_eq!(report.appended, 3);
        assert_eq!(report.duplicates_dropped, 1);
        assert_eq!(dataset.table().value(1, "HUMIDITY"), Some("19.5"));
        assert_eq!(
            dataset.source_files("2").unwrap(),
            vec!["a_validated.csv", "b_validated.csv"]
        );
        assert_eq!(
            dataset.table().columns().last().map(String::as_str),
            Some(SOURCE_FILES_COLUMN)
        );
    }

    #[test]
    fn test_consolidation_is_idempotent() {
        let batches = vec![("a_validated.csv".to_string(), batch(&[("1", "18.0"), ("2", "19.5")]))];
        let (once, _) = consolidate(HistoricalDataset::empty(), &batches);
        let (twice, report) = consolidate(once.clone(), &batches);

        assert_eq!(twice, once);
        assert_eq!(report.appended, 0);
        assert_eq!(report.duplicates_dropped, 2);
    }

    #[test]
    fn test_unkeyed_rows_skipped() {
        let batches = vec![("a.csv".to_string(), batch(&[("", "18.0"), ("4", "19.0")]))];
        let (dataset, report) = consolidate(HistoricalDataset::empty(), &batches);
        assert_eq!(dataset.len(), 1);
        assert_eq!(report.skipped_unkeyed, 1);
    }

    #[test]
    fn test_new_columns_appended_before_provenance() {
        let mut existing = StringTable::new(&["tachada_id", "source_files", "HUMIDITY"]);
        existing.push_row(vec![
            Some("1".to_string()),
            Some("old.csv".to_string()),
            Some("17.0".to_string()),
        ]);
        let existing = HistoricalDataset::from_table(existing);
        assert_eq!(existing.table().columns(), ["tachada_id", "HUMIDITY", "source_files"]);

        let mut incoming = StringTable::new(&["tachada_id", "prediction"]);
        incoming.push_row(vec![Some("5".to_string()), Some("ok".to_string())]);
        let (dataset, _) = consolidate(existing, &[("new.csv".to_string(), incoming)]);

        assert_eq!(
            dataset.table().columns(),
            ["tachada_id", "HUMIDITY", "prediction", "source_files"]
        );
        assert_eq!(dataset.source_files("1").unwrap(), vec!["old.csv"]);
        assert_eq!(dataset.table().value(1, "HUMIDITY"), None);
    }
}
