//! End-to-end partition runs over in-memory storage
//!
//! Raw files, lab control files and curve documents are placed in a
//! `MemoryStorage` with explicit modification times, then a full run is
//! checked through its outputs and checkpoint.

mod common;

use common::*;
use secado_processor::checkpoint::Checkpoint;
use secado_processor::models::Plant;
use secado_processor::table::StringTable;
use secado_processor::{EtlError, MemoryStorage, OutputFormat, Storage};
use std::sync::Arc;

async fn only_output(storage: &MemoryStorage, folder: &str, name_part: &str) -> StringTable {
    let listing = storage.list_files(folder).await.unwrap();
    let file = listing
        .iter()
        .find(|f| f.name.contains(name_part))
        .unwrap_or_else(|| panic!("no output containing {} in {}", name_part, folder));
    let bytes = storage.contents(folder, &file.name).unwrap();
    StringTable::decode(bytes, OutputFormat::Csv).unwrap()
}

#[tokio::test]
async fn test_jpv_and_rb_without_lab_match() {
    let storage = Arc::new(MemoryStorage::new());
    storage
        .insert_with_time("JPV/raw/1", "JPV_SENSOR1_2025.txt", jpv_export(), at(14))
        .unwrap();
    storage
        .insert_with_time("RB/raw/1", "RB_SENSOR1_2025.csv", rb_export(), at(14))
        .unwrap();

    let pipeline = pipeline(&storage);
    let jpv = pipeline.run_partition(Plant::Jpv, "1").await.unwrap();
    let rb = pipeline.run_partition(Plant::Rb, "1").await.unwrap();

    for report in [&jpv, &rb] {
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.total_records(), 4);
        assert_eq!(report.new_watermark, Some(at(14)));
        assert!(report.checkpoint_error.is_none());
        assert_eq!(report.outcomes[0].records_matched_lab, 0);
        assert!(report.outcomes[0].validated_file.is_none());
    }

    let jpv_table = only_output(&storage, "JPV/processed", "JPV_SENSOR1_2025_processed_").await;
    let rb_table = only_output(&storage, "RB/processed", "RB_SENSOR1_2025_processed_").await;
    assert_eq!(jpv_table.columns(), rb_table.columns());
    assert_eq!(jpv_table.len(), rb_table.len());

    for table in [&jpv_table, &rb_table] {
        for row in 0..table.len() {
            assert_eq!(table.value(row, "sensor_id"), Some("1"));
            assert_eq!(table.value(row, "tachada_id"), None);
            assert_eq!(table.value(row, "variety"), None);
            assert_eq!(table.value(row, "TEMPERATURE"), None);
            assert_eq!(table.value(row, "HUMIDITY"), None);
        }
        assert_eq!(table.value(0, "timestamp"), Some("2025-11-19T13:00:00Z"));
    }

    let value = |table: &StringTable, row: usize| -> f64 {
        table.value(row, "value").unwrap().parse().unwrap()
    };
    for row in 0..jpv_table.len() {
        assert!((value(&jpv_table, row) - value(&rb_table, row)).abs() < 1e-9);
    }
    assert_eq!(storage.count("JPV/validated"), 0);
}

#[tokio::test]
async fn test_incremental_selection_by_watermark() {
    let storage = Arc::new(MemoryStorage::new());
    let pipeline = pipeline(&storage);

    let initial = Checkpoint::new(Plant::Jpv, "1");
    let seeded = Checkpoint {
        last_run_timestamp: Some(at(10)),
        ..initial.clone()
    };
    pipeline.checkpoints().update(&initial, seeded).await.unwrap();

    for (name, hour) in [
        ("JPV_SENSOR1_a.txt", 9),
        ("JPV_SENSOR1_b.txt", 11),
        ("JPV_SENSOR1_c.txt", 12),
    ] {
        storage
            .insert_with_time("JPV/raw/1", name, jpv_export(), at(hour))
            .unwrap();
    }

    let report = pipeline.run_partition(Plant::Jpv, "1").await.unwrap();
    assert_eq!(report.files_listed, 3);
    assert_eq!(report.files_selected, 2);
    let names: Vec<&str> = report.outcomes.iter().map(|o| o.file.name.as_str()).collect();
    assert_eq!(names, vec!["JPV_SENSOR1_b.txt", "JPV_SENSOR1_c.txt"]);
    assert_eq!(report.previous_watermark, Some(at(10)));
    assert_eq!(report.new_watermark, Some(at(12)));

    let checkpoint = pipeline.checkpoints().load(Plant::Jpv, "1").await.unwrap();
    assert_eq!(checkpoint.last_run_timestamp, Some(at(12)));
    assert_eq!(checkpoint.version, 2);
    assert_eq!(checkpoint.processed_files.len(), 2);

    // Nothing new: no outcomes and the checkpoint is not touched
    let again = pipeline.run_partition(Plant::Jpv, "1").await.unwrap();
    assert_eq!(again.files_selected, 0);
    assert_eq!(again.new_watermark, Some(at(12)));
    let unchanged = pipeline.checkpoints().load(Plant::Jpv, "1").await.unwrap();
    assert_eq!(unchanged.version, 2);
}

#[tokio::test]
async fn test_corrupt_file_does_not_stop_run() {
    let storage = Arc::new(MemoryStorage::new());
    storage
        .insert_with_time("RB/raw/2", "RB_SENSOR2_ok.csv", rb_export(), at(11))
        .unwrap();
    storage
        .insert_with_time(
            "RB/raw/2",
            "RB_SENSOR2_bad.csv",
            "Date;LOC_time;VHUM;VTEM\n11/19/2025;10:00:00;abc;120\n",
            at(13),
        )
        .unwrap();
    storage
        .insert_with_time("RB/raw/2", "notes.pdf", "binary", at(13))
        .unwrap();

    let report = pipeline(&storage).run_partition(Plant::Rb, "2").await.unwrap();
    assert_eq!(report.files_listed, 3);
    assert_eq!(report.files_selected, 2);
    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.failed(), 1);

    let failed = report.outcomes.iter().find(|o| !o.is_success()).unwrap();
    assert_eq!(failed.file.name, "RB_SENSOR2_bad.csv");
    assert!(failed.error.as_deref().unwrap().contains("line 2"));

    // The watermark only covers the file that succeeded
    assert_eq!(report.new_watermark, Some(at(11)));
}

#[tokio::test]
async fn test_checkpoint_write_failure_keeps_outputs() {
    let storage = Arc::new(MemoryStorage::new());
    storage
        .insert_with_time("JPV/raw/1", "JPV_SENSOR1_2025.txt", jpv_export(), at(14))
        .unwrap();
    storage.inject_failure("etl_timestamps/").unwrap();

    let report = pipeline(&storage).run_partition(Plant::Jpv, "1").await.unwrap();
    assert_eq!(report.succeeded(), 1);
    assert!(report.checkpoint_error.is_some());
    assert_eq!(report.new_watermark, None);
    assert_eq!(storage.count("JPV/processed"), 1);

    storage.clear_failures().unwrap();
    let checkpoint = pipeline(&storage)
        .checkpoints()
        .load(Plant::Jpv, "1")
        .await
        .unwrap();
    assert!(checkpoint.last_run_timestamp.is_none());
}

#[tokio::test]
async fn test_unreachable_checkpoint_store_is_fatal() {
    let storage = Arc::new(MemoryStorage::new());
    storage
        .insert_with_time("JPV/raw/1", "JPV_SENSOR1_2025.txt", jpv_export(), at(14))
        .unwrap();
    storage.inject_failure("etl_timestamps").unwrap();

    let result = pipeline(&storage).run_partition(Plant::Jpv, "1").await;
    match result.unwrap_err() {
        EtlError::CheckpointUnavailable { plant, .. } => assert_eq!(plant, "JPV"),
        _ => panic!("Expected CheckpointUnavailable error"),
    }
    assert_eq!(storage.count("JPV/processed"), 0);
}

#[tokio::test]
async fn test_lab_matched_run_is_calibrated_and_validated() {
    let storage = Arc::new(MemoryStorage::new());
    storage
        .insert_with_time("JPV/raw/1", "JPV_SENSOR1_2025.txt", jpv_export(), at(14))
        .unwrap();
    storage
        .insert_with_time("JPV/lab", "JPV_2025_Control_Tachadas.csv", jpv_control_file(), at(8))
        .unwrap();
    storage
        .insert_with_time("JPV/curves", "2025_Curvas_JPV.toml", JPV_CURVES, at(8))
        .unwrap();

    let report = pipeline(&storage).run_partition(Plant::Jpv, "1").await.unwrap();
    assert!(report.reference_warnings.is_empty());
    let outcome = &report.outcomes[0];
    assert_eq!(outcome.records_matched_lab, 4);
    assert_eq!(outcome.records_calibrated, 4);
    assert!(outcome.validated_file.is_some());

    let folder = "JPV/processed";
    let name = outcome.output_file.as_deref().unwrap();
    let processed =
        StringTable::decode(storage.contents(folder, name).unwrap(), OutputFormat::Csv).unwrap();
    let number = |row: usize, column: &str| -> f64 {
        processed.value(row, column).unwrap().parse().unwrap()
    };

    // 10:00 local: VOLT_HUM 2.35, VOLT_TEM 1.20; both rows carry both values
    for row in 0..2 {
        assert_eq!(processed.value(row, "tachada_id"), Some("12"));
        assert_eq!(processed.value(row, "variety"), Some("Merin"));
        assert!((number(row, "TEMPERATURE") - 13.0).abs() < 1e-9);
        assert!((number(row, "HUMIDITY") - (0.5 * 2.35 * 2.35 + 2.35 + 2.0)).abs() < 1e-9);
        assert!((number(row, "humidity_initial") - 22.5).abs() < 1e-9);
    }

    let validated_name = outcome.validated_file.as_deref().unwrap();
    let validated = StringTable::decode(
        storage.contents("JPV/validated", validated_name).unwrap(),
        OutputFormat::Csv,
    )
    .unwrap();
    assert_eq!(validated.len(), 2);
    assert_eq!(validated.value(0, "VOLT_HUM"), Some("2.35"));
    assert_eq!(validated.value(0, "VOLT_TEM"), Some("1.2"));
    assert_eq!(validated.value(0, "prediction"), None);
}
