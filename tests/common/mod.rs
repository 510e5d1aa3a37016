//! Shared fixtures for pipeline integration tests

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use secado_processor::{EtlConfig, MemoryStorage, Pipeline};
use std::sync::Arc;

pub fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 11, 19, hour, 0, 0).unwrap()
}

pub fn test_config() -> EtlConfig {
    EtlConfig::default()
        .with_storage_root("/unused")
        .with_max_concurrent_files(2)
        .without_progress()
}

pub fn pipeline(storage: &Arc<MemoryStorage>) -> Pipeline {
    Pipeline::new(storage.clone(), test_config()).unwrap()
}

/// Two minutes of both channels in the JPV tab-separated export
pub fn jpv_export() -> String {
    [
        "VarName\tTimeString\tVarValue\tValidity\tTime_ms",
        "$RT_OFF$\t11/19/2025 10:00:00\t0\t1\t45980416666.6667",
        "VOLT_HUM\t11/19/2025 10:00:00\t2,35\t1\t45980416666.6667",
        "VOLT_TEM\t11/19/2025 10:00:00\t1,20\t1\t45980416666.6667",
        "VOLT_HUM\t11/19/2025 10:01:00\t2,40\t1\t45980417361.1111",
        "VOLT_TEM\t11/19/2025 10:01:00\t1,25\t1\t45980417361.1111",
        "",
    ]
    .join("\r\n")
}

/// The same readings in the RB layout (hundredths of a volt)
pub fn rb_export() -> String {
    [
        "Date;LOC_time;VHUM;VTEM",
        "11/19/2025;10:00:00;235;120",
        "11/19/2025;10:01:00;240;125",
        "",
    ]
    .join("\n")
}

/// Lab control file with one Merin batch on sensor 1 covering the exports
pub fn jpv_control_file() -> String {
    [
        "Control de Tachadas 2025;;;;;;",
        "Variedad;Identificador;Inicio;Fin;Sensor;Humedad inicial (%);Humedad final (%)",
        "Merin;12.0;19/11/2025 09:00;19/11/2025 11:00;1;22,5;13,1",
        "",
    ]
    .join("\n")
}

pub const JPV_CURVES: &str = r#"
plant = "JPV"
year = 2025

[temperature]
a = 10.0
b = 1.0

[[humidity]]
variety = "Merín"
a = 0.5
b = 1.0
c = 2.0
"#;
