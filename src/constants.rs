//! Application constants for the drying-sensor ETL
//!
//! Column names, synonym tables and file naming conventions shared by the
//! parser, the reference loaders and the output tables.

// =============================================================================
// Canonical Variables
// =============================================================================

/// Canonical name of the humidity voltage channel
pub const VOLT_HUM: &str = "VOLT_HUM";

/// Canonical name of the temperature voltage channel
pub const VOLT_TEM: &str = "VOLT_TEM";

/// Normalized spellings that map to the humidity channel
pub const HUMIDITY_ALIASES: &[&str] = &["VOLTHUM", "VOLTHUME", "VHUM"];

/// Normalized spellings that map to the temperature channel
pub const TEMPERATURE_ALIASES: &[&str] = &["VOLTTEM", "VOLTTEMP", "VTEM", "VTEMP"];

/// Variables the loggers record that are not voltages (dropped on parse)
pub const METADATA_VARIABLES: &[&str] = &["HUMEDAD", "TEMPERATURA", "OFFSET", "VARIEDAD"];

/// Runtime/system rows written by the JPV logger
pub const RUNTIME_VARIABLE_PREFIX: &str = "$RT_";

// =============================================================================
// Source Formats
// =============================================================================

/// RB loggers record hundredths of a volt
pub const RB_VOLT_SCALE: f64 = 0.01;

/// JPV column synonyms (compared case-insensitively)
pub mod jpv_columns {
    pub const VARIABLE: &[&str] = &["varname", "variable", "var_name"];
    pub const TIME: &[&str] = &[
        "timestring",
        "time",
        "timestamp",
        "datetime",
        "date_time",
        "time_stamp",
        "fecha_hora",
    ];
    pub const VALUE: &[&str] = &["varvalue", "value", "valor"];
    pub const SENSOR: &[&str] = &["sensor", "sensor_id"];
}

/// RB column synonyms (compared case-insensitively)
pub mod rb_columns {
    pub const DATE: &[&str] = &["date", "fecha"];
    pub const TIME: &[&str] = &[
        "time",
        "hora",
        "loc_time",
        "loctime",
        "localtime",
        "localtiempo",
    ];
    pub const SENSOR: &[&str] = &["sensor", "sensor_id"];
}

/// Extensions considered to be raw sensor exports
pub const DEFAULT_SENSOR_EXTENSIONS: &[&str] = &["txt", "csv"];

// =============================================================================
// Lab Control Files
// =============================================================================

/// How many leading rows are scanned for the lab header row
pub const LAB_HEADER_SCAN_ROWS: usize = 20;

pub mod lab_columns {
    pub const VARIETY: &[&str] = &["variedad", "variety"];
    pub const TACHADA_ID: &[&str] = &["id_tachada", "identificador", "id", "tachada"];
    pub const START: &[&str] = &["inicio", "start", "fecha_inicio"];
    pub const END: &[&str] = &["fin", "end", "fecha_fin"];
    pub const SENSOR: &[&str] = &["sensor", "sensor_id", "secadora"];
    pub const IN_DOUBT: &[&str] = &["en_duda", "duda", "in_doubt"];
}

/// Extensions of lab control files
pub const LAB_FILE_EXTENSIONS: &[&str] = &["csv", "txt"];

/// Cell values read as "true" in the in-doubt column
pub const TRUTHY_VALUES: &[&str] = &["si", "sí", "yes", "true", "1", "x"];

// =============================================================================
// Calibration
// =============================================================================

/// Groups of variety names treated as the same cultivar
pub const VARIETY_ALIASES: &[&[&str]] = &[
    &["merin", "l5903"],
    &["slio9193", "sli9193", "9193"],
    &["inov", "innov", "inovacion"],
];

/// Scope name used for the global temperature curve
pub const TEMPERATURE_SCOPE: &str = "TEMPERATURE";

/// Curve documents must contain this marker in their name
pub const CURVE_FILE_MARKER: &str = "curvas";

pub const CURVE_FILE_EXTENSION: &str = "toml";

// =============================================================================
// Storage Layout
// =============================================================================

pub const CHECKPOINT_FOLDER: &str = "etl_timestamps";
pub const CHECKPOINT_FILE_PREFIX: &str = "last_run_timestamp";
/// Newest ledger entries kept in a checkpoint document
pub const CHECKPOINT_LEDGER_LIMIT: usize = 10;
pub const HISTORICAL_FILE_STEM: &str = "df_historico";

/// Timestamp suffix appended to output file names
pub const OUTPUT_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Default UTC offset of the plants' loggers (Uruguay)
pub const DEFAULT_SOURCE_UTC_OFFSET_HOURS: i32 = -3;

// =============================================================================
// Output Tables
// =============================================================================

/// Column order of the per-file processed (long form) table
pub const PROCESSED_COLUMNS: &[&str] = &[
    "plant",
    "year",
    "sensor_id",
    "timestamp",
    "variable",
    "value",
    "variety",
    "tachada_id",
    "humidity_initial",
    "humidity_final",
    "in_doubt",
    "TEMPERATURE",
    "HUMIDITY",
    "source_file",
    "raw_date",
    "raw_time",
];

/// Column order of the validated (wide form) table
pub const VALIDATED_COLUMNS: &[&str] = &[
    "plant",
    "year",
    "sensor_id",
    "timestamp",
    "VOLT_HUM",
    "VOLT_TEM",
    "TEMPERATURE",
    "HUMIDITY",
    "variety",
    "tachada_id",
    "humidity_initial",
    "humidity_final",
    "in_doubt",
    "source_file",
    "prediction",
    "probability",
];

/// Key column of the historical dataset
pub const TACHADA_ID_COLUMN: &str = "tachada_id";

/// Provenance column maintained by the consolidator
pub const SOURCE_FILES_COLUMN: &str = "source_files";

/// Separator between file names inside the provenance column
pub const SOURCE_FILES_SEPARATOR: &str = "|";
