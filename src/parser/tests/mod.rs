//! Test utilities for sensor file parsing
//!
//! Fixture builders for JPV and RB exports describing the same logical
//! readings, so both strategies can be compared.

use super::FormatParser;
use chrono::FixedOffset;


/// Parser reading naive timestamps as UTC-3
pub fn uy_parser() -> FormatParser {
    FormatParser::new(FixedOffset::west_opt(3 * 3600).unwrap())
}

/// Encode text the way JPV loggers write it (UTF-16LE with BOM)
pub fn utf16le_with_bom(text: &str) -> Vec<u8> {
    let mut bytes = vec![0xFF, 0xFE];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    bytes
}

/// Two timestamps, both channels, plus a runtime row and a metadata row
pub fn create_jpv_export() -> String {
    [
        "VarName\tTimeString\tVarValue\tValidity\tTime_ms",
        "$RT_OFF$\t11/19/2025 10:00:00\t0\t1\t45980416666.6667",
        "VOLT_HUM\t11/19/2025 10:00:00\t2,35\t1\t45980416666.6667",
        "VOLT_TEM\t11/19/2025 10:00:00\t1,20\t1\t45980416666.6667",
        "HUMEDAD\t11/19/2025 10:00:00\t18,5\t1\t45980416666.6667",
        "VOLT_HUM\t11/19/2025 10:01:00\t2,40\t1\t45980417361.1111",
        "VOLT_TEM\t11/19/2025 10:01:00\t1,25\t1\t45980417361.1111",
        "",
    ]
    .join("\r\n")
}

/// The same readings as [`create_jpv_export`] in RB layout (hundredths)
pub fn create_rb_export() -> String {
    [
        "Date;LOC_time;VHUM;VTEM",
        "11/19/2025;10:00:00;235;120",
        "11/19/2025;10:01:00;240;125",
        "",
    ]
    .join("\n")
}
