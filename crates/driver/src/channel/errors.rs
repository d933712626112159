//! Device error reports.
//!
//! ERRORS / ADD_ERROR / RM_ERROR envelopes carry a list of
//! `[timestamp, source, code]` triples. The vendor app renders them with
//! the table below; unknown entries fall back to `<source>-<hex code>`.

use serde_json::Value;

/// One decoded error report entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceError {
    /// Seconds since epoch, device clock.
    pub timestamp: i64,
    pub source: i64,
    pub code: i64,
    pub source_text: String,
    pub message: String,
}

/// Decode every well-formed triple in the report; malformed entries are
/// skipped.
pub(crate) fn parse_report(msg: &Value) -> Vec<DeviceError> {
    msg.get("data")
        .and_then(Value::as_array)
        .map(|entries| entries.iter().filter_map(parse_entry).collect())
        .unwrap_or_default()
}

fn parse_entry(entry: &Value) -> Option<DeviceError> {
    let items = entry.as_array()?;
    let timestamp = items.first()?.as_i64()?;
    let source = items.get(1)?.as_i64()?;
    let code = items.get(2)?.as_i64()?;
    Some(describe(timestamp, source, code))
}

/// Render one error triple the way the vendor app does: the code is keyed
/// by its uppercase hex form without prefix.
pub fn describe(timestamp: i64, source: i64, code: i64) -> DeviceError {
    let hex = format!("{code:X}");
    let message = code_text(source, &hex)
        .map(str::to_string)
        .unwrap_or_else(|| format!("{source}-{hex}"));
    let source_text = source_text(source)
        .map(str::to_string)
        .unwrap_or_else(|| source.to_string());
    DeviceError {
        timestamp,
        source,
        code,
        source_text,
        message,
    }
}

fn source_text(source: i64) -> Option<&'static str> {
    match source {
        100 | 200 => Some("Communication firmware malfunction"),
        300 => Some("Motor malfunction"),
        400 => Some("Radar malfunction"),
        500 => Some("UWB malfunction"),
        600 => Some("Motion Control"),
        _ => None,
    }
}

fn code_text(source: i64, code_hex: &str) -> Option<&'static str> {
    match (source, code_hex) {
        (100, "1") => Some("DDS message timeout"),
        (100, "2") => Some("Distribution switch abnormal"),
        (100, "10") => Some("Battery communication error"),
        (100, "20") => Some("Abnormal mote control communication"),
        (100, "40") => Some("MCU communication error"),
        (100, "80") => Some("Motor communication error"),
        (200, "1") => Some("Rear left fan jammed"),
        (200, "2") => Some("Rear right fan jammed"),
        (200, "4") => Some("Front fan jammed"),
        (300, "1") => Some("Overcurrent"),
        (300, "2") => Some("Overvoltage"),
        (300, "4") => Some("Driver overheating"),
        (300, "8") => Some("Generatrix undervoltage"),
        (300, "10") => Some("Winding overheating"),
        (300, "20") => Some("Encoder abnormal"),
        (300, "100") => Some("Motor communication interruption"),
        (400, "1") => Some("Motor rotate speed abnormal"),
        (400, "2") => Some("PointCloud data abnormal"),
        (400, "4") => Some("Serial port data abnormal"),
        (400, "10") => Some("Abnormal dirt index"),
        (500, "1") => Some("UWB serial port open abnormal"),
        (500, "2") => Some("Robot dog information retrieval abnormal"),
        (600, "4") => Some("Overheating software protection"),
        (600, "8") => Some("Low battery software protection"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn known_code_resolves_by_hex_key() {
        // 16 decimal -> hex "10" -> battery communication error
        let error = describe(1700000000, 100, 16);
        assert_eq!(error.message, "Battery communication error");
        assert_eq!(error.source_text, "Communication firmware malfunction");

        // 256 decimal -> hex "100"
        let error = describe(1700000000, 300, 256);
        assert_eq!(error.message, "Motor communication interruption");
    }

    #[test]
    fn unknown_code_falls_back_to_source_dash_hex() {
        let error = describe(0, 300, 0x4000);
        assert_eq!(error.message, "300-4000");
        let error = describe(0, 900, 3);
        assert_eq!(error.message, "900-3");
        assert_eq!(error.source_text, "900");
    }

    #[test]
    fn report_parses_triples_and_skips_malformed_entries() {
        let msg = json!({
            "type": "errors",
            "data": [
                [1700000000, 100, 1],
                [1700000001, 600, 8],
                ["bad"],
                42
            ]
        });
        let errors = parse_report(&msg);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].message, "DDS message timeout");
        assert_eq!(errors[1].message, "Low battery software protection");
    }

    #[test]
    fn report_without_data_is_empty() {
        assert!(parse_report(&json!({"type": "errors"})).is_empty());
        assert!(parse_report(&json!({"type": "errors", "data": "oops"})).is_empty());
    }
}
