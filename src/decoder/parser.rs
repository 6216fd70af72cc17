//! Line parsers for decoder stdout
//!
//! A parser returns `Ok(None)` for lines that carry no record (banners,
//! blank lines) and `MalformedOutput` for lines that look like a record but
//! fail to decode. Both are dropped by the reader loop; only the latter is
//! counted.

use serde_json::json;

use super::event::Payload;
use crate::error::{HubError, Result};

/// Signature shared by all stdout line parsers
pub type LineParser = fn(&str) -> Result<Option<Payload>>;

/// Stderr keywords that mark voice call activity
pub const CALL_KEYWORDS: [&str; 5] = ["voice", "call", "talkgroup", "source", "target"];

/// Any non-blank line, trimmed
pub fn text_line(line: &str) -> Result<Option<Payload>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    Ok(Some(Payload::Text(line.to_string())))
}

/// One JSON object per line. Lines that do not start with `{` are ignored.
pub fn json_line(line: &str) -> Result<Option<Payload>> {
    let line = line.trim();
    if !line.starts_with('{') {
        return Ok(None);
    }
    let value: serde_json::Value =
        serde_json::from_str(line).map_err(|e| HubError::MalformedOutput(format!("{}: {}", e, line)))?;
    if !value.is_object() {
        return Err(HubError::MalformedOutput(format!("not a JSON object: {}", line)));
    }
    Ok(Some(Payload::Json(value)))
}

/// Mode-S frame in `*<hex>;` form, 7 or 14 bytes
pub fn hex_frame(line: &str) -> Result<Option<Payload>> {
    let line = line.trim();
    if !line.starts_with('*') {
        return Ok(None);
    }

    let end_idx = line
        .find(';')
        .ok_or_else(|| HubError::MalformedOutput(format!("unterminated frame: {}", line)))?;
    let hex_str = &line[1..end_idx];

    // 14 hex chars (short squitter) or 28 hex chars (extended squitter)
    if hex_str.len() != 14 && hex_str.len() != 28 {
        return Err(HubError::MalformedOutput(format!(
            "frame length {} is not 7 or 14 bytes: {}",
            hex_str.len(),
            line
        )));
    }

    let bytes = hex::decode(hex_str).map_err(|e| HubError::MalformedOutput(format!("{}: {}", e, line)))?;
    Ok(Some(Payload::Json(json!({
        "frame": hex_str.to_ascii_uppercase(),
        "bytes": bytes.len(),
        "downlink_format": bytes[0] >> 3,
    }))))
}

/// True when a decoder diagnostic line reports call activity
pub fn is_call_activity(line: &str) -> bool {
    let lower = line.to_lowercase();
    CALL_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_line() {
        assert_eq!(
            text_line("  POCSAG1200: Address: 1234567  Function: 0  Alpha:   TEST\r\n").unwrap(),
            Some(Payload::Text(
                "POCSAG1200: Address: 1234567  Function: 0  Alpha:   TEST".into()
            ))
        );
        assert_eq!(text_line("   ").unwrap(), None);
    }

    #[test]
    fn test_json_line() {
        let payload = json_line(r#"{"time":"2024-01-01 00:00:00","model":"Acurite-Tower","temperature_C":21.5}"#)
            .unwrap()
            .unwrap();
        assert_eq!(payload.as_json().unwrap()["model"], "Acurite-Tower");
    }

    #[test]
    fn test_json_line_skips_banners() {
        assert_eq!(json_line("rtl_433 version 23.11").unwrap(), None);
        assert_eq!(json_line("").unwrap(), None);
    }

    #[test]
    fn test_json_line_malformed() {
        assert!(matches!(
            json_line(r#"{"model": "trunc"#),
            Err(HubError::MalformedOutput(_))
        ));
    }

    #[test]
    fn test_hex_frame_long() {
        let payload = hex_frame("*8D4840D6202CC371C32CE0576098;").unwrap().unwrap();
        let value = payload.as_json().unwrap();
        assert_eq!(value["bytes"], 14);
        assert_eq!(value["downlink_format"], 17);
        assert_eq!(value["frame"], "8D4840D6202CC371C32CE0576098");
    }

    #[test]
    fn test_hex_frame_with_crlf() {
        assert!(hex_frame("*8D4840D6202CC371C32CE0576098;\r\n").unwrap().is_some());
    }

    #[test]
    fn test_hex_frame_short() {
        let payload = hex_frame("*02E197B2F3F9A1;").unwrap().unwrap();
        assert_eq!(payload.as_json().unwrap()["bytes"], 7);
    }

    #[test]
    fn test_hex_frame_invalid() {
        assert_eq!(hex_frame("not a message").unwrap(), None);
        assert!(hex_frame("*invalid;").is_err());
        // too short
        assert!(hex_frame("*12345;").is_err());
        assert!(hex_frame("*8D4840D6202CC3").is_err());
        assert!(hex_frame("*ZZ4840D6202CC3;").is_err());
    }

    #[test]
    fn test_call_activity_keywords() {
        assert!(is_call_activity("Sync: +DMR  slot1 Voice  TGT=1234 SRC=5678"));
        assert!(is_call_activity("TalkGroup 4100 active"));
        assert!(!is_call_activity("Tuning to 851.0125 MHz"));
    }
}
