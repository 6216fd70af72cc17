//! Decoded output records

use chrono::{DateTime, Local};
use serde::Serialize;

/// One unit of decoder output
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    /// A text line (packet radio frames, pager messages, call activity)
    Text(String),
    /// A JSON object (sensor readings, aircraft, trunk calls)
    Json(serde_json::Value),
}

impl Payload {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Payload::Json(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedEvent {
    pub received_at: DateTime<Local>,
    pub payload: Payload,
    /// File the record was read from, for directory-polled decoders
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl DecodedEvent {
    pub fn new(payload: Payload) -> Self {
        Self {
            received_at: Local::now(),
            payload,
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serialization() {
        let event = DecodedEvent::new(Payload::Json(json!({"model": "Acurite-Tower", "id": 42})))
            .with_source("call_1.json");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["payload"]["kind"], "json");
        assert_eq!(value["payload"]["data"]["id"], 42);
        assert_eq!(value["source"], "call_1.json");
        assert!(value["received_at"].is_string());
    }

    #[test]
    fn test_text_event_omits_source() {
        let event = DecodedEvent::new(Payload::Text("POCSAG512: Address: 1234".into()));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["payload"]["kind"], "text");
        assert_eq!(value["payload"]["data"], "POCSAG512: Address: 1234");
        assert!(value.get("source").is_none());
    }

    #[test]
    fn test_payload_accessors() {
        let text = Payload::Text("N0CALL>APRS:hello".into());
        assert_eq!(text.as_text(), Some("N0CALL>APRS:hello"));
        assert!(text.as_json().is_none());
    }
}
