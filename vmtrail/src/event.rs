//! Event and payload types shared by both store backends.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EventError, Result};

/// An opaque structured payload: a JSON object.
pub type Payload = Map<String, Value>;

/// Name of the payload field the persistent backend stamps with the event time.
///
/// The field is reserved: a caller-supplied value under this name is
/// overwritten on write and stripped on read.
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// One recorded snapshot: a UTC timestamp plus its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// When the event was put.
    pub timestamp: DateTime<Utc>,
    /// The payload as it was put.
    pub payload: Payload,
}

impl Event {
    /// Creates an event.
    pub fn new(timestamp: DateTime<Utc>, payload: Payload) -> Self {
        Self { timestamp, payload }
    }

    /// Serializes the event as a persisted record: the payload with the
    /// timestamp field set to an RFC 3339 UTC string ending in `Z`.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialize`] if the payload cannot be serialized.
    pub fn encode_record(&self) -> Result<Vec<u8>> {
        let mut record = self.payload.clone();
        record.insert(
            TIMESTAMP_FIELD.to_string(),
            Value::String(format_timestamp(self.timestamp)),
        );
        serde_json::to_vec(&record).map_err(|source| EventError::Serialize { source }.into())
    }

    /// Parses a persisted record back into an event.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::CorruptedRecord`] if the bytes are not a JSON
    /// object, or [`EventError::InvalidTimestamp`] if the stamped timestamp is
    /// missing or unparsable.
    pub fn decode_record(bytes: &[u8]) -> Result<Self> {
        let mut payload: Payload = serde_json::from_slice(bytes)
            .map_err(|source| EventError::CorruptedRecord { source })?;

        let stamped = match payload.remove(TIMESTAMP_FIELD) {
            Some(Value::String(s)) => s,
            Some(other) => {
                return Err(EventError::InvalidTimestamp {
                    reason: format!("expected string, got {}", json_kind(&other)),
                }
                .into());
            }
            None => {
                return Err(EventError::InvalidTimestamp {
                    reason: "field is missing".to_string(),
                }
                .into());
            }
        };

        let timestamp = DateTime::parse_from_rfc3339(&stamped)
            .map_err(|e| EventError::InvalidTimestamp {
                reason: format!("'{stamped}': {e}"),
            })?
            .with_timezone(&Utc);

        Ok(Self { timestamp, payload })
    }
}

/// Renders a timestamp the way persisted records carry it.
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Converts any serializable value into a payload.
///
/// # Errors
///
/// Returns [`EventError::Serialize`] if serialization fails (for example a map
/// with non-string keys), or [`EventError::NotAnObject`] if the value does not
/// serialize to a JSON object.
pub fn payload_from<T: Serialize + ?Sized>(value: &T) -> Result<Payload> {
    match serde_json::to_value(value).map_err(|source| EventError::Serialize { source })? {
        Value::Object(map) => Ok(map),
        other => Err(EventError::NotAnObject {
            kind: json_kind(&other),
        }
        .into()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VmtrailError;
    use chrono::TimeZone;
    use serde_json::json;
    use std::collections::HashMap;

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_record_carries_utc_marker() {
        let ts = Utc.timestamp_opt(1_700_000_000, 250_000_000).unwrap();
        let event = Event::new(ts, payload(json!({"a": 1})));

        let record: Value = serde_json::from_slice(&event.encode_record().unwrap()).unwrap();
        assert_eq!(record["a"], 1);
        assert_eq!(record["timestamp"], "2023-11-14T22:13:20.250000Z");
    }

    #[test]
    fn test_record_overwrites_caller_timestamp() {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let event = Event::new(ts, payload(json!({"timestamp": "yesterday", "b": true})));

        let decoded = Event::decode_record(&event.encode_record().unwrap()).unwrap();
        assert_eq!(decoded.timestamp, ts);
        assert_eq!(decoded.payload, payload(json!({"b": true})));
    }

    #[test]
    fn test_decode_rejects_missing_timestamp() {
        let err = Event::decode_record(br#"{"a":1}"#).unwrap_err();
        assert!(matches!(
            err,
            VmtrailError::Event(EventError::InvalidTimestamp { .. })
        ));

        let err = Event::decode_record(br#"{"timestamp":5}"#).unwrap_err();
        assert!(matches!(
            err,
            VmtrailError::Event(EventError::InvalidTimestamp { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = Event::decode_record(b"not json").unwrap_err();
        assert!(matches!(
            err,
            VmtrailError::Event(EventError::CorruptedRecord { .. })
        ));
    }

    #[test]
    fn test_payload_from_struct() {
        #[derive(Serialize)]
        struct Snapshot {
            uuid: String,
            state: u8,
        }

        let p = payload_from(&Snapshot {
            uuid: "vm-1".to_string(),
            state: 1,
        })
        .unwrap();
        assert_eq!(p, payload(json!({"uuid": "vm-1", "state": 1})));
    }

    #[test]
    fn test_payload_from_rejects_non_objects() {
        let err = payload_from(&vec![1, 2, 3]).unwrap_err();
        assert!(matches!(
            err,
            VmtrailError::Event(EventError::NotAnObject { kind: "array" })
        ));
    }

    #[test]
    fn test_payload_from_rejects_unserializable_keys() {
        let mut map = HashMap::new();
        map.insert((1, 2), "tuple keys are not JSON");

        let err = payload_from(&map).unwrap_err();
        assert!(matches!(err, VmtrailError::Event(EventError::Serialize { .. })));
    }
}
