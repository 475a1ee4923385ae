use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};

use crate::error::EventError;

/// Raw message as delivered by the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Bus-assigned id, used for acknowledgement.
    pub id: String,
    pub topic: String,
    pub payload: Vec<u8>,
    pub headers: HashMap<String, String>,
}

/// Decoded message: a JSON object payload plus headers.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: String,
    pub topic: String,
    pub payload: Map<String, Value>,
    pub headers: HashMap<String, String>,
}

impl Event {
    pub fn decode(message: &Message) -> Result<Self, EventError> {
        let text = std::str::from_utf8(&message.payload)
            .map_err(|e| EventError::Decode(format!("payload is not UTF-8: {e}")))?;
        let value: Value = serde_json::from_str(text)
            .map_err(|e| EventError::Decode(format!("payload is not JSON: {e}")))?;
        let Value::Object(payload) = value else {
            return Err(EventError::Decode(
                "payload is not a JSON object".to_string(),
            ));
        };

        Ok(Self {
            id: message.id.clone(),
            topic: message.topic.clone(),
            payload,
            headers: message.headers.clone(),
        })
    }

    pub fn field(&self, name: &str) -> Result<&Value, EventError> {
        match self.payload.get(name) {
            Some(Value::Null) | None => Err(EventError::Payload(format!(
                "missing field `{name}`"
            ))),
            Some(value) => Ok(value),
        }
    }

    pub fn str_field(&self, name: &str) -> Result<&str, EventError> {
        self.field(name)?
            .as_str()
            .ok_or_else(|| EventError::Payload(format!("field `{name}` must be a string")))
    }

    pub fn f64_field(&self, name: &str) -> Result<f64, EventError> {
        let value = self
            .field(name)?
            .as_f64()
            .ok_or_else(|| EventError::Payload(format!("field `{name}` must be a number")))?;
        if !value.is_finite() {
            return Err(EventError::Payload(format!("field `{name}` must be finite")));
        }
        Ok(value)
    }

    /// A finite number that is zero or positive.
    pub fn non_negative_field(&self, name: &str) -> Result<f64, EventError> {
        let value = self.f64_field(name)?;
        if value < 0.0 {
            return Err(EventError::Payload(format!(
                "field `{name}` must not be negative: {value}"
            )));
        }
        Ok(value)
    }

    /// A quantity given either as a whole number or as the array it counts.
    pub fn count_field(&self, name: &str) -> Result<f64, EventError> {
        match self.field(name)? {
            Value::Array(items) => Ok(items.len() as f64),
            Value::Number(_) => {
                let value = self.non_negative_field(name)?;
                if value.fract() != 0.0 {
                    return Err(EventError::Payload(format!(
                        "field `{name}` must be a whole number: {value}"
                    )));
                }
                Ok(value)
            }
            _ => Err(EventError::Payload(format!(
                "field `{name}` must be a number or an array"
            ))),
        }
    }

    pub fn timestamp_field(&self, name: &str) -> Result<NaiveDateTime, EventError> {
        let raw = self.str_field(name)?;
        parse_timestamp(raw).ok_or_else(|| {
            EventError::Payload(format!("field `{name}` is not an ISO-8601 timestamp: {raw}"))
        })
    }
}

/// Parse an ISO-8601 date or date-time. Offsets are accepted but the
/// wall-clock fields are kept as written.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"] {
        if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
            return Some(dt.naive_local());
        }
    }
    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}
