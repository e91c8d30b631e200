//! JSON payload decoder.
//!
//! Accepts a single object, an array of objects, or either wrapped in an
//! `{"event": {...}}` envelope. Scalar values are coerced leniently:
//! numeric strings parse into numeric fields, numbers and booleans render
//! into string fields.

use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::broker::RawMessage;
use crate::error::DecodeError;
use crate::record::{FieldType, Record, StreamField, StreamSchema, Value};

use super::{payload_text, RecordDecoder};

/// Decoder for the `json` format tag.
#[derive(Debug)]
pub struct JsonDecoder {
    schema: Arc<StreamSchema>,
}

impl JsonDecoder {
    /// Creates a decoder producing records of the given schema.
    #[must_use]
    pub fn new(schema: Arc<StreamSchema>) -> Self {
        Self { schema }
    }

    fn malformed(reason: impl Into<String>) -> DecodeError {
        DecodeError::Malformed {
            format: "json".to_string(),
            reason: reason.into(),
        }
    }

    fn record_from_object(&self, object: &JsonValue) -> Result<Record, DecodeError> {
        let object = unwrap_event(object);
        let JsonValue::Object(map) = object else {
            return Err(Self::malformed(format!(
                "expected a json object, got {object}"
            )));
        };

        let mut values = Vec::with_capacity(self.schema.len());
        for field in self.schema.fields() {
            let value = map
                .get(field.name())
                .ok_or_else(|| DecodeError::MissingField(field.name().to_string()))?;
            values.push(coerce(field, value)?);
        }
        Ok(Record::new(Arc::clone(&self.schema), values))
    }
}

impl RecordDecoder for JsonDecoder {
    fn format_name(&self) -> &str {
        "json"
    }

    fn schema(&self) -> &StreamSchema {
        &self.schema
    }

    fn decode(&self, message: &RawMessage) -> Result<Vec<Record>, DecodeError> {
        let text = payload_text("json", message)?;
        let parsed: JsonValue =
            serde_json::from_str(&text).map_err(|e| Self::malformed(e.to_string()))?;

        match &parsed {
            JsonValue::Array(items) => items
                .iter()
                .map(|item| self.record_from_object(item))
                .collect(),
            JsonValue::Object(_) => Ok(vec![self.record_from_object(&parsed)?]),
            other => Err(Self::malformed(format!(
                "expected a json object or array of objects, got {other}"
            ))),
        }
    }
}

/// Unwraps the `{"event": {...}}` envelope, if present.
fn unwrap_event(value: &JsonValue) -> &JsonValue {
    if let JsonValue::Object(map) = value {
        if map.len() == 1 {
            if let Some(inner @ JsonValue::Object(_)) = map.get("event") {
                return inner;
            }
        }
    }
    value
}

fn coerce(field: &StreamField, value: &JsonValue) -> Result<Value, DecodeError> {
    let mismatch = || DecodeError::TypeMismatch {
        field: field.name().to_string(),
        expected: field.field_type(),
        value: value.to_string(),
    };
    if value.is_null() {
        return Ok(Value::Null);
    }
    match field.field_type() {
        FieldType::String => match value {
            JsonValue::String(s) => Ok(Value::String(s.clone())),
            JsonValue::Number(n) => Ok(Value::String(n.to_string())),
            JsonValue::Bool(b) => Ok(Value::String(b.to_string())),
            _ => Err(mismatch()),
        },
        FieldType::Int => value
            .as_i64()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
            .map(Value::Int)
            .ok_or_else(mismatch),
        FieldType::Float => value
            .as_f64()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
            .map(Value::Float)
            .ok_or_else(mismatch),
        FieldType::Bool => match value {
            JsonValue::Bool(b) => Ok(Value::Bool(*b)),
            JsonValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(mismatch()),
            },
            _ => Err(mismatch()),
        },
    }
}
