//! Key/value payload decoder.
//!
//! The natural decoder for map-bodied broker messages: fields are matched
//! by name and coerced to the schema's types. Text and byte payloads are
//! accepted too, parsed as one `key: value` pair per line.

use std::collections::HashMap;
use std::sync::Arc;

use crate::broker::{Payload, RawMessage};
use crate::error::DecodeError;
use crate::record::{FieldType, Record, StreamField, StreamSchema, Value};

use super::{parse_scalar, payload_text, RecordDecoder};

/// Decoder for the `keyvalue` format tag.
#[derive(Debug)]
pub struct KeyValueDecoder {
    schema: Arc<StreamSchema>,
}

impl KeyValueDecoder {
    /// Creates a decoder producing records of the given schema.
    #[must_use]
    pub fn new(schema: Arc<StreamSchema>) -> Self {
        Self { schema }
    }

    fn decode_map(&self, pairs: &[(String, Value)]) -> Result<Record, DecodeError> {
        let mut by_name: HashMap<&str, &Value> = HashMap::with_capacity(pairs.len());
        for (key, value) in pairs {
            by_name.insert(key.as_str(), value);
        }

        let mut values = Vec::with_capacity(self.schema.len());
        for field in self.schema.fields() {
            let value = by_name
                .get(field.name())
                .ok_or_else(|| DecodeError::MissingField(field.name().to_string()))?;
            values.push(coerce_value(field, value)?);
        }
        Ok(Record::new(Arc::clone(&self.schema), values))
    }

    fn decode_text(&self, text: &str) -> Result<Record, DecodeError> {
        let mut pairs: HashMap<String, String> = HashMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                return Err(DecodeError::Malformed {
                    format: "keyvalue".to_string(),
                    reason: format!("line '{line}' has no key separator"),
                });
            };
            pairs.insert(key.trim().to_string(), value.trim().to_string());
        }

        let mut values = Vec::with_capacity(self.schema.len());
        for field in self.schema.fields() {
            let raw = pairs
                .get(field.name())
                .ok_or_else(|| DecodeError::MissingField(field.name().to_string()))?;
            values.push(parse_scalar(field, raw)?);
        }
        Ok(Record::new(Arc::clone(&self.schema), values))
    }
}

impl RecordDecoder for KeyValueDecoder {
    fn format_name(&self) -> &str {
        "keyvalue"
    }

    fn schema(&self) -> &StreamSchema {
        &self.schema
    }

    fn decode(&self, message: &RawMessage) -> Result<Vec<Record>, DecodeError> {
        let record = match &message.payload {
            Payload::Map(pairs) => self.decode_map(pairs)?,
            Payload::Text(_) | Payload::Bytes(_) => {
                let text = payload_text("keyvalue", message)?;
                self.decode_text(&text)?
            }
        };
        Ok(vec![record])
    }
}

#[allow(clippy::cast_precision_loss)]
fn coerce_value(field: &StreamField, value: &Value) -> Result<Value, DecodeError> {
    let mismatch = || DecodeError::TypeMismatch {
        field: field.name().to_string(),
        expected: field.field_type(),
        value: value.to_string(),
    };
    match (field.field_type(), value) {
        (_, Value::Null) => Ok(Value::Null),
        (FieldType::String, Value::String(_))
        | (FieldType::Int, Value::Int(_))
        | (FieldType::Float, Value::Float(_))
        | (FieldType::Bool, Value::Bool(_)) => Ok(value.clone()),
        (FieldType::String, Value::Int(_) | Value::Float(_) | Value::Bool(_)) => {
            Ok(Value::String(value.to_string()))
        }
        (FieldType::Float, Value::Int(i)) => Ok(Value::Float(*i as f64)),
        (FieldType::Int | FieldType::Float | FieldType::Bool, Value::String(s)) => {
            parse_scalar(field, s)
        }
        _ => Err(mismatch()),
    }
}
