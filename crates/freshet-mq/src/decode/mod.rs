//! Payload decoding: broker messages into typed records.
//!
//! A [`RecordDecoder`] turns one raw message into zero or more records
//! matching a fixed schema. Decoders are looked up by format tag in a
//! [`DecoderRegistry`]; the built-in tags are `json`, `xml` and
//! `keyvalue`, and hosts can register their own factories alongside them.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::broker::{Payload, RawMessage};
use crate::error::DecodeError;
use crate::record::{FieldType, Record, StreamField, StreamSchema, Value};

mod json;
mod keyvalue;
mod xml;

pub use json::JsonDecoder;
pub use keyvalue::KeyValueDecoder;
pub use xml::XmlDecoder;

// ── Decoder trait ─────────────────────────────────────────────────────────

/// Turns raw broker messages into schema-typed records.
///
/// Decoders are stateless with respect to messages: the schema is fixed at
/// construction and every call decodes one message in isolation.
pub trait RecordDecoder: Send + Sync {
    /// Format tag this decoder handles, e.g. `"json"`.
    fn format_name(&self) -> &str;

    /// Schema the produced records conform to.
    fn schema(&self) -> &StreamSchema;

    /// Decodes one message into records.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] when the payload cannot be parsed, a
    /// schema field is absent, or a value cannot be coerced to its field
    /// type. The message as a whole fails; partial records are never
    /// returned.
    fn decode(&self, message: &RawMessage) -> Result<Vec<Record>, DecodeError>;
}

impl fmt::Debug for dyn RecordDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn RecordDecoder")
    }
}

// Compile-time check that decoders can live behind `Box<dyn RecordDecoder>`.
const _: () = {
    fn _assert_decoder_object_safe(_: &dyn RecordDecoder) {}
};

/// Builds a decoder for a schema. Registered per format tag.
pub type DecoderFactory =
    Arc<dyn Fn(Arc<StreamSchema>) -> Result<Box<dyn RecordDecoder>, DecodeError> + Send + Sync>;

// ── Registry ──────────────────────────────────────────────────────────────

/// Maps format tags to decoder factories.
#[derive(Default)]
pub struct DecoderRegistry {
    factories: RwLock<HashMap<String, DecoderFactory>>,
}

impl DecoderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in `json`, `xml` and `keyvalue`
    /// decoders registered.
    #[must_use]
    pub fn with_builtins() -> Self {
        let registry = Self::new();

        let json: DecoderFactory =
            Arc::new(|schema| Ok(Box::new(JsonDecoder::new(schema)) as Box<dyn RecordDecoder>));
        let xml: DecoderFactory =
            Arc::new(|schema| Ok(Box::new(XmlDecoder::new(schema)) as Box<dyn RecordDecoder>));
        let keyvalue: DecoderFactory =
            Arc::new(|schema| Ok(Box::new(KeyValueDecoder::new(schema)) as Box<dyn RecordDecoder>));

        registry.register("json", json);
        registry.register("xml", xml);
        registry.register("keyvalue", keyvalue);
        registry
    }

    /// Registers a factory under a format tag, replacing any previous one.
    pub fn register(&self, format: impl Into<String>, factory: DecoderFactory) {
        self.factories.write().insert(format.into(), factory);
    }

    /// Builds a decoder for the given format tag and schema.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::UnknownFormat`] when no factory is registered
    /// under the tag, or the factory's own error when construction fails.
    pub fn instantiate(
        &self,
        format: &str,
        schema: Arc<StreamSchema>,
    ) -> Result<Box<dyn RecordDecoder>, DecodeError> {
        let factory = self
            .factories
            .read()
            .get(format)
            .cloned()
            .ok_or_else(|| DecodeError::UnknownFormat(format.to_string()))?;
        factory(schema)
    }

    /// Returns the registered format tags, unordered.
    #[must_use]
    pub fn formats(&self) -> Vec<String> {
        self.factories.read().keys().cloned().collect()
    }
}

impl fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderRegistry")
            .field("formats", &self.formats())
            .finish()
    }
}

// ── Shared helpers ────────────────────────────────────────────────────────

/// Borrows the payload as text, rejecting payload kinds a text decoder
/// cannot handle.
pub(crate) fn payload_text<'a>(
    format: &str,
    message: &'a RawMessage,
) -> Result<Cow<'a, str>, DecodeError> {
    match &message.payload {
        Payload::Text(text) => Ok(Cow::Borrowed(text.as_str())),
        Payload::Bytes(bytes) => std::str::from_utf8(bytes).map(Cow::Borrowed).map_err(|e| {
            DecodeError::Malformed {
                format: format.to_string(),
                reason: format!("payload is not valid utf-8: {e}"),
            }
        }),
        Payload::Map(_) => Err(DecodeError::UnsupportedPayload {
            format: format.to_string(),
            kind: message.payload.kind(),
        }),
    }
}

/// Parses a textual value into the field's type.
pub(crate) fn parse_scalar(field: &StreamField, raw: &str) -> Result<Value, DecodeError> {
    let mismatch = || DecodeError::TypeMismatch {
        field: field.name().to_string(),
        expected: field.field_type(),
        value: raw.to_string(),
    };
    match field.field_type() {
        FieldType::String => Ok(Value::String(raw.to_string())),
        FieldType::Int => raw.trim().parse::<i64>().map(Value::Int).map_err(|_| mismatch()),
        FieldType::Float => raw
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| mismatch()),
        FieldType::Bool => match raw.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(mismatch()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person_schema() -> Arc<StreamSchema> {
        Arc::new(StreamSchema::new(vec![
            StreamField::new("name", FieldType::String),
            StreamField::new("age", FieldType::Int),
            StreamField::new("country", FieldType::String),
        ]))
    }

    #[test]
    fn test_builtins_are_registered() {
        let registry = DecoderRegistry::with_builtins();
        let mut formats = registry.formats();
        formats.sort();
        assert_eq!(formats, ["json", "keyvalue", "xml"]);
    }

    #[test]
    fn test_instantiate_unknown_format() {
        let registry = DecoderRegistry::with_builtins();
        let err = registry.instantiate("avro", person_schema()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "no decoder registered for format 'avro'"
        );
    }

    #[test]
    fn test_custom_factory_overrides_builtin() {
        let registry = DecoderRegistry::with_builtins();
        let custom: DecoderFactory =
            Arc::new(|schema| Ok(Box::new(KeyValueDecoder::new(schema)) as Box<dyn RecordDecoder>));
        registry.register("json", custom);
        let decoder = registry.instantiate("json", person_schema()).unwrap();
        assert_eq!(decoder.format_name(), "keyvalue");
    }

    #[test]
    fn test_parse_scalar_coercions() {
        let age = StreamField::new("age", FieldType::Int);
        assert_eq!(parse_scalar(&age, " 24 ").unwrap(), Value::Int(24));
        assert!(parse_scalar(&age, "young").is_err());

        let ok = StreamField::new("ok", FieldType::Bool);
        assert_eq!(parse_scalar(&ok, "TRUE").unwrap(), Value::Bool(true));

        let score = StreamField::new("score", FieldType::Float);
        assert_eq!(parse_scalar(&score, "1.5").unwrap(), Value::Float(1.5));
    }

    #[test]
    fn test_payload_text_rejects_map() {
        let message = RawMessage {
            message_id: "m-1".to_string(),
            destination: "orders".to_string(),
            payload: Payload::Map(vec![("name".to_string(), Value::String("John".into()))]),
            timestamp_ms: 0,
        };
        let err = payload_text("json", &message).unwrap_err();
        assert_eq!(
            err.to_string(),
            "map payloads are not supported by the json decoder"
        );
    }
}
