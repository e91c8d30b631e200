//! Stream schema and record types shared by decoders and sinks.
//!
//! A source declares a [`StreamSchema`] once; every decoder is bound to that
//! schema at construction and produces [`Record`]s whose values are ordered
//! to match it. Records are the unit of emission into the downstream sink.

use std::fmt;
use std::sync::Arc;

// ── Field types ────────────────────────────────────────────────────

/// The logical type of a single stream field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// UTF-8 text.
    String,
    /// 64-bit signed integer.
    Int,
    /// 64-bit floating point.
    Float,
    /// Boolean.
    Bool,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Int => write!(f, "int"),
            Self::Float => write!(f, "float"),
            Self::Bool => write!(f, "bool"),
        }
    }
}

/// A named, typed field in a stream schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamField {
    name: String,
    field_type: FieldType,
}

impl StreamField {
    /// Creates a new field.
    #[must_use]
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }

    /// Returns the field name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the field type.
    #[must_use]
    pub fn field_type(&self) -> FieldType {
        self.field_type
    }
}

// ── Schema ─────────────────────────────────────────────────────────

/// The declared schema of a stream: an ordered list of named fields.
///
/// Frozen at source construction; decoders hold an `Arc<StreamSchema>` and
/// order record values to match it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSchema {
    fields: Vec<StreamField>,
}

impl StreamSchema {
    /// Creates a schema from an ordered field list.
    #[must_use]
    pub fn new(fields: Vec<StreamField>) -> Self {
        Self { fields }
    }

    /// Returns the fields in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[StreamField] {
        &self.fields
    }

    /// Returns the positional index of a field by name.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name() == name)
    }

    /// Returns the number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if the schema declares no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

// ── Values ─────────────────────────────────────────────────────────

/// A single typed field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// UTF-8 text.
    String(String),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit floating point.
    Float(f64),
    /// Boolean.
    Bool(bool),
    /// Absent value.
    Null,
}

impl Value {
    /// Returns the string content if this is a [`Value::String`].
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer content if this is a [`Value::Int`].
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns a short name for the value's runtime type, for diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Bool(_) => "bool",
            Self::Null => "null",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Null => write!(f, "null"),
        }
    }
}

// ── Records ────────────────────────────────────────────────────────

/// A decoded record: values ordered to match the stream schema.
///
/// Produced by a decoder, handed to the emission sink, and never retained
/// by the connector afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    schema: Arc<StreamSchema>,
    values: Vec<Value>,
}

impl Record {
    /// Creates a record over `schema` with values in declaration order.
    #[must_use]
    pub fn new(schema: Arc<StreamSchema>, values: Vec<Value>) -> Self {
        debug_assert_eq!(schema.len(), values.len());
        Self { schema, values }
    }

    /// Returns the schema this record conforms to.
    #[must_use]
    pub fn schema(&self) -> &Arc<StreamSchema> {
        &self.schema
    }

    /// Returns the values in schema order.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Looks up a value by field name.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.schema.index_of(name).and_then(|i| self.values.get(i))
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
    fn test_schema_index_of() {
        let schema = person_schema();
        assert_eq!(schema.index_of("name"), Some(0));
        assert_eq!(schema.index_of("age"), Some(1));
        assert_eq!(schema.index_of("missing"), None);
        assert_eq!(schema.len(), 3);
        assert!(!schema.is_empty());
    }

    #[test]
    fn test_field_type_display() {
        assert_eq!(FieldType::String.to_string(), "string");
        assert_eq!(FieldType::Int.to_string(), "int");
        assert_eq!(FieldType::Float.to_string(), "float");
        assert_eq!(FieldType::Bool.to_string(), "bool");
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::String("John".into()).as_str(), Some("John"));
        assert_eq!(Value::Int(22).as_int(), Some(22));
        assert_eq!(Value::Int(22).as_str(), None);
        assert_eq!(Value::Null.type_name(), "null");
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::String("US".into()).to_string(), "US");
        assert_eq!(Value::Int(24).to_string(), "24");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::Null.to_string(), "null");
    }

    #[test]
    fn test_record_lookup_by_name() {
        let record = Record::new(
            person_schema(),
            vec![
                Value::String("John".into()),
                Value::Int(22),
                Value::String("US".into()),
            ],
        );
        assert_eq!(record.value("name"), Some(&Value::String("John".into())));
        assert_eq!(record.value("age"), Some(&Value::Int(22)));
        assert_eq!(record.value("missing"), None);
        assert_eq!(record.values().len(), 3);
    }
}
