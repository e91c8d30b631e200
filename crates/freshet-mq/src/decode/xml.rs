//! XML payload decoder.
//!
//! Accepts an `<events>` element wrapping one or more `<event>` elements,
//! or a bare `<event>` root. Each child element of an event is one field;
//! element text is coerced to the schema's field type. A payload with no
//! event element at all is malformed.

use std::collections::HashMap;
use std::sync::Arc;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::broker::RawMessage;
use crate::error::DecodeError;
use crate::record::{Record, StreamSchema};

use super::{parse_scalar, payload_text, RecordDecoder};

/// Decoder for the `xml` format tag.
#[derive(Debug)]
pub struct XmlDecoder {
    schema: Arc<StreamSchema>,
}

impl XmlDecoder {
    /// Creates a decoder producing records of the given schema.
    #[must_use]
    pub fn new(schema: Arc<StreamSchema>) -> Self {
        Self { schema }
    }
}

fn malformed(reason: impl Into<String>) -> DecodeError {
    DecodeError::Malformed {
        format: "xml".to_string(),
        reason: reason.into(),
    }
}

fn name_of(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Streams the payload into one field map per `<event>` element.
fn parse_events(text: &str) -> Result<Vec<HashMap<String, String>>, DecodeError> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut events = Vec::new();
    let mut current: Option<HashMap<String, String>> = None;
    let mut field: Option<String> = None;
    let mut text_buf = String::new();
    let mut saw_wrapper = false;

    loop {
        match reader.read_event() {
            Err(e) => return Err(malformed(e.to_string())),
            Ok(Event::Eof) => break,
            Ok(Event::Start(start)) => {
                let name = name_of(start.local_name().as_ref());
                match (&current, &field) {
                    (None, _) if name == "events" && !saw_wrapper => saw_wrapper = true,
                    (None, _) if name == "event" => current = Some(HashMap::new()),
                    (None, _) => return Err(malformed(format!("unexpected element '{name}'"))),
                    (Some(_), None) => {
                        field = Some(name);
                        text_buf.clear();
                    }
                    (Some(_), Some(open)) => {
                        return Err(malformed(format!(
                            "nested element '{name}' inside '{open}'"
                        )))
                    }
                }
            }
            Ok(Event::Empty(empty)) => {
                let name = name_of(empty.local_name().as_ref());
                match (&mut current, &field) {
                    (Some(map), None) => {
                        map.insert(name, String::new());
                    }
                    _ => return Err(malformed(format!("unexpected element '{name}'"))),
                }
            }
            Ok(Event::Text(t)) => {
                if field.is_some() {
                    let unescaped = t.unescape().map_err(|e| malformed(e.to_string()))?;
                    text_buf.push_str(&unescaped);
                }
            }
            Ok(Event::CData(data)) => {
                if field.is_some() {
                    text_buf.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Ok(Event::End(end)) => {
                let name = name_of(end.local_name().as_ref());
                if let Some(open) = field.take() {
                    if open != name {
                        return Err(malformed(format!("mismatched closing tag '</{name}>'")));
                    }
                    if let Some(map) = &mut current {
                        map.insert(open, std::mem::take(&mut text_buf));
                    }
                } else if name == "event" {
                    match current.take() {
                        Some(map) => events.push(map),
                        None => {
                            return Err(malformed("closing '</event>' without opening".to_string()))
                        }
                    }
                }
            }
            Ok(_) => {}
        }
    }

    if current.is_some() || field.is_some() {
        return Err(malformed("truncated payload".to_string()));
    }
    if events.is_empty() {
        return Err(malformed("no event elements in payload".to_string()));
    }
    Ok(events)
}

impl RecordDecoder for XmlDecoder {
    fn format_name(&self) -> &str {
        "xml"
    }

    fn schema(&self) -> &StreamSchema {
        &self.schema
    }

    fn decode(&self, message: &RawMessage) -> Result<Vec<Record>, DecodeError> {
        let text = payload_text("xml", message)?;
        parse_events(&text)?
            .into_iter()
            .map(|map| {
                let mut values = Vec::with_capacity(self.schema.len());
                for field in self.schema.fields() {
                    let raw = map
                        .get(field.name())
                        .ok_or_else(|| DecodeError::MissingField(field.name().to_string()))?;
                    values.push(parse_scalar(field, raw)?);
                }
                Ok(Record::new(Arc::clone(&self.schema), values))
            })
            .collect()
    }
}
