//! JSON documents and the parser that produces them.

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use ingest::{ParseError, Parser, ReadyFile, Record};
use serde::Serialize;
use serde_json::{Map, Value};

/// Keys owned by the ingestor; stripped from incoming documents
const RECEIVED_TIME_KEY: &str = "receivedTime";
const SOURCE_KEY: &str = "source";

/// A flat JSON object ready to be indexed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
  #[serde(flatten)]
  pub fields: Map<String, Value>,
  /// Time the source file was received
  #[serde(rename = "receivedTime", skip_serializing_if = "Option::is_none")]
  pub received_time: Option<DateTime<Utc>>,
  /// Path of the source file relative to the watch root
  pub source: String,
}

impl Record for Document {
  fn set_received_time(&mut self, received: DateTime<Utc>) {
    self.received_time = Some(received);
  }
}

/// Parses each file as one JSON object.
///
/// Content skipped by the watcher is read from disk here. A body that is not a
/// JSON object is malformed; an empty object is ignorable.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonParser;

impl Parser for JsonParser {
  type Record = Document;

  fn parse(&self, file: &ReadyFile) -> Result<Document, ParseError> {
    let bytes: Cow<'_, [u8]> = if file.bytes.is_empty() {
      Cow::Owned(std::fs::read(&file.path)?)
    } else {
      Cow::Borrowed(&file.bytes)
    };

    let value: Value = serde_json::from_slice(&bytes).map_err(|e| ParseError::Malformed(e.to_string()))?;
    let mut fields = match value {
      Value::Object(fields) => fields,
      other => {
        return Err(ParseError::Malformed(format!(
          "expected a JSON object, found {}",
          kind_of(&other)
        )));
      }
    };

    fields.remove(RECEIVED_TIME_KEY);
    fields.remove(SOURCE_KEY);
    if fields.is_empty() {
      return Err(ParseError::Ignorable("document has no fields".to_string()));
    }

    Ok(Document {
      fields,
      received_time: None,
      source: file.relative.to_string_lossy().into_owned(),
    })
  }
}

fn kind_of(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "a boolean",
    Value::Number(_) => "a number",
    Value::String(_) => "a string",
    Value::Array(_) => "an array",
    Value::Object(_) => "an object",
  }
}
