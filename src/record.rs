//! Typed record views
//!
//! The store hands back schema-less JSON documents; the sweep never reads
//! arbitrary fields off them. A caller-supplied mapper narrows each document
//! to the two things the sweep cares about: its id and the declared
//! reference field.

use serde_json::Value;
use thiserror::Error;

/// A record narrowed to its id and one declared reference field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordView {
    pub id: String,
    /// Value of the declared reference field; `None` when the field is null
    /// or absent (missing reference, not a broken one)
    pub reference: Option<String>,
}

/// Mapper failure: the document could not be narrowed to a `RecordView`
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("document has no usable 'id' field: {0}")]
    MissingId(String),
}

/// Maps a raw document plus the declared field name to a `RecordView`
pub type RecordMapper = fn(&Value, &str) -> Result<RecordView, RecordError>;

/// Default mapper for JSON documents.
///
/// Ids must be string or integer scalars. Reference values are normalized
/// the same way; any other non-null value is kept in its compact JSON form —
/// it will never match a target id, which classifies the record as an
/// orphan rather than hiding the bad value.
pub fn json_record(doc: &Value, field: &str) -> Result<RecordView, RecordError> {
    let id = doc
        .get("id")
        .and_then(scalar_to_id)
        .ok_or_else(|| RecordError::MissingId(summarize(doc)))?;

    let reference = match doc.get(field) {
        None | Some(Value::Null) => None,
        Some(v) => Some(scalar_to_id(v).unwrap_or_else(|| v.to_string())),
    };

    Ok(RecordView { id, reference })
}

/// Normalize a string or integer scalar to the canonical id form
fn scalar_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn summarize(doc: &Value) -> String {
    let text = doc.to_string();
    if text.chars().count() > 120 {
        let prefix: String = text.chars().take(120).collect();
        format!("{}...", prefix)
    } else {
        text
    }
}
