//! Model response parsing.
//!
//! Vision models wrap JSON in markdown fences, prepend prose, and stop mid-object
//! when they hit their output cap. [`JsonResponseParser`] recovers what it can
//! and returns a typed [`ParseFailure`] otherwise; it never panics.

use serde_json::{Map, Value};
use std::collections::BTreeSet;
use thiserror::Error;

use crate::types::{Cell, DocumentMetadata, Entity, MetadataField, Table};

/// How many truncation cut points are tried before giving up.
const MAX_REPAIR_ATTEMPTS: usize = 64;

/// Structured content extracted from one response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkPayload {
    /// Extracted tables.
    pub tables: Vec<Table>,
    /// Document metadata seen in these pages.
    pub document_metadata: DocumentMetadata,
    /// Groups and companies named in these pages.
    pub groups_and_companies: Vec<Entity>,
}

/// Why a response could not be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseFailure {
    /// No `{` anywhere in the text.
    #[error("response contained no JSON object")]
    NoJson,
    /// JSON present but unrecoverable.
    #[error("invalid JSON: {0}")]
    Invalid(String),
}

/// Turns response text into a [`ChunkPayload`].
pub trait ResponseParser: Send + Sync {
    /// Parses one response.
    fn parse(&self, text: &str) -> Result<ChunkPayload, ParseFailure>;
}

/// Default parser for the JSON shape the built-in prompts request.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonResponseParser;

impl ResponseParser for JsonResponseParser {
    fn parse(&self, text: &str) -> Result<ChunkPayload, ParseFailure> {
        let value = parse_lenient(text)?;
        let Value::Object(root) = value else {
            return Err(ParseFailure::Invalid("expected a JSON object".to_string()));
        };
        Ok(payload_from_object(&root))
    }
}

/// Parses JSON out of arbitrary model text, repairing a truncated tail if needed.
pub fn parse_lenient(text: &str) -> Result<Value, ParseFailure> {
    let body = strip_fences(text);
    let start = body.find('{').ok_or(ParseFailure::NoJson)?;
    let candidate = &body[start..];

    // Trailing prose after the closing brace.
    if let Some(end) = candidate.rfind('}') {
        if let Ok(v) = serde_json::from_str::<Value>(&candidate[..=end]) {
            return Ok(v);
        }
    }

    let first_error = match serde_json::from_str::<Value>(candidate) {
        Ok(v) => return Ok(v),
        Err(e) => e.to_string(),
    };

    repair_truncated(candidate).ok_or(ParseFailure::Invalid(first_error))
}

/// Returns the body of the first fenced block, or the text itself.
fn strip_fences(text: &str) -> &str {
    let Some(open) = text.find("```") else {
        return text;
    };
    let after = &text[open + 3..];
    // Skip the language tag line.
    let body = after.find('\n').map_or(after, |nl| &after[nl + 1..]);
    body.find("```").map_or(body, |close| &body[..close])
}

/// Walks the text tracking open brackets, then retries the parse at the last
/// complete values with the missing closers appended.
fn repair_truncated(text: &str) -> Option<Value> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut cuts: Vec<(usize, String)> = Vec::new();

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                stack.pop();
                cuts.push((i + 1, closers(&stack)));
            }
            // Inside an object a comma follows a complete key/value pair; inside
            // an array it may follow half a row, so arrays only cut at `]`.
            ',' if stack.last() == Some(&'}') => cuts.push((i, closers(&stack))),
            _ => {}
        }
    }

    cuts.iter()
        .rev()
        .take(MAX_REPAIR_ATTEMPTS)
        .find_map(|(at, close)| {
            let mut repaired = String::with_capacity(at + close.len());
            repaired.push_str(&text[..*at]);
            repaired.push_str(close);
            serde_json::from_str::<Value>(&repaired).ok()
        })
}

fn closers(stack: &[char]) -> String {
    stack.iter().rev().collect()
}

fn payload_from_object(root: &Map<String, Value>) -> ChunkPayload {
    let tables = root
        .get("tables")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(table_from_value).collect())
        .unwrap_or_default();

    let document_metadata = root
        .get("document_metadata")
        .or_else(|| root.get("metadata"))
        .and_then(Value::as_object)
        .map(metadata_from_object)
        .unwrap_or_default();

    let groups_and_companies = root
        .get("groups_and_companies")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(entity_from_value).collect())
        .unwrap_or_default();

    ChunkPayload {
        tables,
        document_metadata,
        groups_and_companies,
    }
}

fn cell_text(value: &Value) -> Cell {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

fn table_from_value(value: &Value) -> Option<Table> {
    let obj = value.as_object()?;
    let headers: Vec<String> = obj
        .get("headers")
        .and_then(Value::as_array)?
        .iter()
        .map(|h| cell_text(h).unwrap_or_default())
        .collect();

    let rows: Vec<Vec<Cell>> = obj
        .get("rows")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(Value::as_array)
                .map(|row| row.iter().map(cell_text).collect())
                .collect()
        })
        .unwrap_or_default();

    let summary_row_indices: BTreeSet<usize> = obj
        .get("summary_rows")
        .or_else(|| obj.get("summary_row_indices"))
        .and_then(Value::as_array)
        .map(|idx| {
            idx.iter()
                .filter_map(Value::as_u64)
                .map(|i| i as usize)
                .filter(|i| *i < rows.len())
                .collect()
        })
        .unwrap_or_default();

    let name = obj
        .get("name")
        .or_else(|| obj.get("table_name"))
        .and_then(Value::as_str)
        .map(str::to_string);

    Some(Table {
        name,
        headers,
        rows,
        summary_row_indices,
    })
}

/// Accepts `{"field": {"value": .., "confidence": ..}}` as well as the flat
/// `{"carrier_name": .., "carrier_confidence": ..}` layout.
fn metadata_from_object(obj: &Map<String, Value>) -> DocumentMetadata {
    let mut metadata = DocumentMetadata::default();
    for (key, value) in obj {
        if key.ends_with("_confidence") {
            continue;
        }
        let (text, inline_confidence) = match value {
            Value::Object(inner) => (
                inner.get("value").and_then(cell_text),
                inner.get("confidence").and_then(Value::as_f64),
            ),
            other => (cell_text(other), None),
        };
        let Some(text) = text else { continue };
        let confidence = inline_confidence.or_else(|| flat_confidence(obj, key));
        metadata.insert(
            key.clone(),
            MetadataField {
                value: text,
                confidence,
            },
        );
    }
    metadata
}

fn flat_confidence(obj: &Map<String, Value>, key: &str) -> Option<f64> {
    let exact = format!("{key}_confidence");
    if let Some(c) = obj.get(&exact).and_then(Value::as_f64) {
        return Some(c);
    }
    // carrier_name -> carrier_confidence, statement_date -> date_confidence
    key.split('_')
        .filter(|part| !part.is_empty())
        .find_map(|part| obj.get(&format!("{part}_confidence")).and_then(Value::as_f64))
}

fn entity_from_value(value: &Value) -> Option<Entity> {
    match value {
        Value::String(name) if !name.trim().is_empty() => Some(Entity::named(name.clone())),
        Value::Object(obj) => {
            let name_key = ["name", "group_name", "company_name"]
                .into_iter()
                .find(|k| obj.get(*k).and_then(Value::as_str).is_some_and(|s| !s.trim().is_empty()))?;
            let name = obj.get(name_key).and_then(Value::as_str)?.to_string();
            let attributes = obj
                .iter()
                .filter(|(k, _)| k.as_str() != name_key)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            Some(Entity { name, attributes })
        }
        _ => None,
    }
}
