//! Record extraction: raw blob text to an ordered sequence of records.
//!
//! Detection runs JSON, then JSON-Lines, then CSV; the first format that
//! parses wins and formats are never mixed within one blob.

use serde_json::{Map, Value};
use tracing::debug;

/// A single row of trade data. Objects keep their source field order.
pub type Record = Value;

/// Outcome of format detection, tagged with the format that succeeded.
#[derive(Debug, PartialEq)]
pub enum Extracted {
    Json(Vec<Record>),
    Jsonl(Vec<Record>),
    Csv(Vec<Record>),
    Empty,
}

impl Extracted {
    pub fn format(&self) -> &'static str {
        match self {
            Extracted::Json(_) => "json",
            Extracted::Jsonl(_) => "jsonl",
            Extracted::Csv(_) => "csv",
            Extracted::Empty => "empty",
        }
    }

    pub fn into_records(self) -> Vec<Record> {
        match self {
            Extracted::Json(r) | Extracted::Jsonl(r) | Extracted::Csv(r) => r,
            Extracted::Empty => Vec::new(),
        }
    }
}

pub fn extract(content: &str) -> Extracted {
    if let Some(records) = parse_json(content) {
        return Extracted::Json(records);
    }
    if let Some(records) = parse_jsonl(content) {
        return Extracted::Jsonl(records);
    }
    if let Some(records) = parse_csv(content) {
        return Extracted::Csv(records);
    }
    Extracted::Empty
}

/// Whole-document JSON. An object yields its first array-valued field;
/// an object without one, or a bare scalar, is a single record.
fn parse_json(content: &str) -> Option<Vec<Record>> {
    let value: Value = serde_json::from_str(content).ok()?;
    let records = match value {
        Value::Array(items) => items,
        Value::Object(map) => {
            let list = map.values().find_map(|v| v.as_array()).cloned();
            list.unwrap_or_else(|| vec![Value::Object(map)])
        }
        scalar => vec![scalar],
    };
    Some(records)
}

/// All-or-nothing: one malformed line rejects the whole blob as JSON-Lines.
fn parse_jsonl(content: &str) -> Option<Vec<Record>> {
    let mut records = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(value) => records.push(value),
            Err(e) => {
                debug!(line = lineno + 1, error = %e, "not JSON-Lines");
                return None;
            }
        }
    }
    (!records.is_empty()).then_some(records)
}

fn parse_csv(content: &str) -> Option<Vec<Record>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(content.as_bytes());

    let headers = reader.headers().ok()?.clone();
    if headers.iter().all(str::is_empty) {
        return None;
    }

    let mut records = Vec::new();
    for row in reader.records() {
        let row = match row {
            Ok(r) => r,
            Err(e) => {
                debug!(error = %e, "CSV parse failed");
                return None;
            }
        };
        let record: Map<String, Value> = headers
            .iter()
            .zip(row.iter())
            .map(|(h, cell)| (h.to_string(), Value::String(cell.to_string())))
            .collect();
        records.push(Value::Object(record));
    }
    Some(records)
}

/// Text form of a single value, as matched by scoring and filtering.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// All field values of a record joined by spaces; non-objects use their own text.
pub fn record_text(record: &Record) -> String {
    match record {
        Value::Object(map) => map.values().map(value_text).collect::<Vec<_>>().join(" "),
        other => value_text(other),
    }
}
