//! Field paths and their resolution rules
//!
//! Two resolution flavours exist:
//!
//! - Expression resolution ([`resolve`]): arrays of documents are mapped one
//!   level (`$a.b` over `a: [{b: 1}, {b: 2}]` is `[1, 2]`), an absent field
//!   is `Value::Missing`.
//! - Query resolution ([`collect`]): every leaf reachable through arrays is
//!   a candidate, numeric segments also index into arrays.
//!
//! Neither flavour ever fails; absence is a value, not an error.

use std::fmt;

use crate::errors::{AggError, AggResult};

use super::document::Document;
use super::types::Value;

/// A parsed dotted field path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    /// Parse a dotted path such as `address.city`
    pub fn parse(path: &str) -> AggResult<Self> {
        if path.is_empty() {
            return Err(AggError::invalid_stage("field path must not be empty"));
        }
        if path.starts_with('$') {
            return Err(AggError::invalid_stage(format!(
                "field path '{}' must not start with '$'",
                path
            )));
        }
        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(AggError::invalid_stage(format!(
                "field path '{}' contains an empty segment",
                path
            )));
        }
        Ok(Self { segments })
    }

    /// Parse a `$`-prefixed field reference such as `$address.city`
    pub fn parse_reference(reference: &str) -> AggResult<Self> {
        match reference.strip_prefix('$') {
            Some(rest) if !rest.starts_with('$') => Self::parse(rest),
            _ => Err(AggError::invalid_stage(format!(
                "'{}' is not a field reference",
                reference
            ))),
        }
    }

    pub fn from_segments(segments: Vec<String>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn first(&self) -> &str {
        self.segments.first().map(String::as_str).unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn dotted(&self) -> String {
        self.segments.join(".")
    }

    /// Whether `self` equals `other` or lies below it
    pub fn starts_with(&self, other: &FieldPath) -> bool {
        self.segments.len() >= other.segments.len()
            && self.segments[..other.segments.len()] == other.segments[..]
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dotted())
    }
}

/// Expression resolution of `path` against `doc`
pub fn resolve(doc: &Document, path: &FieldPath) -> Value {
    match doc.get(path.first()) {
        Some(value) => resolve_value(value, &path.segments[1..]),
        None => Value::Missing,
    }
}

/// Expression resolution of the remaining `segments` below `value`
pub fn resolve_value(value: &Value, segments: &[String]) -> Value {
    if segments.is_empty() {
        return value.clone();
    }
    match value {
        Value::Document(doc) => match doc.get(&segments[0]) {
            Some(child) => resolve_value(child, &segments[1..]),
            None => Value::Missing,
        },
        Value::Array(items) => {
            let mapped: Vec<Value> = items
                .iter()
                .filter(|item| matches!(item, Value::Document(_)))
                .map(|item| resolve_value(item, segments))
                .filter(|v| !v.is_missing())
                .collect();
            Value::Array(mapped)
        }
        _ => Value::Missing,
    }
}

/// Strict lookup that only walks through documents
pub fn lookup<'a>(doc: &'a Document, path: &FieldPath) -> Option<&'a Value> {
    let mut current = doc.get(path.first())?;
    for segment in &path.segments[1..] {
        current = current.as_document()?.get(segment)?;
    }
    Some(current)
}

/// Query resolution: every leaf value reachable through `path`
pub fn collect<'a>(doc: &'a Document, path: &FieldPath) -> Vec<&'a Value> {
    let mut out = Vec::new();
    if let Some(value) = doc.get(path.first()) {
        collect_value(value, &path.segments[1..], &mut out);
    }
    out
}

fn collect_value<'a>(value: &'a Value, segments: &[String], out: &mut Vec<&'a Value>) {
    if segments.is_empty() {
        out.push(value);
        return;
    }
    match value {
        Value::Document(doc) => {
            if let Some(child) = doc.get(&segments[0]) {
                collect_value(child, &segments[1..], out);
            }
        }
        Value::Array(items) => {
            if let Ok(index) = segments[0].parse::<usize>() {
                if let Some(item) = items.get(index) {
                    collect_value(item, &segments[1..], out);
                }
            }
            for item in items {
                if let Value::Document(_) = item {
                    collect_value(item, segments, out);
                }
            }
        }
        _ => {}
    }
}

/// Set `path` in `doc`, creating intermediate documents and replacing
/// non-document intermediates
pub fn set_path(doc: &mut Document, path: &FieldPath, value: Value) {
    set_segments(doc, path.segments(), value);
}

fn set_segments(doc: &mut Document, segments: &[String], value: Value) {
    if segments.len() == 1 {
        doc.insert(segments[0].clone(), value);
        return;
    }
    if value.is_missing() && !doc.contains_key(&segments[0]) {
        return;
    }
    let needs_new = !matches!(doc.get(&segments[0]), Some(Value::Document(_)));
    if needs_new {
        doc.insert(segments[0].clone(), Value::Document(Document::new()));
    }
    if let Some(Value::Document(child)) = doc.get_mut(&segments[0]) {
        set_segments(child, &segments[1..], value);
    }
}

/// Remove `path` from `doc`, walking only through documents
pub fn remove_path(doc: &mut Document, path: &FieldPath) -> Option<Value> {
    let segments = path.segments();
    let mut current = doc;
    for segment in &segments[..segments.len() - 1] {
        current = match current.get_mut(segment) {
            Some(Value::Document(child)) => child,
            _ => return None,
        };
    }
    current.remove(&segments[segments.len() - 1])
}
