//! `$unwind`
//!
//! An array of N elements yields N rows, each a copy of the input with the
//! field replaced by one element. A scalar behaves like a one element
//! array. Missing, null and empty arrays yield nothing unless
//! `preserveNullAndEmptyArrays` is set, in which case one row with the
//! field set to null is emitted.

use std::collections::VecDeque;

use crate::errors::{AggError, AggResult};
use crate::value::path::{lookup, set_path};
use crate::value::{Document, FieldPath, Value};

use super::{BoxedStream, ExecContext, Row, RowStream};

#[derive(Debug, Clone, PartialEq)]
pub struct UnwindSpec {
    pub path: FieldPath,
    pub preserve_null_and_empty: bool,
    pub include_array_index: Option<FieldPath>,
}

impl UnwindSpec {
    /// Parse `"$path"` or `{path, preserveNullAndEmptyArrays, includeArrayIndex}`
    pub fn parse(value: &Value) -> AggResult<Self> {
        match value {
            Value::String(reference) => Ok(Self {
                path: parse_reference(reference)?,
                preserve_null_and_empty: false,
                include_array_index: None,
            }),
            Value::Document(doc) => Self::parse_document(doc),
            other => Err(AggError::invalid_stage(format!(
                "$unwind expects a field path or an object, got {}",
                other
            ))),
        }
    }

    fn parse_document(doc: &Document) -> AggResult<Self> {
        let mut path = None;
        let mut preserve_null_and_empty = false;
        let mut include_array_index = None;
        for (key, value) in doc.iter() {
            match key.as_str() {
                "path" => {
                    let reference = value.as_str().ok_or_else(|| {
                        AggError::invalid_stage("$unwind path must be a string")
                    })?;
                    path = Some(parse_reference(reference)?);
                }
                "preserveNullAndEmptyArrays" => {
                    preserve_null_and_empty = value.as_bool().ok_or_else(|| {
                        AggError::invalid_stage(
                            "$unwind preserveNullAndEmptyArrays must be a boolean",
                        )
                    })?;
                }
                "includeArrayIndex" => {
                    let name = value.as_str().ok_or_else(|| {
                        AggError::invalid_stage("$unwind includeArrayIndex must be a string")
                    })?;
                    include_array_index = Some(FieldPath::parse(name)?);
                }
                other => {
                    return Err(AggError::invalid_stage(format!(
                        "$unwind: unknown option '{}'",
                        other
                    )))
                }
            }
        }
        let path = path.ok_or_else(|| AggError::invalid_stage("$unwind requires a path"))?;
        Ok(Self {
            path,
            preserve_null_and_empty,
            include_array_index,
        })
    }

    /// Rows produced for one input document
    pub fn expand(&self, doc: &Document) -> Vec<Document> {
        let value = lookup(doc, &self.path).cloned().unwrap_or(Value::Missing);
        match value {
            Value::Array(items) if !items.is_empty() => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| self.emit(doc, item, Value::Int64(i as i64)))
                .collect(),
            Value::Array(_) | Value::Null | Value::Missing => {
                if self.preserve_null_and_empty {
                    vec![self.emit(doc, Value::Null, Value::Null)]
                } else {
                    Vec::new()
                }
            }
            scalar => vec![self.emit(doc, scalar, Value::Int64(0))],
        }
    }

    fn emit(&self, doc: &Document, element: Value, index: Value) -> Document {
        let mut out = doc.clone();
        set_path(&mut out, &self.path, element);
        if let Some(index_path) = &self.include_array_index {
            set_path(&mut out, index_path, index);
        }
        out
    }
}

fn parse_reference(reference: &str) -> AggResult<FieldPath> {
    if !reference.starts_with('$') {
        return Err(AggError::invalid_stage(format!(
            "$unwind path '{}' must be prefixed with '$'",
            reference
        )));
    }
    FieldPath::parse_reference(reference)
}

pub struct UnwindStage {
    upstream: BoxedStream,
    spec: UnwindSpec,
    pending: VecDeque<Row>,
}

impl UnwindStage {
    pub fn new(upstream: BoxedStream, spec: UnwindSpec) -> Self {
        Self {
            upstream,
            spec,
            pending: VecDeque::new(),
        }
    }
}

impl RowStream for UnwindStage {
    fn next_row(&mut self, ctx: &mut ExecContext) -> AggResult<Option<Row>> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Ok(Some(row));
            }
            let Some(row) = self.upstream.next_row(ctx)? else {
                return Ok(None);
            };
            let meta = row.meta;
            self.pending.extend(
                self.spec
                    .expand(&row.doc)
                    .into_iter()
                    .map(|doc| Row::with_meta(doc, meta)),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::test_support::{ctx, doc, drain, rows};
    use serde_json::json;

    fn inputs() -> Vec<serde_json::Value> {
        vec![
            json!({"_id": 1, "hobbies": ["a", "b", "c"]}),
            json!({"_id": 2, "hobbies": []}),
            json!({"_id": 3, "hobbies": null}),
            json!({"_id": 4}),
            json!({"_id": 5, "hobbies": "solo"}),
        ]
    }

    #[test]
    fn test_cardinality_without_preserve() {
        let spec = UnwindSpec::parse(&Value::from("$hobbies")).unwrap();
        let mut stage = UnwindStage::new(rows(inputs()), spec);
        let out = drain(&mut stage, &mut ctx());
        assert_eq!(out.len(), 4);
        assert_eq!(out[0], doc(json!({"_id": 1, "hobbies": "a"})));
        assert_eq!(out[3], doc(json!({"_id": 5, "hobbies": "solo"})));
    }

    #[test]
    fn test_cardinality_with_preserve() {
        let spec = UnwindSpec::parse(&Value::Document(doc(json!({
            "path": "$hobbies",
            "preserveNullAndEmptyArrays": true,
            "includeArrayIndex": "idx"
        }))))
        .unwrap();
        let mut stage = UnwindStage::new(rows(inputs()), spec);
        let out = drain(&mut stage, &mut ctx());
        assert_eq!(out.len(), 7);
        assert_eq!(out[1], doc(json!({"_id": 1, "hobbies": "b", "idx": {"$numberLong": "1"}})));
        assert_eq!(out[3], doc(json!({"_id": 2, "hobbies": null, "idx": null})));
        assert_eq!(out[5], doc(json!({"_id": 4, "hobbies": null, "idx": null})));
    }

    #[test]
    fn test_nested_path() {
        let spec = UnwindSpec::parse(&Value::from("$a.items")).unwrap();
        let out = spec.expand(&doc(json!({"a": {"items": [1, 2], "k": true}})));
        assert_eq!(out[1], doc(json!({"a": {"items": 2, "k": true}})));
    }

    #[test]
    fn test_rejects_bad_specs() {
        assert!(UnwindSpec::parse(&Value::from("hobbies")).is_err());
        assert!(UnwindSpec::parse(&Value::Document(doc(json!({"path": "$a", "extra": 1})))).is_err());
        assert!(UnwindSpec::parse(&Value::Int32(1)).is_err());
    }
}
