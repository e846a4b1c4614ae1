//! `$sort`
//!
//! Blocking and stable: rows with equal keys keep their arrival order.
//!
//! The sort value of an array field is its smallest element for an
//! ascending key and its largest for a descending key. A missing field
//! sorts as null. `{$meta: "textScore"}` sorts by descending text score.

use std::cmp::Ordering;

use crate::errors::{AggError, AggResult};
use crate::index::Direction;
use crate::value::path::collect;
use crate::value::{compare, Document, FieldPath, Value};

use super::{materialize, BoxedStream, ExecContext, Row, RowStream};

#[derive(Debug, Clone, PartialEq)]
pub enum SortKey {
    Field { path: FieldPath, direction: Direction },
    TextScore,
}

impl SortKey {
    fn value(&self, row: &Row) -> Value {
        match self {
            SortKey::Field { path, direction } => field_sort_value(&row.doc, path, *direction),
            SortKey::TextScore => row.meta.text_score.map_or(Value::Null, Value::Double),
        }
    }

    fn direction(&self) -> Direction {
        match self {
            SortKey::Field { direction, .. } => *direction,
            SortKey::TextScore => Direction::Descending,
        }
    }
}

/// The value a document sorts by on one field
pub fn field_sort_value(doc: &Document, path: &FieldPath, direction: Direction) -> Value {
    let mut candidates: Vec<&Value> = Vec::new();
    for leaf in collect(doc, path) {
        match leaf {
            Value::Array(items) => candidates.extend(items.iter()),
            other => candidates.push(other),
        }
    }
    let pick = match direction {
        Direction::Ascending => candidates.into_iter().min_by(|a, b| compare(a, b)),
        Direction::Descending => candidates.into_iter().max_by(|a, b| compare(a, b)),
    };
    pick.cloned().unwrap_or(Value::Null)
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortSpec {
    keys: Vec<SortKey>,
}

impl SortSpec {
    pub fn parse(spec: &Document) -> AggResult<Self> {
        if spec.is_empty() {
            return Err(AggError::invalid_stage("$sort requires at least one key"));
        }
        let mut keys = Vec::with_capacity(spec.len());
        for (field, value) in spec.iter() {
            let key = match value {
                Value::Document(meta) => match meta.single_entry() {
                    Some((k, Value::String(name))) if k == "$meta" && name == "textScore" => {
                        SortKey::TextScore
                    }
                    _ => {
                        return Err(AggError::invalid_stage(format!(
                            "$sort key '{}' must be 1, -1 or {{$meta: \"textScore\"}}",
                            field
                        )))
                    }
                },
                other => {
                    let direction = match other.as_i64() {
                        Some(1) => Direction::Ascending,
                        Some(-1) => Direction::Descending,
                        _ => {
                            return Err(AggError::invalid_stage(format!(
                                "$sort direction for '{}' must be 1 or -1",
                                field
                            )))
                        }
                    };
                    SortKey::Field {
                        path: FieldPath::parse(field)?,
                        direction,
                    }
                }
            };
            keys.push(key);
        }
        Ok(Self { keys })
    }

    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    /// Field keys with their directions; `None` when a `$meta` key is present
    pub fn field_keys(&self) -> Option<Vec<(FieldPath, Direction)>> {
        self.keys
            .iter()
            .map(|k| match k {
                SortKey::Field { path, direction } => Some((path.clone(), *direction)),
                SortKey::TextScore => None,
            })
            .collect()
    }

    pub fn uses_text_score(&self) -> bool {
        self.keys.iter().any(|k| *k == SortKey::TextScore)
    }

    fn key_values(&self, row: &Row) -> Vec<Value> {
        self.keys.iter().map(|k| k.value(row)).collect()
    }

    fn compare_values(&self, a: &[Value], b: &[Value]) -> Ordering {
        for ((key, x), y) in self.keys.iter().zip(a).zip(b) {
            let ord = match key.direction() {
                Direction::Ascending => compare(x, y),
                Direction::Descending => compare(y, x),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Stable in-place sort of materialized rows
    pub fn sort_rows(&self, rows: Vec<Row>) -> Vec<Row> {
        let mut keyed: Vec<(Vec<Value>, Row)> =
            rows.into_iter().map(|r| (self.key_values(&r), r)).collect();
        keyed.sort_by(|a, b| self.compare_values(&a.0, &b.0));
        keyed.into_iter().map(|(_, r)| r).collect()
    }
}

pub struct SortStage {
    upstream: BoxedStream,
    spec: SortSpec,
    output: Option<std::vec::IntoIter<Row>>,
}

impl SortStage {
    pub fn new(upstream: BoxedStream, spec: SortSpec) -> Self {
        Self {
            upstream,
            spec,
            output: None,
        }
    }
}

impl RowStream for SortStage {
    fn next_row(&mut self, ctx: &mut ExecContext) -> AggResult<Option<Row>> {
        if self.output.is_none() {
            let rows = materialize(self.upstream.as_mut(), ctx, "$sort")?;
            self.output = Some(self.spec.sort_rows(rows).into_iter());
        }
        Ok(self.output.as_mut().and_then(Iterator::next))
    }
}
