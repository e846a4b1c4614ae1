//! `$count`
//!
//! Emits `{<field>: n}` once the upstream is exhausted; an empty input
//! emits nothing.

use crate::errors::{AggError, AggResult};
use crate::value::{Document, Number, Value};

use super::{BoxedStream, ExecContext, Row, RowStream};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountSpec {
    pub field: String,
}

impl CountSpec {
    pub fn parse(value: &Value) -> AggResult<Self> {
        let field = value
            .as_str()
            .ok_or_else(|| AggError::invalid_stage("$count expects a field name string"))?;
        if field.is_empty() || field.starts_with('$') || field.contains('.') {
            return Err(AggError::invalid_stage(format!(
                "$count field '{}' must be non-empty, not start with '$' and not contain '.'",
                field
            )));
        }
        Ok(Self {
            field: field.to_string(),
        })
    }
}

pub struct CountStage {
    upstream: BoxedStream,
    spec: CountSpec,
    done: bool,
}

impl CountStage {
    pub fn new(upstream: BoxedStream, spec: CountSpec) -> Self {
        Self {
            upstream,
            spec,
            done: false,
        }
    }
}

impl RowStream for CountStage {
    fn next_row(&mut self, ctx: &mut ExecContext) -> AggResult<Option<Row>> {
        if self.done {
            return Ok(None);
        }
        let mut count: i64 = 0;
        while self.upstream.next_row(ctx)?.is_some() {
            count += 1;
        }
        self.done = true;
        if count == 0 {
            return Ok(None);
        }
        let doc = Document::from_pairs(vec![(
            self.spec.field.clone(),
            Number::from_i64(count).into_value(),
        )]);
        Ok(Some(Row::new(doc)))
    }
}
