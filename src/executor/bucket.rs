//! `$bucket`
//!
//! Each document lands in the bucket `[b(i), b(i+1))` holding its `groupBy`
//! value. Values outside `[b(0), b(n))`, or of another type bracket, go to
//! the `default` bucket when one is configured, are dropped when
//! `dropOutOfRange` is set, and raise BucketOutOfRange otherwise. Buckets
//! are emitted in boundary order, empty ones omitted, the default bucket
//! last.

use std::cmp::Ordering;

use crate::errors::{AggError, AggResult};
use crate::expr::{Evaluator, Expression};
use crate::value::ordering::canonical_rank;
use crate::value::{compare, Document, Value};

use super::accumulators::AccumulatorSpec;
use super::group::GroupTable;
use super::{BoxedStream, ExecContext, Row, RowStream};

#[derive(Debug, Clone, PartialEq)]
pub struct BucketSpec {
    pub group_by: Expression,
    pub boundaries: Vec<Value>,
    pub default: Option<Value>,
    pub drop_out_of_range: bool,
    pub output: Vec<AccumulatorSpec>,
}

impl BucketSpec {
    pub fn parse(spec: &Document) -> AggResult<Self> {
        let mut group_by = None;
        let mut boundaries = None;
        let mut default = None;
        let mut drop_out_of_range = false;
        let mut output = None;
        for (key, value) in spec.iter() {
            match key.as_str() {
                "groupBy" => group_by = Some(parse_group_by("$bucket", value)?),
                "boundaries" => {
                    let items = value.as_array().ok_or_else(|| {
                        AggError::invalid_stage("$bucket boundaries must be an array")
                    })?;
                    boundaries = Some(items.clone());
                }
                "default" => default = Some(value.clone()),
                "dropOutOfRange" => {
                    drop_out_of_range = value.as_bool().ok_or_else(|| {
                        AggError::invalid_stage("$bucket dropOutOfRange must be a boolean")
                    })?;
                }
                "output" => output = Some(parse_output("$bucket", value)?),
                other => {
                    return Err(AggError::invalid_stage(format!(
                        "$bucket: unknown option '{}'",
                        other
                    )))
                }
            }
        }
        let group_by =
            group_by.ok_or_else(|| AggError::invalid_stage("$bucket requires groupBy"))?;
        let boundaries =
            boundaries.ok_or_else(|| AggError::invalid_stage("$bucket requires boundaries"))?;
        validate_boundaries(&boundaries)?;
        if default.is_some() && drop_out_of_range {
            return Err(AggError::invalid_stage(
                "$bucket cannot combine default with dropOutOfRange",
            ));
        }
        if let Some(d) = &default {
            if in_range(&boundaries, d).is_some() {
                return Err(AggError::invalid_stage(
                    "$bucket default must lie outside the boundaries",
                ));
            }
        }
        Ok(Self {
            group_by,
            boundaries,
            default,
            drop_out_of_range,
            output: output.unwrap_or_else(AccumulatorSpec::default_count),
        })
    }

    /// Bucket key for a `groupBy` value; `None` drops the document
    pub fn assign(&self, value: &Value) -> AggResult<Option<Value>> {
        if let Some(i) = in_range(&self.boundaries, value) {
            return Ok(Some(self.boundaries[i].clone()));
        }
        match &self.default {
            Some(d) => Ok(Some(d.clone())),
            None if self.drop_out_of_range => Ok(None),
            None => Err(AggError::bucket_out_of_range(value)),
        }
    }
}

pub(crate) fn parse_group_by(stage: &str, value: &Value) -> AggResult<Expression> {
    let is_expression = match value {
        Value::String(s) => s.starts_with('$'),
        Value::Document(_) => true,
        _ => false,
    };
    if !is_expression {
        return Err(AggError::invalid_stage(format!(
            "{} groupBy must be a field path or an expression object",
            stage
        )));
    }
    Expression::parse(value)
}

pub(crate) fn parse_output(stage: &str, value: &Value) -> AggResult<Vec<AccumulatorSpec>> {
    let doc = value
        .as_document()
        .ok_or_else(|| AggError::invalid_stage(format!("{} output must be an object", stage)))?;
    AccumulatorSpec::parse_all(doc)
}

fn validate_boundaries(boundaries: &[Value]) -> AggResult<()> {
    if boundaries.len() < 2 {
        return Err(AggError::invalid_stage(
            "$bucket requires at least two boundaries",
        ));
    }
    let rank = canonical_rank(&boundaries[0]);
    if boundaries.iter().any(|b| b.is_nullish() || canonical_rank(b) != rank) {
        return Err(AggError::invalid_stage(
            "$bucket boundaries must all share one type",
        ));
    }
    if boundaries
        .windows(2)
        .any(|pair| compare(&pair[0], &pair[1]) != Ordering::Less)
    {
        return Err(AggError::invalid_stage(
            "$bucket boundaries must be strictly ascending",
        ));
    }
    Ok(())
}

/// Index of the boundary opening the bucket that holds `value`
fn in_range(boundaries: &[Value], value: &Value) -> Option<usize> {
    if canonical_rank(value) != canonical_rank(&boundaries[0]) {
        return None;
    }
    let upper = boundaries.partition_point(|b| compare(b, value) != Ordering::Greater);
    if upper == 0 || upper == boundaries.len() {
        return None;
    }
    Some(upper - 1)
}

pub struct BucketStage {
    upstream: BoxedStream,
    spec: BucketSpec,
    output: Option<std::vec::IntoIter<Document>>,
}

impl BucketStage {
    pub fn new(upstream: BoxedStream, spec: BucketSpec) -> Self {
        Self {
            upstream,
            spec,
            output: None,
        }
    }

    fn build(&mut self, ctx: &mut ExecContext) -> AggResult<Vec<Document>> {
        let mut table = GroupTable::new(&self.spec.output, ctx.budget("$bucket"));
        while let Some(row) = self.upstream.next_row(ctx)? {
            let value = match Evaluator::with_meta(&row.doc, row.meta).evaluate(&self.spec.group_by) {
                Ok(v) if v.is_missing() => Value::Null,
                Ok(v) => v,
                Err(e) => {
                    ctx.recover("$bucket", e)?;
                    continue;
                }
            };
            let Some(key) = self.spec.assign(&value)? else {
                continue;
            };
            let folded = table.operands(&row).and_then(|ops| table.fold(key, ops));
            if let Err(e) = folded {
                ctx.recover("$bucket", e)?;
            }
            table.report_ignored("$bucket", ctx);
        }
        let mut groups = table.finish()?;
        // boundary order, default bucket last
        groups.sort_by_key(|(key, _)| in_range(&self.spec.boundaries, key).unwrap_or(usize::MAX));
        Ok(groups.into_iter().map(|(_, doc)| doc).collect())
    }
}

impl RowStream for BucketStage {
    fn next_row(&mut self, ctx: &mut ExecContext) -> AggResult<Option<Row>> {
        if self.output.is_none() {
            let docs = self.build(ctx)?;
            self.output = Some(docs.into_iter());
        }
        Ok(self.output.as_mut().and_then(Iterator::next).map(Row::new))
    }
}
