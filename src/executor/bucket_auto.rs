//! `$bucketAuto`
//!
//! Boundary selection: the rows are sorted by their `groupBy` value (a
//! missing value sorts as null) and bucket `i` of `n` nominally ends at
//! sorted position `ceil((i + 1) * N / n)`. A bucket is then extended
//! while the next value equals its last one, so equal values never span
//! two buckets. Populations are therefore only approximately equal, and
//! heavy ties can produce fewer than `n` buckets.
//!
//! Each bucket's `_id` is `{min, max}` where `max` is the `min` of the
//! following bucket, or the largest value for the last bucket.

use std::cmp::Ordering;

use crate::errors::{AggError, AggResult};
use crate::expr::{Evaluator, Expression};
use crate::value::{compare, Document, Value};

use super::accumulators::AccumulatorSpec;
use super::bucket::{parse_group_by, parse_output};
use super::group::GroupTable;
use super::{BoxedStream, ExecContext, Row, RowStream};

#[derive(Debug, Clone, PartialEq)]
pub struct BucketAutoSpec {
    pub group_by: Expression,
    pub buckets: usize,
    pub output: Vec<AccumulatorSpec>,
}

impl BucketAutoSpec {
    pub fn parse(spec: &Document) -> AggResult<Self> {
        let mut group_by = None;
        let mut buckets = None;
        let mut output = None;
        for (key, value) in spec.iter() {
            match key.as_str() {
                "groupBy" => group_by = Some(parse_group_by("$bucketAuto", value)?),
                "buckets" => {
                    let n = value.as_i64().filter(|n| *n > 0).ok_or_else(|| {
                        AggError::invalid_stage("$bucketAuto buckets must be a positive integer")
                    })?;
                    buckets = Some(n as usize);
                }
                "output" => output = Some(parse_output("$bucketAuto", value)?),
                "granularity" => {
                    return Err(AggError::invalid_stage(
                        "$bucketAuto granularity is not supported",
                    ))
                }
                other => {
                    return Err(AggError::invalid_stage(format!(
                        "$bucketAuto: unknown option '{}'",
                        other
                    )))
                }
            }
        }
        Ok(Self {
            group_by: group_by
                .ok_or_else(|| AggError::invalid_stage("$bucketAuto requires groupBy"))?,
            buckets: buckets
                .ok_or_else(|| AggError::invalid_stage("$bucketAuto requires buckets"))?,
            output: output.unwrap_or_else(AccumulatorSpec::default_count),
        })
    }
}

/// Half-open position ranges of each bucket over sorted `values`
pub fn auto_boundaries(values: &[Value], buckets: usize) -> Vec<(usize, usize)> {
    let total = values.len();
    let mut ranges = Vec::new();
    let mut start = 0;
    for i in 0..buckets {
        if start >= total {
            break;
        }
        let nominal = ((i + 1) * total).div_ceil(buckets);
        let mut end = nominal.max(start + 1).min(total);
        while end < total && compare(&values[end - 1], &values[end]) == Ordering::Equal {
            end += 1;
        }
        ranges.push((start, end));
        start = end;
    }
    ranges
}

pub struct BucketAutoStage {
    upstream: BoxedStream,
    spec: BucketAutoSpec,
    output: Option<std::vec::IntoIter<Document>>,
}

impl BucketAutoStage {
    pub fn new(upstream: BoxedStream, spec: BucketAutoSpec) -> Self {
        Self {
            upstream,
            spec,
            output: None,
        }
    }

    fn build(&mut self, ctx: &mut ExecContext) -> AggResult<Vec<Document>> {
        let mut budget = ctx.budget("$bucketAuto");
        let mut keyed: Vec<(Value, Row)> = Vec::new();
        while let Some(row) = self.upstream.next_row(ctx)? {
            match Evaluator::with_meta(&row.doc, row.meta).evaluate(&self.spec.group_by) {
                Ok(value) => {
                    let value = if value.is_missing() { Value::Null } else { value };
                    budget.charge(row.approx_size() + value.approx_size())?;
                    keyed.push((value, row));
                }
                Err(e) => ctx.recover("$bucketAuto", e)?,
            }
        }
        keyed.sort_by(|a, b| compare(&a.0, &b.0));
        let values: Vec<Value> = keyed.iter().map(|(v, _)| v.clone()).collect();
        let ranges = auto_boundaries(&values, self.spec.buckets);

        let mut out = Vec::with_capacity(ranges.len());
        for (i, (start, end)) in ranges.iter().enumerate() {
            let min = values[*start].clone();
            let max = match ranges.get(i + 1) {
                Some((next, _)) => values[*next].clone(),
                None => values[end - 1].clone(),
            };
            let mut table = GroupTable::new(&self.spec.output, ctx.budget("$bucketAuto"));
            for (_, row) in &keyed[*start..*end] {
                let folded = table
                    .operands(row)
                    .and_then(|ops| table.fold(Value::Null, ops));
                if let Err(e) = folded {
                    ctx.recover("$bucketAuto", e)?;
                }
                table.report_ignored("$bucketAuto", ctx);
            }
            if table.is_empty() {
                continue;
            }
            for (_, mut doc) in table.finish()? {
                doc.insert(
                    "_id",
                    Value::Document(Document::from_pairs(vec![("min", min.clone()), ("max", max.clone())])),
                );
                out.push(doc);
            }
        }
        Ok(out)
    }
}

impl RowStream for BucketAutoStage {
    fn next_row(&mut self, ctx: &mut ExecContext) -> AggResult<Option<Row>> {
        if self.output.is_none() {
            let docs = self.build(ctx)?;
            self.output = Some(docs.into_iter());
        }
        Ok(self.output.as_mut().and_then(Iterator::next).map(Row::new))
    }
}
