//! `$group`
//!
//! Blocking. Groups are keyed by the `_id` expression under the total
//! value order (so `1` and `1.0` share a group) and are emitted in order of
//! first arrival. A missing key groups as null.

use std::collections::BTreeMap;

use crate::errors::{AggError, AggResult};
use crate::expr::{Evaluator, Expression};
use crate::value::{Document, OrdValue, Value};

use super::accumulators::{Accumulator, AccumulatorSpec};
use super::{BoxedStream, ExecContext, MemoryBudget, Row, RowStream};

#[derive(Debug, Clone, PartialEq)]
pub struct GroupSpec {
    pub id: Expression,
    pub accumulators: Vec<AccumulatorSpec>,
}

impl GroupSpec {
    pub fn parse(spec: &Document) -> AggResult<Self> {
        let id = spec
            .get("_id")
            .ok_or_else(|| AggError::invalid_stage("$group requires an _id expression"))?;
        let id = Expression::parse(id)?;
        let mut accumulators = Vec::with_capacity(spec.len().saturating_sub(1));
        for (field, value) in spec.iter().filter(|(k, _)| k.as_str() != "_id") {
            accumulators.push(AccumulatorSpec::parse(field, value)?);
        }
        Ok(Self { id, accumulators })
    }
}

/// Accumulator state for a set of groups, in first-arrival order
pub(crate) struct GroupTable<'s> {
    specs: &'s [AccumulatorSpec],
    index: BTreeMap<OrdValue, usize>,
    groups: Vec<(Value, Vec<Accumulator>)>,
    budget: MemoryBudget,
    ignored: Vec<AggError>,
}

impl<'s> GroupTable<'s> {
    pub(crate) fn new(specs: &'s [AccumulatorSpec], budget: MemoryBudget) -> Self {
        Self {
            specs,
            index: BTreeMap::new(),
            groups: Vec::new(),
            budget,
            ignored: Vec::new(),
        }
    }

    /// Evaluate every accumulator operand against one row
    pub(crate) fn operands(&self, row: &Row) -> AggResult<Vec<Value>> {
        let evaluator = Evaluator::with_meta(&row.doc, row.meta);
        self.specs
            .iter()
            .map(|spec| evaluator.evaluate(&spec.expr).map_err(|e| e.context(&spec.field)))
            .collect()
    }

    /// Fold evaluated operands into the group for `key`
    pub(crate) fn fold(&mut self, key: Value, operands: Vec<Value>) -> AggResult<()> {
        let key = if key.is_missing() { Value::Null } else { key };
        let slot = match self.index.get(&OrdValue(key.clone())) {
            Some(slot) => *slot,
            None => {
                self.budget.charge(key.approx_size() * 2 + 64)?;
                let accumulators = self.specs.iter().map(|s| Accumulator::new(s.op)).collect();
                self.groups.push((key.clone(), accumulators));
                self.index.insert(OrdValue(key), self.groups.len() - 1);
                self.groups.len() - 1
            }
        };
        let accumulators = &mut self.groups[slot].1;
        for ((acc, spec), value) in accumulators.iter_mut().zip(self.specs).zip(operands) {
            if let Some(e) = acc.ignored_operand(&value) {
                self.ignored.push(e.context(&spec.field));
            }
            let retained = acc.accumulate(value)?;
            self.budget.charge(retained)?;
        }
        Ok(())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Report the operands left out of numeric accumulators since the
    /// last call
    pub(crate) fn report_ignored(&mut self, stage: &str, ctx: &mut ExecContext) {
        for err in self.ignored.drain(..) {
            ctx.note(stage, err);
        }
    }

    /// One document per group: `{_id: key, <field>: <result>, ...}`
    pub(crate) fn finish(self) -> AggResult<Vec<(Value, Document)>> {
        let mut out = Vec::with_capacity(self.groups.len());
        for (key, accumulators) in self.groups {
            let mut doc = Document::with_capacity(self.specs.len() + 1);
            doc.insert("_id", key.clone());
            for (spec, acc) in self.specs.iter().zip(accumulators) {
                doc.insert(spec.field.clone(), acc.finish()?);
            }
            out.push((key, doc));
        }
        Ok(out)
    }
}

pub struct GroupStage {
    upstream: BoxedStream,
    spec: GroupSpec,
    output: Option<std::vec::IntoIter<Document>>,
}

impl GroupStage {
    pub fn new(upstream: BoxedStream, spec: GroupSpec) -> Self {
        Self {
            upstream,
            spec,
            output: None,
        }
    }

    fn build(&mut self, ctx: &mut ExecContext) -> AggResult<Vec<Document>> {
        let mut table = GroupTable::new(&self.spec.accumulators, ctx.budget("$group"));
        while let Some(row) = self.upstream.next_row(ctx)? {
            let evaluated = Evaluator::with_meta(&row.doc, row.meta)
                .evaluate(&self.spec.id)
                .and_then(|key| Ok((key, table.operands(&row)?)));
            match evaluated {
                Ok((key, operands)) => {
                    if let Err(e) = table.fold(key, operands) {
                        ctx.recover("$group", e)?;
                    }
                }
                Err(e) => ctx.recover("$group", e)?,
            }
            table.report_ignored("$group", ctx);
        }
        Ok(table.finish()?.into_iter().map(|(_, doc)| doc).collect())
    }
}

impl RowStream for GroupStage {
    fn next_row(&mut self, ctx: &mut ExecContext) -> AggResult<Option<Row>> {
        if self.output.is_none() {
            let docs = self.build(ctx)?;
            self.output = Some(docs.into_iter());
        }
        Ok(self.output.as_mut().and_then(Iterator::next).map(Row::new))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::errors::ErrorCode;
    use crate::executor::test_support::{ctx, doc, drain, rows};
    use serde_json::json;

    fn run(spec: serde_json::Value, input: Vec<serde_json::Value>) -> Vec<Document> {
        let spec = GroupSpec::parse(&doc(spec)).unwrap();
        let mut stage = GroupStage::new(rows(input), spec);
        drain(&mut stage, &mut ctx())
    }

    #[test]
    fn test_group_by_state_counts_and_sums() {
        let out = run(
            json!({"_id": {"state": "$state"}, "total": {"$sum": 1}, "age": {"$avg": "$age"}}),
            vec![
                json!({"state": "a", "age": 20}),
                json!({"state": "b", "age": 40}),
                json!({"state": "a", "age": 30}),
            ],
        );
        assert_eq!(
            out,
            vec![
                doc(json!({"_id": {"state": "a"}, "total": 2, "age": 25.0})),
                doc(json!({"_id": {"state": "b"}, "total": 1, "age": 40.0})),
            ]
        );
    }

    #[test]
    fn test_non_numeric_sum_operand_is_noted() {
        let spec = GroupSpec::parse(&doc(json!({
            "_id": null,
            "total": {"$sum": "$v"},
            "mean": {"$avg": "$v"}
        })))
        .unwrap();
        let mut stage = GroupStage::new(
            rows(vec![json!({"v": 2}), json!({"v": "abc"}), json!({"v": 4})]),
            spec,
        );
        let mut ctx = ctx();
        let out = drain(&mut stage, &mut ctx);
        assert_eq!(out, vec![doc(json!({"_id": null, "total": 6, "mean": 3.0}))]);

        let diagnostics = ctx.diagnostics();
        assert_eq!(diagnostics.len(), 2);
        assert!(diagnostics.iter().all(|d| d.code == ErrorCode::TypeMismatch && !d.dropped));
        assert!(diagnostics[0].message.starts_with("total: $sum"));
        assert_eq!(ctx.stats.docs_skipped, 0);
    }

    #[test]
    fn test_missing_key_groups_as_null() {
        let out = run(
            json!({"_id": "$k", "n": {"$count": {}}}),
            vec![json!({"k": null}), json!({}), json!({"k": 1})],
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], doc(json!({"_id": null, "n": 2})));
    }

    #[test]
    fn test_numeric_keys_share_group() {
        let out = run(
            json!({"_id": "$k", "items": {"$push": "$v"}}),
            vec![json!({"k": 1, "v": "a"}), json!({"k": 1.0, "v": "b"})],
        );
        assert_eq!(out, vec![doc(json!({"_id": 1, "items": ["a", "b"]}))]);
    }

    #[test]
    fn test_requires_id() {
        let err = GroupSpec::parse(&doc(json!({"n": {"$sum": 1}}))).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidStageSpec);
    }

    #[test]
    fn test_memory_ceiling() {
        let spec = GroupSpec::parse(&doc(json!({"_id": "$k", "all": {"$push": "$$ROOT"}}))).unwrap();
        let input = (0..50).map(|k| json!({"k": k, "pad": "xxxxxxxxxxxxxxxxxxxxxxxx"})).collect();
        let mut stage = GroupStage::new(rows(input), spec);
        let mut ctx = ExecContext::new(EngineConfig::default().with_max_blocking_stage_bytes(512));
        let err = stage.next_row(&mut ctx).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ResourceExceeded);
    }
}
