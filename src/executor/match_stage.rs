//! `$match`

use crate::errors::AggResult;
use crate::query::Filter;

use super::{BoxedStream, ExecContext, Row, RowStream};

pub struct MatchStage {
    upstream: BoxedStream,
    filter: Filter,
}

impl MatchStage {
    pub fn new(upstream: BoxedStream, filter: Filter) -> Self {
        Self { upstream, filter }
    }
}

impl RowStream for MatchStage {
    fn next_row(&mut self, ctx: &mut ExecContext) -> AggResult<Option<Row>> {
        while let Some(row) = self.upstream.next_row(ctx)? {
            match self.filter.matches(&row.doc) {
                Ok(true) => return Ok(Some(row)),
                Ok(false) => {}
                Err(e) => ctx.recover("$match", e)?,
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, ErrorMode};
    use crate::executor::test_support::{ctx, doc, drain, rows};
    use serde_json::json;

    #[test]
    fn test_filters_rows() {
        let filter = Filter::parse(&doc(json!({"age": {"$gte": 30}}))).unwrap();
        let mut stage = MatchStage::new(
            rows(vec![json!({"age": 29}), json!({"age": 30}), json!({"name": "x"})]),
            filter,
        );
        let out = drain(&mut stage, &mut ctx());
        assert_eq!(out, vec![doc(json!({"age": 30}))]);
    }

    #[test]
    fn test_expr_errors_skip_in_skip_mode() {
        let filter = Filter::parse(&doc(json!({"$expr": {"$gt": [{"$divide": ["$a", "$b"]}, 1]}}))).unwrap();
        let mut stage = MatchStage::new(
            rows(vec![json!({"a": 4, "b": 0}), json!({"a": 4, "b": 2})]),
            filter,
        );
        let mut ctx = ExecContext::new(EngineConfig::default().with_error_mode(ErrorMode::Skip));
        let out = drain(&mut stage, &mut ctx);
        assert_eq!(out.len(), 1);
        assert_eq!(ctx.diagnostics().len(), 1);
    }
}
