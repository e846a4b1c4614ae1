//! `$skip` and `$limit`

use crate::errors::AggResult;

use super::{BoxedStream, ExecContext, Row, RowStream};

pub struct SkipStage {
    upstream: BoxedStream,
    remaining: u64,
}

impl SkipStage {
    pub fn new(upstream: BoxedStream, count: u64) -> Self {
        Self {
            upstream,
            remaining: count,
        }
    }
}

impl RowStream for SkipStage {
    fn next_row(&mut self, ctx: &mut ExecContext) -> AggResult<Option<Row>> {
        while self.remaining > 0 {
            if self.upstream.next_row(ctx)?.is_none() {
                self.remaining = 0;
                return Ok(None);
            }
            self.remaining -= 1;
        }
        self.upstream.next_row(ctx)
    }
}

/// Stops pulling from upstream once `count` rows were handed out
pub struct LimitStage {
    upstream: BoxedStream,
    remaining: u64,
}

impl LimitStage {
    pub fn new(upstream: BoxedStream, count: u64) -> Self {
        Self {
            upstream,
            remaining: count,
        }
    }
}

impl RowStream for LimitStage {
    fn next_row(&mut self, ctx: &mut ExecContext) -> AggResult<Option<Row>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let row = self.upstream.next_row(ctx)?;
        if row.is_some() {
            self.remaining -= 1;
        }
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::test_support::{ctx, drain, rows};
    use serde_json::json;

    fn five() -> BoxedStream {
        rows((0..5).map(|n| json!({"n": n})).collect())
    }

    #[test]
    fn test_skip_then_limit() {
        let mut ctx = ctx();
        let mut stage = LimitStage::new(Box::new(SkipStage::new(five(), 1)), 2);
        let out = drain(&mut stage, &mut ctx);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].get("n").and_then(|v| v.as_i64()), Some(1));
    }

    #[test]
    fn test_skip_past_end() {
        let mut stage = SkipStage::new(five(), 10);
        assert!(drain(&mut stage, &mut ctx()).is_empty());
    }

    #[test]
    fn test_limit_larger_than_input() {
        let mut stage = LimitStage::new(five(), 100);
        assert_eq!(drain(&mut stage, &mut ctx()).len(), 5);
    }
}
