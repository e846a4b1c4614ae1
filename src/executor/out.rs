//! `$out`
//!
//! Always the last stage. Drains its upstream, then replaces the contents
//! of the target collection in one step; the target keeps its indexes. If
//! any document is rejected (duplicate key, parallel arrays) the target is
//! left unchanged. Emits no rows.

use crate::collection::Collection;
use crate::errors::AggResult;
use crate::observability::{log_event, Event};

use super::{materialize, BoxedStream, ExecContext, Row, RowStream};

pub struct OutStage {
    upstream: BoxedStream,
    target: Collection,
    done: bool,
}

impl OutStage {
    pub fn new(upstream: BoxedStream, target: Collection) -> Self {
        Self {
            upstream,
            target,
            done: false,
        }
    }
}

impl RowStream for OutStage {
    fn next_row(&mut self, ctx: &mut ExecContext) -> AggResult<Option<Row>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        let rows = materialize(self.upstream.as_mut(), ctx, "$out")?;
        let docs = rows.into_iter().map(|row| row.doc).collect();
        let written = self.target.replace_all(docs)?;
        let name = self.target.name();
        let written = written.to_string();
        log_event(
            Event::OutWritten,
            &[("collection", name.as_str()), ("documents", written.as_str())],
        );
        Ok(None)
    }
}
