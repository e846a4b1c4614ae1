//! Result cursor of one pipeline run
//!
//! The cursor owns the stage chain and its execution context. Documents
//! are produced only when the caller pulls; dropping the cursor early
//! releases every stage's state.

use crate::collection::DocumentSink;
use crate::errors::{AggError, AggResult};
use crate::executor::{BoxedStream, Diagnostic, ExecContext, ExecStats, Row, RowStream};
use crate::observability::{log_event, Event, ObservationScope};
use crate::value::Document;

/// Stream left behind once a run is over
struct Exhausted;

impl RowStream for Exhausted {
    fn next_row(&mut self, _ctx: &mut ExecContext) -> AggResult<Option<Row>> {
        Ok(None)
    }
}

/// Pull-based iterator over pipeline output
pub struct AggregateCursor {
    stream: BoxedStream,
    ctx: ExecContext,
    scope: Option<ObservationScope>,
    strategy: &'static str,
    finished: bool,
}

impl AggregateCursor {
    pub(crate) fn new(stream: BoxedStream, ctx: ExecContext, strategy: &'static str) -> Self {
        Self {
            stream,
            ctx,
            scope: Some(ObservationScope::new("PIPELINE")),
            strategy,
            finished: false,
        }
    }

    /// Documents dropped under `error_mode = "skip"`, so far
    pub fn diagnostics(&self) -> &[Diagnostic] {
        self.ctx.diagnostics()
    }

    pub fn stats(&self) -> ExecStats {
        self.ctx.stats
    }

    /// Access path the run started from
    pub fn strategy(&self) -> &'static str {
        self.strategy
    }

    pub fn is_exhausted(&self) -> bool {
        self.finished
    }

    /// Pull every remaining document; stops at the first error
    pub fn collect_documents(&mut self) -> AggResult<Vec<Document>> {
        self.by_ref().collect()
    }

    /// Write every remaining document to `sink`, returning how many
    pub fn drain_into(&mut self, sink: &mut dyn DocumentSink) -> AggResult<u64> {
        let mut written = 0;
        for doc in self.by_ref() {
            sink.write(doc?)?;
            written += 1;
        }
        Ok(written)
    }

    fn finish(&mut self) {
        self.finished = true;
        self.stream = Box::new(Exhausted);
        let stats = self.ctx.stats;
        let examined = stats.docs_examined.to_string();
        let returned = stats.docs_returned.to_string();
        let skipped = stats.docs_skipped.to_string();
        let fields = [
            ("strategy", self.strategy),
            ("docs_examined", examined.as_str()),
            ("docs_returned", returned.as_str()),
            ("docs_skipped", skipped.as_str()),
        ];
        if let Some(scope) = self.scope.take() {
            scope.complete_with_fields(&fields);
        }
        log_event(Event::PipelineExecuted, &fields);
    }

    fn abort(&mut self, err: &AggError) {
        self.finished = true;
        self.stream = Box::new(Exhausted);
        if let Some(scope) = self.scope.take() {
            scope.fail(err.message());
        }
        log_event(Event::PipelineAborted, &[("code", err.code().code())]);
    }
}

impl Iterator for AggregateCursor {
    type Item = AggResult<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.stream.next_row(&mut self.ctx) {
            Ok(Some(row)) => {
                self.ctx.stats.docs_returned += 1;
                Some(Ok(row.doc))
            }
            Ok(None) => {
                self.finish();
                None
            }
            Err(err) => {
                self.abort(&err);
                Some(Err(err))
            }
        }
    }
}

impl Drop for AggregateCursor {
    fn drop(&mut self) {
        if !self.finished {
            let returned = self.ctx.stats.docs_returned.to_string();
            log_event(Event::CursorAbandoned, &[("docs_returned", returned.as_str())]);
        }
    }
}

impl std::fmt::Debug for AggregateCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateCursor")
            .field("strategy", &self.strategy)
            .field("stats", &self.ctx.stats)
            .field("finished", &self.finished)
            .finish()
    }
}
