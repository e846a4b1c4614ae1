//! Stage executors
//!
//! Every stage is a [`RowStream`] that owns its upstream and produces rows
//! on demand. Non-blocking stages (match, project, addFields, unwind, skip,
//! limit) handle one row per pull; blocking stages (group, sort, bucket,
//! bucketAuto, count, out) drain their upstream on the first pull and then
//! hand out the materialized result.
//!
//! # Invariants
//!
//! - Stages never mutate the documents held by the source
//! - Pull order is declaration order; no stage reorders another
//! - Dropping a stream releases every materialized row it holds
//! - Per-document errors go through [`ExecContext::recover`]

mod accumulators;
mod bucket;
mod bucket_auto;
mod context;
mod count;
mod geo_near;
mod group;
mod limit;
mod match_stage;
mod out;
mod project;
mod sorter;
mod source;
mod unwind;

pub use accumulators::{Accumulator, AccumulatorOp, AccumulatorSpec};
pub use bucket::{BucketSpec, BucketStage};
pub use bucket_auto::{auto_boundaries, BucketAutoSpec, BucketAutoStage};
pub use context::{Diagnostic, ExecContext, ExecStats, MemoryBudget};
pub use count::{CountSpec, CountStage};
pub use geo_near::{GeoNearSpec, GeoNearStage};
pub use group::{GroupSpec, GroupStage};
pub use limit::{LimitStage, SkipStage};
pub use match_stage::MatchStage;
pub use out::OutStage;
pub use project::{AddFieldsSpec, AddFieldsStage, Projection, ProjectStage};
pub use sorter::{SortKey, SortSpec, SortStage};
pub use source::{CollectionScan, IdListScan};
pub use unwind::{UnwindSpec, UnwindStage};

use crate::errors::AggResult;
use crate::expr::Metadata;
use crate::value::Document;

/// A document flowing between stages with its row metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub doc: Document,
    pub meta: Metadata,
}

impl Row {
    pub fn new(doc: Document) -> Self {
        Self {
            doc,
            meta: Metadata::default(),
        }
    }

    pub fn with_meta(doc: Document, meta: Metadata) -> Self {
        Self { doc, meta }
    }

    /// Approximate footprint for blocking stage accounting
    pub fn approx_size(&self) -> usize {
        self.doc.approx_size() + 16
    }
}

/// Pull-based stream of rows
pub trait RowStream {
    /// The next row, or `None` once the stream is exhausted
    fn next_row(&mut self, ctx: &mut ExecContext) -> AggResult<Option<Row>>;
}

/// Owned upstream of a stage
pub type BoxedStream = Box<dyn RowStream>;

/// Drain `stream`, charging every row against the stage budget
pub(crate) fn materialize(
    stream: &mut dyn RowStream,
    ctx: &mut ExecContext,
    stage: &'static str,
) -> AggResult<Vec<Row>> {
    let mut budget = ctx.budget(stage);
    let mut rows = Vec::new();
    while let Some(row) = stream.next_row(ctx)? {
        budget.charge(row.approx_size())?;
        rows.push(row);
    }
    Ok(rows)
}
