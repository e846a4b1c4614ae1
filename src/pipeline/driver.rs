//! Pipeline driver
//!
//! Turns a validated [`Pipeline`] plus an access plan into a chain of
//! stage streams, and hands the chain to an [`AggregateCursor`].
//!
//! The planner only looks at the first stage. When the access path
//! answers that stage (an index scan, a text search, a geo search or an
//! index-ordered sort), the stage is not instantiated again; any
//! predicate the index cannot prove is re-applied as a residual `$match`.

use std::rc::Rc;

use crate::collection::{Database, DocumentSource};
use crate::config::EngineConfig;
use crate::errors::{AggError, AggResult};
use crate::executor::{
    AddFieldsStage, BoxedStream, BucketAutoStage, BucketStage, CollectionScan, CountStage,
    ExecContext, GeoNearStage, GroupStage, IdListScan, LimitStage, MatchStage, OutStage,
    ProjectStage, SkipStage, SortStage, UnwindStage,
};
use crate::expr::Metadata;
use crate::index::IndexCatalog;
use crate::observability::{log_event, Event};
use crate::planner::{AccessPath, AccessPlan, ExplainPlan, Hint, QueryPlanner};
use crate::value::Document;

use super::cursor::AggregateCursor;
use super::descriptor::{Pipeline, StageSpec};

/// Options accepted by `aggregate` and `explain`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateOptions {
    /// Force a collection scan or a named index
    pub hint: Option<Hint>,
}

impl AggregateOptions {
    pub fn hint(mut self, hint: Hint) -> Self {
        self.hint = Some(hint);
        self
    }
}

impl Pipeline {
    /// Choose the access path for the first stage
    pub fn plan(
        &self,
        catalog: Option<&IndexCatalog>,
        record_count: usize,
        options: &AggregateOptions,
    ) -> AggResult<AccessPlan> {
        QueryPlanner::new(catalog, record_count).plan(self.stages().first(), options.hint.as_ref())
    }

    /// Describe `plan` and the stages that run on top of it
    pub fn describe(&self, plan: &AccessPlan) -> ExplainPlan {
        let mut stages = Vec::new();
        if plan.residual.is_some() {
            stages.push("$match".to_string());
        }
        stages.extend(
            self.stages()
                .iter()
                .skip(plan.consumed_stages)
                .map(|s| s.name().to_string()),
        );
        ExplainPlan::from_plan(plan, stages)
    }

    /// Instantiate the stage chain and return a cursor over its output
    pub(crate) fn open(
        &self,
        plan: AccessPlan,
        source: Rc<dyn DocumentSource>,
        database: Option<&Database>,
        config: EngineConfig,
    ) -> AggResult<AggregateCursor> {
        let strategy = plan.path.strategy();
        let index = plan.path.index_name().unwrap_or("-").to_string();
        let consumed = plan.consumed_stages;

        let mut stream: BoxedStream = match plan.path {
            AccessPath::CollectionScan => Box::new(CollectionScan::new(source)),
            AccessPath::IndexScan { ids, .. } | AccessPath::IndexOrder { ids, .. } => {
                Box::new(IdListScan::new(source, ids))
            }
            AccessPath::TextSearch { hits, .. } => {
                let ids = hits
                    .into_iter()
                    .map(|hit| {
                        let meta = Metadata {
                            text_score: Some(hit.score),
                            ..Metadata::default()
                        };
                        (hit.id, meta)
                    })
                    .collect();
                Box::new(IdListScan::with_meta(source, ids))
            }
            AccessPath::GeoNear { hits, .. } => match self.stages().first() {
                Some(StageSpec::GeoNear(spec)) => {
                    Box::new(GeoNearStage::new(source, hits, spec.clone()))
                }
                _ => return Err(AggError::invalid_stage("geo access path without $geoNear")),
            },
        };
        if let Some(residual) = plan.residual {
            stream = Box::new(MatchStage::new(stream, residual));
        }
        for stage in self.stages().iter().skip(consumed) {
            stream = wrap_stage(stream, stage, database)?;
        }

        log_event(
            Event::PipelinePlanned,
            &[("strategy", strategy), ("index", index.as_str())],
        );
        Ok(AggregateCursor::new(stream, ExecContext::new(config), strategy))
    }

    /// Run over in-memory documents, without indexes or a database
    ///
    /// `$geoNear` and `$text` need indexes and fail here; `$out` needs a
    /// database and fails here too.
    pub fn execute_documents(
        &self,
        docs: Vec<Document>,
        config: EngineConfig,
    ) -> AggResult<AggregateCursor> {
        let plan = self.plan(None, docs.len(), &AggregateOptions::default())?;
        let source: Rc<dyn DocumentSource> = Rc::new(docs);
        self.open(plan, source, None, config)
    }
}

fn wrap_stage(
    upstream: BoxedStream,
    stage: &StageSpec,
    database: Option<&Database>,
) -> AggResult<BoxedStream> {
    let stream: BoxedStream = match stage {
        StageSpec::Match(filter) => Box::new(MatchStage::new(upstream, filter.clone())),
        StageSpec::Project(projection) => {
            Box::new(ProjectStage::new(upstream, projection.clone()))
        }
        StageSpec::AddFields(spec) => Box::new(AddFieldsStage::new(upstream, spec.clone())),
        StageSpec::Unwind(spec) => Box::new(UnwindStage::new(upstream, spec.clone())),
        StageSpec::Group(spec) => Box::new(GroupStage::new(upstream, spec.clone())),
        StageSpec::Sort(spec) => Box::new(SortStage::new(upstream, spec.clone())),
        StageSpec::Skip(n) => Box::new(SkipStage::new(upstream, *n)),
        StageSpec::Limit(n) => Box::new(LimitStage::new(upstream, *n)),
        StageSpec::Bucket(spec) => Box::new(BucketStage::new(upstream, spec.clone())),
        StageSpec::BucketAuto(spec) => Box::new(BucketAutoStage::new(upstream, spec.clone())),
        StageSpec::Count(spec) => Box::new(CountStage::new(upstream, spec.clone())),
        StageSpec::Out(name) => {
            let database = database
                .ok_or_else(|| AggError::invalid_stage("$out requires a database handle"))?;
            Box::new(OutStage::new(upstream, database.collection(name)?))
        }
        StageSpec::GeoNear(_) => {
            return Err(AggError::invalid_stage(
                "$geoNear is only valid as the first stage",
            ))
        }
    };
    Ok(stream)
}
