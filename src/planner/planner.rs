//! First-stage access planning
//!
//! Access path selection (strict order):
//! 1. `$geoNear` first: the 2dsphere index named by `key`, or the only one
//! 2. `$match` with `$text` first: the text index
//! 3. `$match` first: the cheapest regular index whose key prefix the
//!    filter bounds, cost = index entries inside the key range
//! 4. `$sort` first: a plain index whose key matches the sort keys in one
//!    direction, streamed in index order
//! 5. Collection scan
//!
//! Ties between equally cheap indexes are broken lexicographically by index
//! name. A hint overrides steps 3 to 5.

use tracing::debug;

use crate::errors::{AggError, AggResult};
use crate::executor::{GeoNearSpec, SortSpec};
use crate::index::{GeoHit, Index, IndexCatalog, IndexKind, RecordId, TextHit};
use crate::pipeline::StageSpec;
use crate::query::Filter;

use super::bounds::{key_range, prefix_bounds, FieldBounds};

/// Caller override of the planner's choice
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hint {
    /// Scan every record in id order
    CollectionScan,
    /// Use the named regular index
    Index(String),
}

/// How the first stage obtains its records
#[derive(Debug, Clone)]
pub enum AccessPath {
    CollectionScan,
    /// Candidate ids from a key range, ascending
    IndexScan {
        index: String,
        bounds: Vec<String>,
        ids: Vec<RecordId>,
    },
    /// Every id in index key order; replaces a leading `$sort`
    IndexOrder {
        index: String,
        reverse: bool,
        ids: Vec<RecordId>,
    },
    GeoNear {
        index: String,
        hits: Vec<GeoHit>,
    },
    TextSearch {
        index: String,
        hits: Vec<TextHit>,
    },
}

impl AccessPath {
    pub fn strategy(&self) -> &'static str {
        match self {
            AccessPath::CollectionScan => "COLLSCAN",
            AccessPath::IndexScan { .. } => "IXSCAN",
            AccessPath::IndexOrder { .. } => "INDEX_ORDER",
            AccessPath::GeoNear { .. } => "GEO_NEAR_2DSPHERE",
            AccessPath::TextSearch { .. } => "TEXT",
        }
    }

    pub fn index_name(&self) -> Option<&str> {
        match self {
            AccessPath::CollectionScan => None,
            AccessPath::IndexScan { index, .. }
            | AccessPath::IndexOrder { index, .. }
            | AccessPath::GeoNear { index, .. }
            | AccessPath::TextSearch { index, .. } => Some(index),
        }
    }
}

/// Immutable plan for the head of a pipeline
#[derive(Debug, Clone)]
pub struct AccessPlan {
    pub path: AccessPath,
    /// Records or index entries the access path is expected to touch
    pub estimated_cost: usize,
    /// Leading stages fully answered by the access path
    pub consumed_stages: usize,
    /// Filter applied to fetched records when the first stage is consumed
    pub residual: Option<Filter>,
}

impl AccessPlan {
    fn collection_scan(record_count: usize) -> Self {
        Self {
            path: AccessPath::CollectionScan,
            estimated_cost: record_count,
            consumed_stages: 0,
            residual: None,
        }
    }
}

/// Plans the first stage of a pipeline against a collection's indexes
pub struct QueryPlanner<'a> {
    catalog: Option<&'a IndexCatalog>,
    record_count: usize,
}

impl<'a> QueryPlanner<'a> {
    /// `catalog` is None for sources without indexes
    pub fn new(catalog: Option<&'a IndexCatalog>, record_count: usize) -> Self {
        Self {
            catalog,
            record_count,
        }
    }

    pub fn plan(&self, first: Option<&StageSpec>, hint: Option<&Hint>) -> AggResult<AccessPlan> {
        let plan = match first {
            Some(StageSpec::GeoNear(spec)) => {
                reject_hint(hint, "$geoNear")?;
                self.plan_geo_near(spec)?
            }
            Some(StageSpec::Match(filter)) if filter.contains_text() => {
                reject_hint(hint, "$text")?;
                self.plan_text(filter)?
            }
            Some(StageSpec::Match(filter)) => match hint {
                Some(hint) => self.plan_hinted(hint, Some(filter))?,
                None => self.plan_match(filter),
            },
            Some(StageSpec::Sort(spec)) => match hint {
                Some(Hint::Index(name)) if self.sort_index(spec, Some(name.as_str())).is_some() => {
                    self.plan_sort(spec, Some(name.as_str()))
                }
                Some(hint) => self.plan_hinted(hint, None)?,
                None => self.plan_sort(spec, None),
            },
            _ => match hint {
                Some(hint) => self.plan_hinted(hint, None)?,
                None => AccessPlan::collection_scan(self.record_count),
            },
        };
        debug!(
            strategy = plan.path.strategy(),
            index = plan.path.index_name().unwrap_or("-"),
            cost = plan.estimated_cost,
            "access path selected"
        );
        Ok(plan)
    }

    fn plan_geo_near(&self, spec: &GeoNearSpec) -> AggResult<AccessPlan> {
        let geo_indexes = self.catalog.map(|c| c.geo_indexes()).unwrap_or_default();
        let index = match &spec.key {
            Some(key) => geo_indexes
                .into_iter()
                .find(|i| i.geo().map_or(false, |g| g.path() == key))
                .ok_or_else(|| {
                    AggError::geo_index_required(format!(
                        "$geoNear key '{}' has no 2dsphere index",
                        key
                    ))
                })?,
            None => match geo_indexes.as_slice() {
                [] => {
                    return Err(AggError::geo_index_required(
                        "$geoNear requires a 2dsphere index",
                    ))
                }
                [only] => *only,
                _ => {
                    return Err(AggError::geo_index_required(
                        "several 2dsphere indexes exist; $geoNear needs a key",
                    ))
                }
            },
        };
        let hits = match index.geo() {
            Some(geo) => geo.near(spec.near, spec.min_distance, spec.max_distance),
            None => Vec::new(),
        };
        Ok(AccessPlan {
            estimated_cost: hits.len(),
            path: AccessPath::GeoNear {
                index: index.name().to_string(),
                hits,
            },
            consumed_stages: 1,
            residual: None,
        })
    }

    fn plan_text(&self, filter: &Filter) -> AggResult<AccessPlan> {
        let index = self
            .catalog
            .and_then(IndexCatalog::text_index)
            .ok_or_else(AggError::text_index_required)?;
        let (query, residual) = filter.split_text();
        let hits = match (index.text(), query) {
            (Some(text), Some(query)) => text.search(&query),
            _ => Vec::new(),
        };
        let residual = match residual {
            Filter::And(items) if items.is_empty() => None,
            other => Some(other),
        };
        Ok(AccessPlan {
            estimated_cost: hits.len(),
            path: AccessPath::TextSearch {
                index: index.name().to_string(),
                hits,
            },
            consumed_stages: 1,
            residual,
        })
    }

    fn plan_match(&self, filter: &Filter) -> AccessPlan {
        let mut best: Option<(usize, &Index, Vec<FieldBounds>)> = None;
        for index in self.regular_indexes() {
            let fields = index.spec().key_fields();
            let prefix = prefix_bounds(filter, &fields, index.is_multikey());
            if prefix.is_empty() {
                continue;
            }
            let cost = match (index.tree(), key_range(&prefix, &fields)) {
                (Some(tree), Some((lower, upper))) => tree.count_range(lower, upper),
                _ => 0,
            };
            let better = match &best {
                None => true,
                Some((best_cost, best_index, _)) => {
                    cost < *best_cost || (cost == *best_cost && index.name() < best_index.name())
                }
            };
            if better {
                best = Some((cost, index, prefix));
            }
        }
        match best {
            Some((cost, index, prefix)) => {
                index_scan(index, &prefix, cost, Some(filter.clone()))
            }
            None => AccessPlan::collection_scan(self.record_count),
        }
    }

    fn plan_hinted(&self, hint: &Hint, filter: Option<&Filter>) -> AggResult<AccessPlan> {
        let name = match hint {
            Hint::CollectionScan => return Ok(AccessPlan::collection_scan(self.record_count)),
            Hint::Index(name) => name,
        };
        let index = self
            .catalog
            .and_then(|c| c.get(name))
            .ok_or_else(|| AggError::index_not_found(name))?;
        if index.spec().kind != IndexKind::Regular || index.spec().is_partial() {
            return Err(AggError::invalid_stage(format!(
                "index '{}' cannot be hinted: only non-partial regular indexes can",
                name
            )));
        }
        let fields = index.spec().key_fields();
        let prefix = filter
            .map(|f| prefix_bounds(f, &fields, index.is_multikey()))
            .unwrap_or_default();
        let cost = match (index.tree(), key_range(&prefix, &fields)) {
            (Some(tree), Some((lower, upper))) => tree.count_range(lower, upper),
            _ => 0,
        };
        let mut plan = index_scan(index, &prefix, cost, filter.cloned());
        if filter.is_none() {
            plan.consumed_stages = 0;
        }
        Ok(plan)
    }

    /// Index able to stream records in the order `spec` asks for
    fn sort_index(&self, spec: &SortSpec, only: Option<&str>) -> Option<(&'a Index, bool)> {
        let keys = spec.field_keys()?;
        let mut candidates: Vec<(&'a Index, bool)> = self
            .regular_indexes()
            .filter(|i| only.map_or(true, |name| i.name() == name))
            .filter(|i| !i.is_multikey())
            .filter_map(|index| {
                let fields = index.spec().key_fields();
                if fields.len() != keys.len() {
                    return None;
                }
                let same_paths = fields.iter().zip(&keys).all(|(f, k)| f.0 == k.0);
                if !same_paths {
                    return None;
                }
                if fields.iter().zip(&keys).all(|(f, k)| f.1 == k.1) {
                    Some((index, false))
                } else if fields.iter().zip(&keys).all(|(f, k)| f.1 == k.1.reverse()) {
                    Some((index, true))
                } else {
                    None
                }
            })
            .collect();
        candidates.sort_by(|a, b| a.0.name().cmp(b.0.name()));
        candidates.into_iter().next()
    }

    fn plan_sort(&self, spec: &SortSpec, only: Option<&str>) -> AccessPlan {
        match self.sort_index(spec, only) {
            Some((index, reverse)) => {
                let ids = index
                    .tree()
                    .map(|tree| tree.ordered_ids(reverse))
                    .unwrap_or_default();
                AccessPlan {
                    estimated_cost: ids.len(),
                    path: AccessPath::IndexOrder {
                        index: index.name().to_string(),
                        reverse,
                        ids,
                    },
                    consumed_stages: 1,
                    residual: None,
                }
            }
            None => AccessPlan::collection_scan(self.record_count),
        }
    }

    /// Regular, non-partial indexes in name order
    fn regular_indexes(&self) -> impl Iterator<Item = &'a Index> {
        let mut indexes: Vec<&'a Index> = self
            .catalog
            .map(|c| c.iter().collect())
            .unwrap_or_default();
        indexes.retain(|i| i.tree().is_some() && !i.spec().is_partial());
        indexes.sort_by(|a, b| a.name().cmp(b.name()));
        indexes.into_iter()
    }
}

fn reject_hint(hint: Option<&Hint>, stage: &str) -> AggResult<()> {
    match hint {
        Some(_) => Err(AggError::invalid_stage(format!(
            "a hint cannot be combined with a leading {}",
            stage
        ))),
        None => Ok(()),
    }
}

fn index_scan(
    index: &Index,
    prefix: &[FieldBounds],
    cost: usize,
    filter: Option<Filter>,
) -> AccessPlan {
    let fields = index.spec().key_fields();
    let ids = match (index.tree(), key_range(prefix, &fields)) {
        (Some(tree), Some((lower, upper))) => tree.range(lower, upper),
        _ => Vec::new(),
    };
    let bounds = prefix
        .iter()
        .zip(&fields)
        .map(|(b, (path, _))| format!("{}: {}", path, b))
        .collect();
    AccessPlan {
        path: AccessPath::IndexScan {
            index: index.name().to_string(),
            bounds,
            ids,
        },
        estimated_cost: cost,
        consumed_stages: 1,
        residual: filter,
    }
}
