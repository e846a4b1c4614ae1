//! Pipeline descriptors
//!
//! A pipeline arrives as an ordered list of single-key records
//! `{"$stage": params}`. Every record is validated and parsed into a
//! [`StageSpec`] before any document flows, so a structural error never
//! surfaces half way through a run.
//!
//! # Placement Rules
//!
//! - `$geoNear` only as the first stage
//! - `$text` only inside the first `$match`
//! - `$out` only as the last stage
//! - A positional projection (`field.$`) binds to the nearest preceding
//!   `$match`

use serde_json::Value as Json;

use crate::errors::{AggError, AggResult};
use crate::executor::{
    AddFieldsSpec, BucketAutoSpec, BucketSpec, CountSpec, GeoNearSpec, GroupSpec, Projection,
    SortSpec, UnwindSpec,
};
use crate::observability::{log_event, Event};
use crate::query::Filter;
use crate::value::{from_json, Document, Value};

/// One parsed stage
#[derive(Debug, Clone)]
pub enum StageSpec {
    Match(Filter),
    Project(Projection),
    AddFields(AddFieldsSpec),
    Unwind(UnwindSpec),
    Group(GroupSpec),
    Sort(SortSpec),
    Skip(u64),
    Limit(u64),
    Bucket(BucketSpec),
    BucketAuto(BucketAutoSpec),
    GeoNear(GeoNearSpec),
    Count(CountSpec),
    /// Target collection name
    Out(String),
}

impl StageSpec {
    pub fn name(&self) -> &'static str {
        match self {
            StageSpec::Match(_) => "$match",
            StageSpec::Project(_) => "$project",
            StageSpec::AddFields(_) => "$addFields",
            StageSpec::Unwind(_) => "$unwind",
            StageSpec::Group(_) => "$group",
            StageSpec::Sort(_) => "$sort",
            StageSpec::Skip(_) => "$skip",
            StageSpec::Limit(_) => "$limit",
            StageSpec::Bucket(_) => "$bucket",
            StageSpec::BucketAuto(_) => "$bucketAuto",
            StageSpec::GeoNear(_) => "$geoNear",
            StageSpec::Count(_) => "$count",
            StageSpec::Out(_) => "$out",
        }
    }

    /// Whether the stage drains its upstream before emitting
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            StageSpec::Group(_)
                | StageSpec::Sort(_)
                | StageSpec::Bucket(_)
                | StageSpec::BucketAuto(_)
                | StageSpec::Count(_)
                | StageSpec::Out(_)
        )
    }
}

fn stage_document<'a>(stage: &str, value: &'a Value) -> AggResult<&'a Document> {
    value
        .as_document()
        .ok_or_else(|| AggError::invalid_stage(format!("{} expects an object", stage)))
}

fn stage_count(stage: &str, value: &Value) -> AggResult<u64> {
    let n = value
        .as_i64()
        .ok_or_else(|| AggError::invalid_stage(format!("{} expects an integer", stage)))?;
    u64::try_from(n)
        .map_err(|_| AggError::invalid_stage(format!("{} must be non-negative, got {}", stage, n)))
}

/// Parse one `{"$stage": params}` record at `position`
fn parse_stage(
    record: &Value,
    position: usize,
    total: usize,
    preceding_match: Option<&Filter>,
) -> AggResult<StageSpec> {
    let doc = record
        .as_document()
        .ok_or_else(|| AggError::invalid_stage("each pipeline stage must be an object"))?;
    let (name, params) = doc.single_entry().ok_or_else(|| {
        AggError::invalid_stage(format!(
            "a pipeline stage must have exactly one field, found {}",
            doc.len()
        ))
    })?;
    let stage = name.as_str();

    let spec = match stage {
        "$match" => {
            let filter = Filter::parse(stage_document(stage, params)?)?;
            if position > 0 && filter.contains_text() {
                return Err(AggError::invalid_stage(
                    "$text is only allowed in the first $match stage",
                ));
            }
            StageSpec::Match(filter)
        }
        "$project" => StageSpec::Project(Projection::parse(
            stage_document(stage, params)?,
            preceding_match,
        )?),
        "$addFields" | "$set" => {
            StageSpec::AddFields(AddFieldsSpec::parse(stage_document(stage, params)?)?)
        }
        "$unwind" => StageSpec::Unwind(UnwindSpec::parse(params)?),
        "$group" => StageSpec::Group(GroupSpec::parse(stage_document(stage, params)?)?),
        "$sort" => StageSpec::Sort(SortSpec::parse(stage_document(stage, params)?)?),
        "$skip" => StageSpec::Skip(stage_count(stage, params)?),
        "$limit" => match stage_count(stage, params)? {
            0 => return Err(AggError::invalid_stage("$limit must be positive")),
            n => StageSpec::Limit(n),
        },
        "$bucket" => StageSpec::Bucket(BucketSpec::parse(stage_document(stage, params)?)?),
        "$bucketAuto" => {
            StageSpec::BucketAuto(BucketAutoSpec::parse(stage_document(stage, params)?)?)
        }
        "$geoNear" => {
            if position > 0 {
                return Err(AggError::invalid_stage(
                    "$geoNear is only valid as the first stage",
                ));
            }
            StageSpec::GeoNear(GeoNearSpec::parse(stage_document(stage, params)?)?)
        }
        "$count" => StageSpec::Count(CountSpec::parse(params)?),
        "$out" => {
            if position + 1 != total {
                return Err(AggError::invalid_stage("$out must be the last stage"));
            }
            match params.as_str() {
                Some(target) if !target.is_empty() => StageSpec::Out(target.to_string()),
                _ => {
                    return Err(AggError::invalid_stage(
                        "$out expects a non-empty collection name",
                    ))
                }
            }
        }
        other => {
            return Err(AggError::invalid_stage(format!(
                "unrecognized pipeline stage '{}'",
                other
            )))
        }
    };
    Ok(spec)
}

/// A validated pipeline, reusable across runs
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    stages: Vec<StageSpec>,
}

impl Pipeline {
    /// Parse stage records in declaration order
    pub fn parse(records: &[Value]) -> AggResult<Self> {
        let mut stages: Vec<StageSpec> = Vec::with_capacity(records.len());
        for (position, record) in records.iter().enumerate() {
            let preceding_match = stages.iter().rev().find_map(|s| match s {
                StageSpec::Match(filter) => Some(filter),
                _ => None,
            });
            let stage = parse_stage(record, position, records.len(), preceding_match)
                .map_err(|e| e.context(&format!("stage {}", position)))?;
            stages.push(stage);
        }
        let names = stages.iter().map(StageSpec::name).collect::<Vec<_>>().join(",");
        log_event(Event::PipelineCompiled, &[("stages", names.as_str())]);
        Ok(Self { stages })
    }

    /// Parse a JSON array of stage records
    pub fn from_json(json: &Json) -> AggResult<Self> {
        let items = json
            .as_array()
            .ok_or_else(|| AggError::invalid_stage("a pipeline must be an array of stages"))?;
        let records = items
            .iter()
            .map(from_json)
            .collect::<Result<Vec<Value>, _>>()?;
        Self::parse(&records)
    }

    pub fn from_stages(stages: Vec<StageSpec>) -> Self {
        Self { stages }
    }

    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Target of a trailing `$out`
    pub fn out_target(&self) -> Option<&str> {
        match self.stages.last() {
            Some(StageSpec::Out(name)) => Some(name),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;
    use serde_json::json;

    fn parse(j: Json) -> AggResult<Pipeline> {
        Pipeline::from_json(&j)
    }

    #[test]
    fn test_parse_all_stage_kinds() {
        let pipeline = parse(json!([
            {"$match": {"qty": {"$gt": 1}}},
            {"$addFields": {"total": {"$multiply": ["$qty", 2]}}},
            {"$set": {"flag": true}},
            {"$unwind": "$tags"},
            {"$project": {"qty": 1, "total": 1, "tags": 1}},
            {"$sort": {"qty": -1}},
            {"$skip": 1},
            {"$limit": 5},
            {"$group": {"_id": "$tags", "n": {"$sum": 1}}},
            {"$bucket": {"groupBy": "$n", "boundaries": [0, 10, 100]}},
            {"$bucketAuto": {"groupBy": "$count", "buckets": 2}},
            {"$count": "buckets"},
            {"$out": "summary"}
        ]))
        .unwrap();
        let names: Vec<&str> = pipeline.stages().iter().map(StageSpec::name).collect();
        assert_eq!(
            names,
            vec![
                "$match", "$addFields", "$addFields", "$unwind", "$project", "$sort", "$skip",
                "$limit", "$group", "$bucket", "$bucketAuto", "$count", "$out"
            ]
        );
        assert_eq!(pipeline.out_target(), Some("summary"));
    }

    #[test]
    fn test_unknown_stage_rejected() {
        let err = parse(json!([{"$lookup": {}}])).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidStageSpec);
    }

    #[test]
    fn test_stage_needs_single_key() {
        let err = parse(json!([{"$match": {}, "$limit": 1}])).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidStageSpec);
    }

    #[test]
    fn test_out_must_be_last() {
        let err = parse(json!([{"$out": "x"}, {"$limit": 1}])).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidStageSpec);
    }

    #[test]
    fn test_geo_near_must_be_first() {
        let err = parse(json!([
            {"$limit": 1},
            {"$geoNear": {"near": [0.0, 0.0], "distanceField": "d"}}
        ]))
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidStageSpec);
    }

    #[test]
    fn test_text_only_in_first_match() {
        assert!(parse(json!([{"$match": {"$text": {"$search": "tea"}}}])).is_ok());
        let err = parse(json!([
            {"$limit": 3},
            {"$match": {"$text": {"$search": "tea"}}}
        ]))
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidStageSpec);
    }

    #[test]
    fn test_limit_and_skip_bounds() {
        assert!(parse(json!([{"$limit": 0}])).is_err());
        assert!(parse(json!([{"$skip": -1}])).is_err());
        assert!(parse(json!([{"$skip": 0}])).is_ok());
        assert!(parse(json!([{"$limit": 2.5}])).is_err());
    }

    #[test]
    fn test_positional_projection_needs_match() {
        let err = parse(json!([{"$project": {"grades.$": 1}}])).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidStageSpec);
        assert!(parse(json!([
            {"$match": {"grades": {"$gte": 85}}},
            {"$project": {"grades.$": 1}}
        ]))
        .is_ok());
    }

    #[test]
    fn test_pipeline_must_be_array() {
        assert!(parse(json!({"$match": {}})).is_err());
    }
}
