//! `$geoNear`
//!
//! Always the first stage. The planner resolves the 2dsphere index and
//! hands over the hits already filtered to `[minDistance, maxDistance]`
//! and ordered by ascending distance. The stage applies the `query`
//! filter, writes the distance field and stops after `limit` rows.

use std::rc::Rc;

use crate::collection::DocumentSource;
use crate::errors::{AggError, AggResult};
use crate::expr::Metadata;
use crate::index::GeoHit;
use crate::query::Filter;
use crate::value::path::set_path;
use crate::value::{Document, FieldPath, GeoPoint, Value};

use super::{ExecContext, Row, RowStream};

#[derive(Debug, Clone)]
pub struct GeoNearSpec {
    pub near: GeoPoint,
    pub distance_field: FieldPath,
    pub min_distance: Option<f64>,
    pub max_distance: Option<f64>,
    pub limit: Option<u64>,
    pub query: Option<Filter>,
    /// Indexed field to use when several 2dsphere indexes exist
    pub key: Option<FieldPath>,
    pub include_locs: Option<FieldPath>,
    pub distance_multiplier: f64,
}

fn non_negative(option: &str, value: &Value) -> AggResult<f64> {
    value
        .as_f64()
        .filter(|v| *v >= 0.0 && v.is_finite())
        .ok_or_else(|| {
            AggError::invalid_stage(format!("$geoNear {} must be a non-negative number", option))
        })
}

fn string_path(option: &str, value: &Value) -> AggResult<FieldPath> {
    let name = value
        .as_str()
        .ok_or_else(|| AggError::invalid_stage(format!("$geoNear {} must be a string", option)))?;
    FieldPath::parse(name)
}

impl GeoNearSpec {
    pub fn parse(spec: &Document) -> AggResult<Self> {
        let mut near = None;
        let mut distance_field = None;
        let mut min_distance = None;
        let mut max_distance = None;
        let mut limit = None;
        let mut query = None;
        let mut key = None;
        let mut include_locs = None;
        let mut distance_multiplier = 1.0;
        for (option, value) in spec.iter() {
            match option.as_str() {
                "near" => {
                    near = Some(GeoPoint::from_value(value).ok_or_else(|| {
                        AggError::invalid_stage(format!(
                            "$geoNear near must be a GeoJSON point or [lon, lat] pair, got {}",
                            value
                        ))
                    })?)
                }
                "distanceField" => distance_field = Some(string_path(option, value)?),
                "minDistance" => min_distance = Some(non_negative(option, value)?),
                "maxDistance" => max_distance = Some(non_negative(option, value)?),
                "limit" | "num" => {
                    let n = value.as_i64().filter(|n| *n > 0).ok_or_else(|| {
                        AggError::invalid_stage(format!(
                            "$geoNear {} must be a positive integer",
                            option
                        ))
                    })?;
                    limit = Some(n as u64);
                }
                "query" => {
                    let filter = Filter::parse_value(value)?;
                    if filter.contains_text() {
                        return Err(AggError::invalid_stage(
                            "$geoNear query cannot contain $text",
                        ));
                    }
                    query = Some(filter);
                }
                "key" => key = Some(string_path(option, value)?),
                "includeLocs" => include_locs = Some(string_path(option, value)?),
                "distanceMultiplier" => {
                    distance_multiplier = non_negative(option, value)?;
                }
                "spherical" => {
                    if value.as_bool().is_none() {
                        return Err(AggError::invalid_stage(
                            "$geoNear spherical must be a boolean",
                        ));
                    }
                }
                other => {
                    return Err(AggError::invalid_stage(format!(
                        "$geoNear: unknown option '{}'",
                        other
                    )))
                }
            }
        }
        if let (Some(min), Some(max)) = (min_distance, max_distance) {
            if min > max {
                return Err(AggError::invalid_stage(
                    "$geoNear minDistance exceeds maxDistance",
                ));
            }
        }
        Ok(Self {
            near: near.ok_or_else(|| AggError::invalid_stage("$geoNear requires near"))?,
            distance_field: distance_field
                .ok_or_else(|| AggError::invalid_stage("$geoNear requires distanceField"))?,
            min_distance,
            max_distance,
            limit,
            query,
            key,
            include_locs,
            distance_multiplier,
        })
    }
}

pub struct GeoNearStage {
    source: Rc<dyn DocumentSource>,
    hits: std::vec::IntoIter<GeoHit>,
    spec: GeoNearSpec,
    emitted: u64,
}

impl GeoNearStage {
    pub fn new(source: Rc<dyn DocumentSource>, hits: Vec<GeoHit>, spec: GeoNearSpec) -> Self {
        Self {
            source,
            hits: hits.into_iter(),
            spec,
            emitted: 0,
        }
    }
}

impl RowStream for GeoNearStage {
    fn next_row(&mut self, ctx: &mut ExecContext) -> AggResult<Option<Row>> {
        if self.spec.limit.map_or(false, |limit| self.emitted >= limit) {
            return Ok(None);
        }
        for hit in self.hits.by_ref() {
            let Some(mut doc) = self.source.fetch(hit.id) else {
                continue;
            };
            ctx.stats.docs_examined += 1;
            if let Some(query) = &self.spec.query {
                match query.matches(&doc) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        ctx.recover("$geoNear", e)?;
                        continue;
                    }
                }
            }
            let distance = hit.distance * self.spec.distance_multiplier;
            set_path(&mut doc, &self.spec.distance_field, Value::Double(distance));
            if let Some(locs) = &self.spec.include_locs {
                set_path(&mut doc, locs, hit.location);
            }
            self.emitted += 1;
            let meta = Metadata {
                text_score: None,
                geo_distance: Some(distance),
            };
            return Ok(Some(Row::with_meta(doc, meta)));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::test_support::{ctx, doc, drain};
    use serde_json::json;

    fn places() -> Rc<dyn DocumentSource> {
        let docs: Vec<Document> = vec![
            doc(json!({"name": "a", "open": true})),
            doc(json!({"name": "b", "open": false})),
            doc(json!({"name": "c", "open": true})),
        ];
        Rc::new(docs)
    }

    fn hits() -> Vec<GeoHit> {
        vec![
            GeoHit { id: 2, distance: 10.0, location: Value::GeoPoint(GeoPoint::new(0.0, 0.0)) },
            GeoHit { id: 1, distance: 20.0, location: Value::GeoPoint(GeoPoint::new(0.0, 0.0)) },
            GeoHit { id: 0, distance: 30.0, location: Value::GeoPoint(GeoPoint::new(0.0, 0.0)) },
        ]
    }

    #[test]
    fn test_parse_requires_near_and_distance_field() {
        assert!(GeoNearSpec::parse(&doc(json!({"distanceField": "d"}))).is_err());
        assert!(GeoNearSpec::parse(&doc(json!({"near": [0, 0]}))).is_err());
        let spec = GeoNearSpec::parse(&doc(json!({
            "near": {"type": "Point", "coordinates": [-73.9, 40.7]},
            "distanceField": "dist.calculated",
            "maxDistance": 2000,
            "num": 5,
            "spherical": true
        })))
        .unwrap();
        assert_eq!(spec.limit, Some(5));
        assert_eq!(spec.max_distance, Some(2000.0));
    }

    #[test]
    fn test_query_limit_and_distance_field() {
        let spec = GeoNearSpec::parse(&doc(json!({
            "near": [0, 0],
            "distanceField": "d",
            "query": {"open": true},
            "limit": 1,
            "distanceMultiplier": 0.001
        })))
        .unwrap();
        let mut stage = GeoNearStage::new(places(), hits(), spec);
        let out = drain(&mut stage, &mut ctx());
        assert_eq!(out, vec![doc(json!({"name": "c", "open": true, "d": 0.01}))]);
    }

    #[test]
    fn test_rejects_text_in_query() {
        let err = GeoNearSpec::parse(&doc(json!({
            "near": [0, 0],
            "distanceField": "d",
            "query": {"$text": {"$search": "x"}}
        })));
        assert!(err.is_err());
    }
}
