//! 2dsphere index
//!
//! Stores the geometries found at the indexed field of each record. Near
//! queries compute the haversine distance from the origin to every indexed
//! geometry and return records ordered by ascending distance, ties by
//! record id.

use std::collections::BTreeMap;

use crate::errors::{AggError, AggResult};
use crate::query::Geometry;
use crate::value::path::collect;
use crate::value::{Document, FieldPath, GeoPoint, Value};

use super::tree::RecordId;

/// A record within the distance window
#[derive(Debug, Clone, PartialEq)]
pub struct GeoHit {
    pub id: RecordId,
    /// Meters from the origin to the nearest indexed geometry
    pub distance: f64,
    /// The geometry the distance was measured to
    pub location: Value,
}

#[derive(Debug)]
pub struct GeoIndex {
    path: FieldPath,
    entries: BTreeMap<RecordId, Vec<Geometry>>,
}

impl GeoIndex {
    pub fn new(path: FieldPath) -> Self {
        Self {
            path,
            entries: BTreeMap::new(),
        }
    }

    pub fn path(&self) -> &FieldPath {
        &self.path
    }

    /// Geometries stored at the indexed field; absent and null fields are
    /// not indexed
    pub fn extract(&self, doc: &Document) -> AggResult<Vec<Geometry>> {
        let mut out = Vec::new();
        for leaf in collect(doc, &self.path) {
            if leaf.is_nullish() {
                continue;
            }
            if let Some(geometry) = Geometry::from_value(leaf) {
                out.push(geometry);
                continue;
            }
            let items = match leaf {
                Value::Array(items) => items,
                other => {
                    return Err(AggError::type_mismatch(format!(
                        "can't extract geo keys from '{}': {}",
                        self.path, other
                    )))
                }
            };
            for item in items {
                let geometry = Geometry::from_value(item).ok_or_else(|| {
                    AggError::type_mismatch(format!(
                        "can't extract geo keys from '{}': {}",
                        self.path, item
                    ))
                })?;
                out.push(geometry);
            }
        }
        Ok(out)
    }

    pub fn insert(&mut self, id: RecordId, geometries: Vec<Geometry>) {
        if geometries.is_empty() {
            self.entries.remove(&id);
        } else {
            self.entries.insert(id, geometries);
        }
    }

    pub fn remove(&mut self, id: RecordId) {
        self.entries.remove(&id);
    }

    /// Records whose nearest geometry lies within `[min, max]` meters
    pub fn near(&self, origin: GeoPoint, min: Option<f64>, max: Option<f64>) -> Vec<GeoHit> {
        let mut hits: Vec<GeoHit> = self
            .entries
            .iter()
            .filter_map(|(id, geometries)| {
                geometries
                    .iter()
                    .map(|g| (g.distance_from(origin), g))
                    .min_by(|a, b| a.0.total_cmp(&b.0))
                    .map(|(distance, g)| GeoHit {
                        id: *id,
                        distance,
                        location: g.location(),
                    })
            })
            .filter(|hit| min.map_or(true, |m| hit.distance >= m))
            .filter(|hit| max.map_or(true, |m| hit.distance <= m))
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id)));
        hits
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::document_from_json;
    use serde_json::json;

    fn index_with(docs: &[(u64, serde_json::Value)]) -> GeoIndex {
        let mut index = GeoIndex::new(FieldPath::parse("location").unwrap());
        for (id, j) in docs {
            let doc = document_from_json(j).unwrap();
            let geometries = index.extract(&doc).unwrap();
            index.insert(*id, geometries);
        }
        index
    }

    #[test]
    fn test_near_orders_by_distance() {
        let index = index_with(&[
            (1, json!({"location": {"type": "Point", "coordinates": [-122.42, 37.78]}})),
            (2, json!({"location": [-122.40, 37.77]})),
            (3, json!({"name": "no location"})),
        ]);
        let hits = index.near(GeoPoint::new(-122.40, 37.77), None, None);
        assert_eq!(hits.iter().map(|h| h.id).collect::<Vec<_>>(), vec![2, 1]);
        assert!(hits[0].distance < 1.0);
    }

    #[test]
    fn test_distance_window() {
        let index = index_with(&[
            (1, json!({"location": [0.0, 0.0]})),
            (2, json!({"location": [0.0, 0.01]})),
            (3, json!({"location": [0.0, 1.0]})),
        ]);
        let hits = index.near(GeoPoint::new(0.0, 0.0), Some(10.0), Some(5_000.0));
        assert_eq!(hits.iter().map(|h| h.id).collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_invalid_location_rejected() {
        let index = GeoIndex::new(FieldPath::parse("location").unwrap());
        let doc = document_from_json(&json!({"location": "nowhere"})).unwrap();
        assert!(index.extract(&doc).is_err());
    }
}
