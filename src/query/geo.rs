//! Geospatial helpers
//!
//! Distances are great-circle (haversine) distances in meters on a sphere
//! of radius 6 378 100 m. Containment tests treat longitude/latitude as
//! planar coordinates, which is accurate for polygons that are small
//! relative to the sphere and do not cross the antimeridian.

use crate::errors::{AggError, AggResult};
use crate::value::{GeoPoint, Value};

/// Earth radius used for all distance computations, in meters
pub const EARTH_RADIUS_METERS: f64 = 6_378_100.0;

/// Great-circle distance between two points in meters
pub fn haversine_distance(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * h.sqrt().min(1.0).asin()
}

/// A stored or queried geometry
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(GeoPoint),
    /// Outer ring first, then holes; rings are closed
    Polygon(Vec<Vec<GeoPoint>>),
}

impl Geometry {
    /// Interpret a stored value as a geometry: GeoPoint, GeoJSON Point or
    /// Polygon, or a legacy `[lon, lat]` pair
    pub fn from_value(value: &Value) -> Option<Geometry> {
        if let Some(point) = GeoPoint::from_value(value) {
            return Some(Geometry::Point(point));
        }
        let doc = value.as_document()?;
        match doc.get("type").and_then(Value::as_str) {
            Some("Polygon") => {
                let rings = doc.get("coordinates")?.as_array()?;
                let mut parsed = Vec::with_capacity(rings.len());
                for ring in rings {
                    parsed.push(parse_ring(ring)?);
                }
                if parsed.is_empty() {
                    return None;
                }
                Some(Geometry::Polygon(parsed))
            }
            _ => None,
        }
    }

    /// Parse a `$geometry` operand
    pub fn parse(value: &Value) -> AggResult<Geometry> {
        Geometry::from_value(value).ok_or_else(|| {
            AggError::invalid_stage(format!("invalid GeoJSON geometry: {}", value))
        })
    }

    pub fn vertices(&self) -> Vec<GeoPoint> {
        match self {
            Geometry::Point(p) => vec![*p],
            Geometry::Polygon(rings) => rings.first().cloned().unwrap_or_default(),
        }
    }

    /// Distance in meters from `origin` to the closest part of the geometry
    pub fn distance_from(&self, origin: GeoPoint) -> f64 {
        match self {
            Geometry::Point(p) => haversine_distance(origin, *p),
            Geometry::Polygon(rings) => {
                if polygon_contains(rings, origin) {
                    return 0.0;
                }
                self.vertices()
                    .into_iter()
                    .map(|v| haversine_distance(origin, v))
                    .fold(f64::INFINITY, f64::min)
            }
        }
    }

    /// Point reported by `includeLocs`
    pub fn location(&self) -> Value {
        match self {
            Geometry::Point(p) => Value::GeoPoint(*p),
            Geometry::Polygon(rings) => Value::Array(
                rings
                    .iter()
                    .map(|ring| Value::Array(ring.iter().map(|p| Value::GeoPoint(*p)).collect()))
                    .collect(),
            ),
        }
    }
}

fn parse_ring(value: &Value) -> Option<Vec<GeoPoint>> {
    let items = value.as_array()?;
    let mut ring = Vec::with_capacity(items.len() + 1);
    for item in items {
        ring.push(GeoPoint::from_value(item)?);
    }
    if ring.len() < 3 {
        return None;
    }
    if ring.first() != ring.last() {
        ring.push(ring[0]);
    }
    Some(ring)
}

fn ring_contains(ring: &[GeoPoint], p: GeoPoint) -> bool {
    let mut inside = false;
    let n = ring.len();
    let mut j = n - 1;
    for i in 0..n {
        let (a, b) = (ring[i], ring[j]);
        if (a.lat > p.lat) != (b.lat > p.lat)
            && p.lon < (b.lon - a.lon) * (p.lat - a.lat) / (b.lat - a.lat) + a.lon
        {
            inside = !inside;
        }
        j = i;
    }
    inside || ring.iter().any(|v| v == &p)
}

fn polygon_contains(rings: &[Vec<GeoPoint>], p: GeoPoint) -> bool {
    match rings.split_first() {
        Some((outer, holes)) => {
            ring_contains(outer, p) && !holes.iter().any(|hole| ring_contains(hole, p))
        }
        None => false,
    }
}

fn segments_cross(p1: GeoPoint, p2: GeoPoint, q1: GeoPoint, q2: GeoPoint) -> bool {
    let orient = |a: GeoPoint, b: GeoPoint, c: GeoPoint| {
        (b.lon - a.lon) * (c.lat - a.lat) - (b.lat - a.lat) * (c.lon - a.lon)
    };
    let d1 = orient(q1, q2, p1);
    let d2 = orient(q1, q2, p2);
    let d3 = orient(p1, p2, q1);
    let d4 = orient(p1, p2, q2);
    ((d1 > 0.0) != (d2 > 0.0)) && ((d3 > 0.0) != (d4 > 0.0))
}

fn edges(ring: &[GeoPoint]) -> impl Iterator<Item = (GeoPoint, GeoPoint)> + '_ {
    ring.windows(2).map(|w| (w[0], w[1]))
}

/// Whether two geometries share at least one point
pub fn intersects(a: &Geometry, b: &Geometry) -> bool {
    match (a, b) {
        (Geometry::Point(p), Geometry::Point(q)) => p == q,
        (Geometry::Point(p), Geometry::Polygon(rings))
        | (Geometry::Polygon(rings), Geometry::Point(p)) => polygon_contains(rings, *p),
        (Geometry::Polygon(ra), Geometry::Polygon(rb)) => {
            let (outer_a, outer_b) = match (ra.first(), rb.first()) {
                (Some(x), Some(y)) => (x, y),
                _ => return false,
            };
            outer_a.iter().any(|p| polygon_contains(rb, *p))
                || outer_b.iter().any(|p| polygon_contains(ra, *p))
                || edges(outer_a)
                    .any(|(p1, p2)| edges(outer_b).any(|(q1, q2)| segments_cross(p1, p2, q1, q2)))
        }
    }
}

/// `$geoWithin` region
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Polygon(Vec<Vec<GeoPoint>>),
    CenterSphere { center: GeoPoint, radius_radians: f64 },
    Box { bottom_left: GeoPoint, top_right: GeoPoint },
}

impl Shape {
    /// Parse the `$geoWithin` operand
    pub fn parse(value: &Value) -> AggResult<Shape> {
        let doc = value
            .as_document()
            .ok_or_else(|| AggError::invalid_stage("$geoWithin expects an object"))?;
        let (key, arg) = doc.single_entry().ok_or_else(|| {
            AggError::invalid_stage("$geoWithin expects exactly one shape operator")
        })?;
        match key.as_str() {
            "$geometry" => match Geometry::parse(arg)? {
                Geometry::Polygon(rings) => Ok(Shape::Polygon(rings)),
                Geometry::Point(_) => Err(AggError::invalid_stage(
                    "$geoWithin $geometry must be a Polygon",
                )),
            },
            "$polygon" => parse_ring(arg)
                .map(|ring| Shape::Polygon(vec![ring]))
                .ok_or_else(|| AggError::invalid_stage("$polygon expects at least 3 points")),
            "$centerSphere" => {
                let parts = arg
                    .as_array()
                    .filter(|parts| parts.len() == 2)
                    .ok_or_else(|| {
                        AggError::invalid_stage("$centerSphere expects [[lon, lat], radius]")
                    })?;
                let center = GeoPoint::from_value(&parts[0]).ok_or_else(|| {
                    AggError::invalid_stage("$centerSphere center must be [lon, lat]")
                })?;
                let radius_radians = parts[1]
                    .as_f64()
                    .filter(|r| *r >= 0.0 && r.is_finite())
                    .ok_or_else(|| {
                        AggError::invalid_stage("$centerSphere radius must be a non-negative number")
                    })?;
                Ok(Shape::CenterSphere {
                    center,
                    radius_radians,
                })
            }
            "$box" => {
                let corners = arg
                    .as_array()
                    .filter(|c| c.len() == 2)
                    .ok_or_else(|| AggError::invalid_stage("$box expects two corners"))?;
                match (
                    GeoPoint::from_value(&corners[0]),
                    GeoPoint::from_value(&corners[1]),
                ) {
                    (Some(bottom_left), Some(top_right)) => Ok(Shape::Box {
                        bottom_left,
                        top_right,
                    }),
                    _ => Err(AggError::invalid_stage("$box corners must be [lon, lat]")),
                }
            }
            other => Err(AggError::invalid_stage(format!(
                "unsupported $geoWithin shape '{}'",
                other
            ))),
        }
    }

    fn contains_point(&self, p: GeoPoint) -> bool {
        match self {
            Shape::Polygon(rings) => polygon_contains(rings, p),
            Shape::CenterSphere {
                center,
                radius_radians,
            } => haversine_distance(*center, p) <= radius_radians * EARTH_RADIUS_METERS,
            Shape::Box {
                bottom_left,
                top_right,
            } => {
                p.lon >= bottom_left.lon
                    && p.lon <= top_right.lon
                    && p.lat >= bottom_left.lat
                    && p.lat <= top_right.lat
            }
        }
    }

    /// Whether the whole geometry lies inside the shape
    pub fn contains(&self, geometry: &Geometry) -> bool {
        geometry
            .vertices()
            .into_iter()
            .all(|v| self.contains_point(v))
    }
}
