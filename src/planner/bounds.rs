//! Key range construction for index scans
//!
//! Only top-level conjuncts of a filter contribute bounds. Each indexed
//! field is constrained by an equality point or by a range; the usable
//! prefix of a compound index is a run of points optionally followed by
//! one range. Every other predicate stays in the residual filter, which the
//! executor re-checks on every candidate.
//!
//! # Invariants
//!
//! - Bounds never exclude a document the filter matches
//! - Range ends stay inside the operand's type bracket
//! - On a multikey index only one range condition per field is used

use std::cmp::Ordering;
use std::fmt;
use std::ops::Bound;

use chrono::{DateTime, Utc};

use crate::index::{Direction, IndexKey, KeyPart};
use crate::query::{Condition, Filter};
use crate::value::ordering::{bracket_compare, canonical_rank};
use crate::value::{compare, Document, FieldPath, ObjectId, Value};

/// One end of a value range
#[derive(Debug, Clone, PartialEq)]
pub enum RangeEnd {
    /// Value plus inclusivity
    Value(Value, bool),
    Unbounded,
}

/// Constraint the filter places on one indexed field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldBounds {
    Point(Value),
    Range { lower: RangeEnd, upper: RangeEnd },
}

impl fmt::Display for FieldBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldBounds::Point(v) => write!(f, "[{}, {}]", v, v),
            FieldBounds::Range { lower, upper } => {
                match lower {
                    RangeEnd::Value(v, true) => write!(f, "[{}", v)?,
                    RangeEnd::Value(v, false) => write!(f, "({}", v)?,
                    RangeEnd::Unbounded => write!(f, "[MinKey")?,
                }
                match upper {
                    RangeEnd::Value(v, true) => write!(f, ", {}]", v),
                    RangeEnd::Value(v, false) => write!(f, ", {})", v),
                    RangeEnd::Unbounded => write!(f, ", MaxKey]"),
                }
            }
        }
    }
}

/// Smallest value of a type bracket, or None past the last bracket
fn bracket_floor(rank: u8) -> Option<Value> {
    let floor = match rank {
        0 | 1 => Value::Null,
        2 => Value::Double(f64::NAN),
        3 => Value::String(String::new()),
        4 => Value::Document(Document::new()),
        5 => Value::Array(Vec::new()),
        6 => Value::Boolean(false),
        7 => Value::Date(DateTime::<Utc>::MIN_UTC),
        8 => Value::ObjectId(ObjectId::from_bytes([0; 12])),
        _ => return None,
    };
    Some(floor)
}

fn lower_end(value: &Value) -> RangeEnd {
    bracket_floor(canonical_rank(value))
        .map_or(RangeEnd::Unbounded, |floor| RangeEnd::Value(floor, true))
}

fn upper_end(value: &Value) -> RangeEnd {
    bracket_floor(canonical_rank(value) + 1)
        .map_or(RangeEnd::Unbounded, |floor| RangeEnd::Value(floor, false))
}

/// Range implied by a single comparison, if it can bound an index scan
fn condition_range(condition: &Condition) -> Option<FieldBounds> {
    let (value, lower_side, inclusive) = match condition {
        Condition::Gt(v) => (v, true, false),
        Condition::Gte(v) => (v, true, true),
        Condition::Lt(v) => (v, false, false),
        Condition::Lte(v) => (v, false, true),
        _ => return None,
    };
    match value {
        Value::Array(_) | Value::Missing => None,
        Value::Null if inclusive => Some(FieldBounds::Point(Value::Null)),
        Value::Null => None,
        v if lower_side => Some(FieldBounds::Range {
            lower: RangeEnd::Value(v.clone(), inclusive),
            upper: upper_end(v),
        }),
        v => Some(FieldBounds::Range {
            lower: lower_end(v),
            upper: RangeEnd::Value(v.clone(), inclusive),
        }),
    }
}

fn tighter_lower(a: RangeEnd, b: RangeEnd) -> RangeEnd {
    match (&a, &b) {
        (RangeEnd::Unbounded, _) => b,
        (_, RangeEnd::Unbounded) => a,
        (RangeEnd::Value(x, xi), RangeEnd::Value(y, yi)) => match compare(x, y) {
            Ordering::Less => b,
            Ordering::Greater => a,
            Ordering::Equal => RangeEnd::Value(x.clone(), *xi && *yi),
        },
    }
}

fn tighter_upper(a: RangeEnd, b: RangeEnd) -> RangeEnd {
    match (&a, &b) {
        (RangeEnd::Unbounded, _) => b,
        (_, RangeEnd::Unbounded) => a,
        (RangeEnd::Value(x, xi), RangeEnd::Value(y, yi)) => match compare(x, y) {
            Ordering::Less => a,
            Ordering::Greater => b,
            Ordering::Equal => RangeEnd::Value(x.clone(), *xi && *yi),
        },
    }
}

fn intersect(a: FieldBounds, b: FieldBounds) -> FieldBounds {
    match (a, b) {
        (
            FieldBounds::Range { lower: l1, upper: u1 },
            FieldBounds::Range { lower: l2, upper: u2 },
        ) => FieldBounds::Range {
            lower: tighter_lower(l1, l2),
            upper: tighter_upper(u1, u2),
        },
        (point @ FieldBounds::Point(_), _) | (_, point @ FieldBounds::Point(_)) => point,
    }
}

/// Bounds the top-level conjuncts of `filter` place on `path`
pub fn field_bounds(filter: &Filter, path: &FieldPath, multikey: bool) -> Option<FieldBounds> {
    let mut point = None;
    let mut range: Option<FieldBounds> = None;
    for clause in filter.conjuncts() {
        let conditions = match clause {
            Filter::Field { path: p, conditions } if p == path => conditions,
            _ => continue,
        };
        for condition in conditions {
            match condition {
                Condition::Eq(Value::Array(_)) => {}
                Condition::Eq(v) if point.is_none() => point = Some(v.clone()),
                other => {
                    let Some(bounds) = condition_range(other) else {
                        continue;
                    };
                    if let FieldBounds::Point(v) = bounds {
                        point.get_or_insert(v);
                        continue;
                    }
                    range = match range {
                        None => Some(bounds),
                        Some(existing) if multikey => Some(existing),
                        Some(existing) => Some(intersect(existing, bounds)),
                    };
                }
            }
        }
    }
    point.map(FieldBounds::Point).or(range)
}

/// Usable bounds for an index: leading points and at most one range
pub fn prefix_bounds(
    filter: &Filter,
    fields: &[(FieldPath, Direction)],
    multikey: bool,
) -> Vec<FieldBounds> {
    let mut prefix = Vec::new();
    for (path, _) in fields {
        match field_bounds(filter, path, multikey) {
            Some(point @ FieldBounds::Point(_)) => prefix.push(point),
            Some(range) => {
                prefix.push(range);
                break;
            }
            None => break,
        }
    }
    prefix
}

/// Whether a range admits no value at all
fn is_empty_range(lower: &RangeEnd, upper: &RangeEnd) -> bool {
    match (lower, upper) {
        (RangeEnd::Value(l, li), RangeEnd::Value(u, ui)) => match bracket_compare(l, u) {
            Some(Ordering::Greater) => true,
            Some(Ordering::Equal) => !(*li && *ui),
            _ => compare(l, u) == Ordering::Greater,
        },
        _ => false,
    }
}

/// Key-space interval covering `prefix` on an index with `fields`
///
/// Returns None when the bounds cannot match any key.
pub fn key_range(
    prefix: &[FieldBounds],
    fields: &[(FieldPath, Direction)],
) -> Option<(Bound<IndexKey>, Bound<IndexKey>)> {
    let mut low = Vec::with_capacity(fields.len());
    let mut high = Vec::with_capacity(fields.len());
    let mut low_inclusive = true;
    let mut high_inclusive = true;

    for (bounds, (_, direction)) in prefix.iter().zip(fields) {
        match bounds {
            FieldBounds::Point(v) => {
                low.push(KeyPart::value(v.clone(), *direction));
                high.push(KeyPart::value(v.clone(), *direction));
            }
            FieldBounds::Range { lower, upper } => {
                if is_empty_range(lower, upper) {
                    return None;
                }
                let (first, last) = match direction {
                    Direction::Ascending => (lower, upper),
                    Direction::Descending => (upper, lower),
                };
                match first {
                    RangeEnd::Value(v, inclusive) => {
                        low.push(KeyPart::value(v.clone(), *direction));
                        low_inclusive = *inclusive;
                    }
                    RangeEnd::Unbounded => low.push(KeyPart::Min),
                }
                match last {
                    RangeEnd::Value(v, inclusive) => {
                        high.push(KeyPart::value(v.clone(), *direction));
                        high_inclusive = *inclusive;
                    }
                    RangeEnd::Unbounded => high.push(KeyPart::Max),
                }
            }
        }
    }

    // Trailing fields: pad so an exclusive end skips every key sharing the
    // constrained prefix.
    for _ in prefix.len()..fields.len() {
        low.push(if low_inclusive { KeyPart::Min } else { KeyPart::Max });
        high.push(if high_inclusive { KeyPart::Max } else { KeyPart::Min });
    }

    let lower = if low_inclusive {
        Bound::Included(IndexKey(low))
    } else {
        Bound::Excluded(IndexKey(low))
    };
    let upper = if high_inclusive {
        Bound::Included(IndexKey(high))
    } else {
        Bound::Excluded(IndexKey(high))
    };
    Some((lower, upper))
}
