//! Total order over values
//!
//! Canonical order of kinds:
//! Missing < Null < Numbers < String < Document < Array < Boolean < Date
//! < ObjectId < GeoPoint.
//!
//! Numbers of different kinds compare numerically; NaN is the lowest
//! number. Strings compare by bytes. Documents compare field by field (key,
//! then value), arrays element by element, and a shorter prefix sorts first.

use std::cmp::Ordering;

use super::number::Number;
use super::types::Value;

/// Rank of a value's kind in the canonical order
pub fn canonical_rank(value: &Value) -> u8 {
    match value {
        Value::Missing => 0,
        Value::Null => 1,
        Value::Int32(_) | Value::Int64(_) | Value::Double(_) | Value::Decimal(_) => 2,
        Value::String(_) => 3,
        Value::Document(_) => 4,
        Value::Array(_) => 5,
        Value::Boolean(_) => 6,
        Value::Date(_) => 7,
        Value::ObjectId(_) => 8,
        Value::GeoPoint(_) => 9,
    }
}

/// Compare two values under the total order
pub fn compare(a: &Value, b: &Value) -> Ordering {
    let rank = canonical_rank(a).cmp(&canonical_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }

    match (a, b) {
        (Value::String(x), Value::String(y)) => x.as_bytes().cmp(y.as_bytes()),
        (Value::Boolean(x), Value::Boolean(y)) => x.cmp(y),
        (Value::Date(x), Value::Date(y)) => x.cmp(y),
        (Value::ObjectId(x), Value::ObjectId(y)) => x.cmp(y),
        (Value::GeoPoint(x), Value::GeoPoint(y)) => x
            .lon
            .total_cmp(&y.lon)
            .then_with(|| x.lat.total_cmp(&y.lat)),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Document(x), Value::Document(y)) => {
            for ((lk, lv), (rk, rv)) in x.iter().zip(y.iter()) {
                let ord = compare_field(lv, rv).then_with(|| lk.cmp(rk));
                let ord = match ord {
                    Ordering::Equal => compare(lv, rv),
                    other => other,
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => match (Number::from_value(a), Number::from_value(b)) {
            (Some(x), Some(y)) => x.cmp_numeric(y),
            _ => Ordering::Equal,
        },
    }
}

// Fields of embedded documents order by value kind first, then key name.
fn compare_field(a: &Value, b: &Value) -> Ordering {
    canonical_rank(a).cmp(&canonical_rank(b))
}

/// Semantic equality under the total order (`Int32(1) == Double(1.0)`)
pub fn equal(a: &Value, b: &Value) -> bool {
    compare(a, b) == Ordering::Equal
}

/// Comparison restricted to a single type bracket.
///
/// Returns `None` when the values belong to different brackets; query
/// comparison operators never match across brackets. Missing is treated as
/// Null so `{$gte: null}` matches absent fields.
pub fn bracket_compare(a: &Value, b: &Value) -> Option<Ordering> {
    let norm = |v: &Value| if v.is_missing() { 1 } else { canonical_rank(v) };
    if norm(a) != norm(b) {
        return None;
    }
    if a.is_nullish() && b.is_nullish() {
        return Some(Ordering::Equal);
    }
    Some(compare(a, b))
}

/// Value wrapper ordered by [`compare`], usable as a map key
#[derive(Debug, Clone)]
pub struct OrdValue(pub Value);

impl PartialEq for OrdValue {
    fn eq(&self, other: &Self) -> bool {
        compare(&self.0, &other.0) == Ordering::Equal
    }
}

impl Eq for OrdValue {}

impl PartialOrd for OrdValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrdValue {
    fn cmp(&self, other: &Self) -> Ordering {
        compare(&self.0, &other.0)
    }
}
