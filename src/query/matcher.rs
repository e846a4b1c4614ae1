//! Filter evaluation
//!
//! A field predicate is tested against every value reachable through its
//! path. A condition is satisfied when any candidate satisfies it, or, for
//! array candidates, when any element does. Each condition of a field
//! predicate is tested independently, so `{a: {$gt: 1, $lt: 3}}` on
//! `a: [0, 5]` matches.

use std::cmp::Ordering;

use crate::errors::{AggError, AggResult};
use crate::expr::{evaluate, is_truthy};
use crate::value::ordering::{bracket_compare, equal};
use crate::value::path::collect;
use crate::value::{Document, Value};

use super::ast::{Condition, ElemMatch, Filter};
use super::geo::{intersects, Geometry};

impl Filter {
    /// Whether `doc` satisfies the filter
    pub fn matches(&self, doc: &Document) -> AggResult<bool> {
        match self {
            Filter::And(items) => {
                for item in items {
                    if !item.matches(doc)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Filter::Or(items) => {
                for item in items {
                    if item.matches(doc)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Filter::Nor(items) => {
                for item in items {
                    if item.matches(doc)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Filter::Field { path, conditions } => {
                let candidates = collect(doc, path);
                for condition in conditions {
                    if !condition.matches(&candidates)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Filter::Expr(expr) => Ok(is_truthy(&evaluate(expr, doc)?)),
            Filter::Text(_) => Err(AggError::text_index_required()),
        }
    }
}

/// True when a candidate, or an element of an array candidate, satisfies
/// `pred`
fn any_leaf(candidates: &[&Value], pred: impl Fn(&Value) -> bool) -> bool {
    candidates.iter().any(|c| {
        pred(*c)
            || match c {
                Value::Array(items) => items.iter().any(&pred),
                _ => false,
            }
    })
}

fn eq_match(operand: &Value, candidates: &[&Value]) -> bool {
    if operand.is_nullish() {
        return candidates.is_empty() || any_leaf(candidates, Value::is_nullish);
    }
    any_leaf(candidates, |v| equal(v, operand))
}

fn compare_match(operand: &Value, candidates: &[&Value], accept: fn(Ordering) -> bool) -> bool {
    if operand.is_nullish() && candidates.is_empty() {
        return accept(Ordering::Equal);
    }
    any_leaf(candidates, |v| bracket_compare(v, operand).map_or(false, accept))
}

impl Condition {
    /// Test the condition against the values found at its path
    pub fn matches(&self, candidates: &[&Value]) -> AggResult<bool> {
        let matched = match self {
            Condition::Eq(v) => eq_match(v, candidates),
            Condition::Ne(v) => !eq_match(v, candidates),
            Condition::Gt(v) => compare_match(v, candidates, Ordering::is_gt),
            Condition::Gte(v) => compare_match(v, candidates, Ordering::is_ge),
            Condition::Lt(v) => compare_match(v, candidates, Ordering::is_lt),
            Condition::Lte(v) => compare_match(v, candidates, Ordering::is_le),
            Condition::In(values) => values.iter().any(|v| eq_match(v, candidates)),
            Condition::Nin(values) => !values.iter().any(|v| eq_match(v, candidates)),
            Condition::Exists(expected) => !candidates.is_empty() == *expected,
            Condition::Type(specs) => {
                any_leaf(candidates, |v| specs.iter().any(|spec| spec.matches(v)))
            }
            Condition::Regex(regex) => {
                any_leaf(candidates, |v| v.as_str().map_or(false, |s| regex.is_match(s)))
            }
            Condition::Not(inner) => {
                for condition in inner {
                    if !condition.matches(candidates)? {
                        return Ok(true);
                    }
                }
                false
            }
            Condition::All(values) => {
                !values.is_empty() && values.iter().all(|v| eq_match(v, candidates))
            }
            Condition::ElemMatch(elem) => {
                for candidate in candidates {
                    if let Value::Array(items) = candidate {
                        for item in items {
                            if elem.matches(item)? {
                                return Ok(true);
                            }
                        }
                    }
                }
                false
            }
            Condition::Size(n) => candidates
                .iter()
                .any(|c| matches!(c, Value::Array(items) if items.len() as i64 == *n)),
            Condition::GeoWithin(shape) => candidates
                .iter()
                .filter_map(|c| Geometry::from_value(c))
                .any(|g| shape.contains(&g)),
            Condition::GeoIntersects(target) => candidates
                .iter()
                .filter_map(|c| Geometry::from_value(c))
                .any(|g| intersects(&g, target)),
        };
        Ok(matched)
    }
}

impl ElemMatch {
    /// Test a single array element
    pub fn matches(&self, element: &Value) -> AggResult<bool> {
        match self {
            ElemMatch::Conditions(conditions) => {
                let candidates = [element];
                for condition in conditions {
                    if !condition.matches(&candidates)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            ElemMatch::Filter(filter) => match element {
                Value::Document(doc) => filter.matches(doc),
                _ => Ok(false),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::document_from_json;
    use serde_json::json;

    fn check(filter: serde_json::Value, doc: serde_json::Value) -> bool {
        let filter = Filter::parse(&document_from_json(&filter).unwrap()).unwrap();
        filter.matches(&document_from_json(&doc).unwrap()).unwrap()
    }

    #[test]
    fn test_equality_and_array_membership() {
        assert!(check(json!({"a": 1}), json!({"a": 1})));
        assert!(check(json!({"a": 1}), json!({"a": 1.0})));
        assert!(check(json!({"tags": "red"}), json!({"tags": ["blue", "red"]})));
        assert!(check(json!({"tags": ["blue", "red"]}), json!({"tags": ["blue", "red"]})));
        assert!(!check(json!({"a": "1"}), json!({"a": 1})));
    }

    #[test]
    fn test_null_matches_missing() {
        assert!(check(json!({"a": null}), json!({"b": 1})));
        assert!(check(json!({"a": null}), json!({"a": null})));
        assert!(!check(json!({"a": null}), json!({"a": 0})));
        assert!(check(json!({"a": {"$ne": null}}), json!({"a": 0})));
        assert!(check(json!({"a": {"$gte": null}}), json!({})));
    }

    #[test]
    fn test_comparisons_stay_in_bracket() {
        assert!(check(json!({"a": {"$gt": 1}}), json!({"a": 2})));
        assert!(!check(json!({"a": {"$gt": 1}}), json!({"a": "zzz"})));
        assert!(!check(json!({"a": {"$lt": 1}}), json!({})));
        assert!(check(json!({"a": {"$gt": 1, "$lt": 3}}), json!({"a": [0, 5]})));
    }

    #[test]
    fn test_nested_and_array_of_documents() {
        let doc = json!({"items": [{"sku": "x", "qty": 1}, {"sku": "y", "qty": 7}]});
        assert!(check(json!({"items.sku": "y"}), doc.clone()));
        assert!(check(json!({"items.qty": {"$gt": 5}}), doc.clone()));
        assert!(!check(
            json!({"items": {"$elemMatch": {"sku": "x", "qty": {"$gt": 5}}}}),
            doc.clone()
        ));
        assert!(check(json!({"items.1.sku": "y"}), doc));
    }

    #[test]
    fn test_logical_operators() {
        let doc = json!({"a": 1, "b": 2});
        assert!(check(json!({"$or": [{"a": 5}, {"b": 2}]}), doc.clone()));
        assert!(!check(json!({"$nor": [{"a": 5}, {"b": 2}]}), doc.clone()));
        assert!(check(json!({"$and": [{"a": 1}, {"b": {"$in": [2, 3]}}]}), doc.clone()));
        assert!(check(json!({"a": {"$not": {"$gt": 3}}}), doc));
    }

    #[test]
    fn test_exists_type_size_all() {
        let doc = json!({"a": [1, 2, 3], "s": "text"});
        assert!(check(json!({"a": {"$exists": true}}), doc.clone()));
        assert!(check(json!({"z": {"$exists": false}}), doc.clone()));
        assert!(check(json!({"s": {"$type": "string"}}), doc.clone()));
        assert!(check(json!({"a": {"$type": "number"}}), doc.clone()));
        assert!(check(json!({"a": {"$size": 3}}), doc.clone()));
        assert!(check(json!({"a": {"$all": [3, 1]}}), doc.clone()));
        assert!(!check(json!({"a": {"$all": []}}), doc.clone()));
        assert!(check(json!({"a": {"$nin": [9]}}), doc));
    }

    #[test]
    fn test_regex_and_expr() {
        assert!(check(json!({"name": {"$regex": "^jo", "$options": "i"}}), json!({"name": "John"})));
        assert!(check(
            json!({"$expr": {"$gt": ["$spent", "$budget"]}}),
            json!({"spent": 10, "budget": 5})
        ));
    }

    #[test]
    fn test_geo_within_box() {
        let filter = json!({"loc": {"$geoWithin": {"$box": [[0, 0], [10, 10]]}}});
        assert!(check(filter.clone(), json!({"loc": [5, 5]})));
        assert!(check(filter.clone(), json!({"loc": {"type": "Point", "coordinates": [1, 1]}})));
        assert!(!check(filter, json!({"loc": [20, 5]})));
    }

    #[test]
    fn test_text_clause_needs_index() {
        let filter = Filter::parse(&document_from_json(&json!({"$text": {"$search": "x"}})).unwrap())
            .unwrap();
        let err = filter.matches(&Document::new()).unwrap_err();
        assert_eq!(err.code(), crate::errors::ErrorCode::TextIndexRequired);
    }
}
