//! Pipeline Property Tests
//!
//! Randomized checks over generated collections:
//! - Running a pipeline twice yields identical output
//! - Index scans return exactly what a collection scan returns
//! - Unwind emits one row per array element
//! - Sort then limit 1 yields the minimum
//! - Bucket counts with a default cover every document

use aeropipe::index::IndexOptions;
use aeropipe::value::document_from_json;
use aeropipe::{AggregateOptions, Collection, Document, EngineConfig, Hint, Pipeline, Value};
use proptest::prelude::*;
use serde_json::json;

fn doc(j: serde_json::Value) -> Document {
    document_from_json(&j).unwrap()
}

/// A field value: a small integer, an array of them, or absent
fn field_value() -> impl Strategy<Value = Option<serde_json::Value>> {
    prop_oneof![
        4 => (-20i64..20).prop_map(|n| Some(json!(n))),
        2 => prop::collection::vec(-20i64..20, 0..4).prop_map(|v| Some(json!(v))),
        1 => Just(None),
    ]
}

fn collection_of(values: &[Option<serde_json::Value>]) -> Collection {
    let c = Collection::new("prop", EngineConfig::default());
    for (i, value) in values.iter().enumerate() {
        let mut d = json!({"_id": i as i64, "k": (i % 3) as i64});
        if let Some(v) = value {
            d["a"] = v.clone();
        }
        c.insert_one(doc(d)).unwrap();
    }
    c
}

fn run(c: &Collection, p: &Pipeline, options: &AggregateOptions) -> Vec<Document> {
    c.aggregate(p, options).unwrap().collect_documents().unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Same input, same pipeline, same output
    #[test]
    fn prop_pipeline_is_deterministic(values in prop::collection::vec(field_value(), 0..30)) {
        let c = collection_of(&values);
        let p = Pipeline::from_json(&json!([
            {"$unwind": {"path": "$a", "preserveNullAndEmptyArrays": true}},
            {"$group": {"_id": "$k", "total": {"$sum": "$a"}, "seen": {"$push": "$a"}}},
            {"$sort": {"total": -1}}
        ])).unwrap();
        let first = run(&c, &p, &AggregateOptions::default());
        let second = run(&c, &p, &AggregateOptions::default());
        prop_assert_eq!(first, second);
    }

    /// Indexed and scanned range queries agree, multikey included
    #[test]
    fn prop_index_scan_matches_collection_scan(
        values in prop::collection::vec(field_value(), 0..40),
        low in -25i64..25,
        width in 0i64..15,
        inclusive in any::<bool>(),
    ) {
        let c = collection_of(&values);
        c.create_index(&doc(json!({"a": 1})), IndexOptions::default()).unwrap();
        let upper = if inclusive { "$lte" } else { "$lt" };
        let p = Pipeline::from_json(&json!([
            {"$match": {"a": {"$gte": low, upper: low + width}}}
        ])).unwrap();

        let indexed = run(&c, &p, &AggregateOptions::default());
        let scanned = run(&c, &p, &AggregateOptions::default().hint(Hint::CollectionScan));
        prop_assert_eq!(indexed, scanned);
    }

    /// Equality on a compound prefix agrees with a scan
    #[test]
    fn prop_compound_equality_matches_scan(
        values in prop::collection::vec(field_value(), 0..40),
        k in 0i64..3,
        a in -20i64..20,
    ) {
        let c = collection_of(&values);
        c.create_index(&doc(json!({"k": 1, "a": -1})), IndexOptions::default()).unwrap();
        let p = Pipeline::from_json(&json!([{"$match": {"k": k, "a": a}}])).unwrap();
        let indexed = run(&c, &p, &AggregateOptions::default());
        let scanned = run(&c, &p, &AggregateOptions::default().hint(Hint::CollectionScan));
        prop_assert_eq!(indexed, scanned);
    }

    /// Unwind output size is the sum of array lengths
    #[test]
    fn prop_unwind_cardinality(lists in prop::collection::vec(prop::collection::vec(0i64..100, 0..6), 0..20)) {
        let docs: Vec<Document> = lists.iter().map(|l| doc(json!({"xs": l}))).collect();
        let expected: usize = lists.iter().map(Vec::len).sum();
        let preserved: usize = lists.iter().map(|l| l.len().max(1)).sum();

        let p = Pipeline::from_json(&json!([{"$unwind": "$xs"}])).unwrap();
        let out = p
            .execute_documents(docs.clone(), EngineConfig::default())
            .unwrap()
            .collect_documents()
            .unwrap();
        prop_assert_eq!(out.len(), expected);

        let keep = Pipeline::from_json(&json!([
            {"$unwind": {"path": "$xs", "preserveNullAndEmptyArrays": true}}
        ])).unwrap();
        let out = keep
            .execute_documents(docs, EngineConfig::default())
            .unwrap()
            .collect_documents()
            .unwrap();
        prop_assert_eq!(out.len(), preserved);
    }

    /// Sort ascending then limit 1 is the minimum
    #[test]
    fn prop_sort_limit_one_is_minimum(ns in prop::collection::vec(-1000i64..1000, 1..40)) {
        let docs: Vec<Document> = ns.iter().map(|n| doc(json!({"n": n}))).collect();
        let p = Pipeline::from_json(&json!([{"$sort": {"n": 1}}, {"$limit": 1}])).unwrap();
        let out = p
            .execute_documents(docs, EngineConfig::default())
            .unwrap()
            .collect_documents()
            .unwrap();
        prop_assert_eq!(out.len(), 1);
        prop_assert_eq!(out[0].get("n").and_then(Value::as_i64), ns.iter().copied().min());
    }

    /// With a default bucket every document is counted exactly once
    #[test]
    fn prop_bucket_counts_cover_input(values in prop::collection::vec(field_value(), 0..40)) {
        let docs: Vec<Document> = values
            .iter()
            .map(|v| match v {
                Some(v) => doc(json!({"a": v})),
                None => doc(json!({})),
            })
            .collect();
        let total = docs.len() as i64;
        let p = Pipeline::from_json(&json!([{"$bucket": {
            "groupBy": "$a",
            "boundaries": [-20, -5, 0, 5, 20],
            "default": "rest"
        }}])).unwrap();
        let out = p
            .execute_documents(docs, EngineConfig::default())
            .unwrap()
            .collect_documents()
            .unwrap();
        let counted: i64 = out
            .iter()
            .filter_map(|d| d.get("count"))
            .filter_map(Value::as_i64)
            .sum();
        prop_assert_eq!(counted, total);
    }
}
