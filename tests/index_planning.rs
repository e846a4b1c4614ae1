//! Index Planning Tests
//!
//! Access path selection observed through `Collection::explain` and
//! checked against collection-scan results:
//! - Single-field and compound index scans
//! - Multikey indexes and parallel arrays
//! - Index-ordered sorts
//! - Hints and their rejections
//! - Text index limits

use aeropipe::index::IndexOptions;
use aeropipe::value::document_from_json;
use aeropipe::{
    AggregateOptions, Collection, Document, EngineConfig, ErrorCode, Hint, Pipeline,
};
use serde_json::json;

fn doc(j: serde_json::Value) -> Document {
    document_from_json(&j).unwrap()
}

fn pipeline(j: serde_json::Value) -> Pipeline {
    Pipeline::from_json(&j).unwrap()
}

fn run(c: &Collection, p: &Pipeline, options: &AggregateOptions) -> Vec<Document> {
    c.aggregate(p, options).unwrap().collect_documents().unwrap()
}

fn people() -> Collection {
    let c = Collection::new("people", EngineConfig::default());
    for n in 0..50 {
        c.insert_one(doc(json!({
            "_id": n,
            "age": n % 25,
            "city": if n % 2 == 0 { "Oslo" } else { "Lima" },
            "tags": [format!("t{}", n % 3), format!("t{}", n % 5)]
        })))
        .unwrap();
    }
    c
}

// =============================================================================
// Index Scans
// =============================================================================

/// A selective range uses the index and agrees with a collection scan
#[test]
fn test_range_scan_matches_collection_scan() {
    let c = people();
    c.create_index(&doc(json!({"age": 1})), IndexOptions::default())
        .unwrap();
    let p = pipeline(json!([{"$match": {"age": {"$gte": 3, "$lt": 6}}}]));

    let plan = c.explain(&p, &AggregateOptions::default()).unwrap();
    assert_eq!(plan.strategy, "IXSCAN");
    assert_eq!(plan.index_used.as_deref(), Some("age_1"));
    assert_eq!(plan.estimated_cost, 6);
    assert_eq!(plan.stages, vec!["$match".to_string()]);
    assert!(plan.bounds[0].starts_with("age: "));

    let indexed = run(&c, &p, &AggregateOptions::default());
    let scanned = run(&c, &p, &AggregateOptions::default().hint(Hint::CollectionScan));
    assert_eq!(indexed.len(), 6);
    assert_eq!(indexed, scanned);
}

/// The cheapest index wins
#[test]
fn test_cheapest_index_selected() {
    let c = people();
    c.create_index(&doc(json!({"age": 1})), IndexOptions::default())
        .unwrap();
    c.create_index(&doc(json!({"city": 1})), IndexOptions::default())
        .unwrap();
    let p = pipeline(json!([{"$match": {"city": "Oslo", "age": 4}}]));
    let plan = c.explain(&p, &AggregateOptions::default()).unwrap();
    assert_eq!(plan.index_used.as_deref(), Some("age_1"));
    assert_eq!(plan.estimated_cost, 2);

    let out = run(&c, &p, &AggregateOptions::default());
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].get("_id").and_then(|v| v.as_i64()), Some(4));
}

/// Compound index bounds cover an equality prefix then one range
#[test]
fn test_compound_prefix_bounds() {
    let c = people();
    c.create_index(&doc(json!({"city": 1, "age": -1})), IndexOptions::default())
        .unwrap();
    let p = pipeline(json!([{"$match": {"city": "Lima", "age": {"$gt": 20}}}]));
    let plan = c.explain(&p, &AggregateOptions::default()).unwrap();
    assert_eq!(plan.strategy, "IXSCAN");
    assert_eq!(plan.index_used.as_deref(), Some("city_1_age_-1"));
    assert_eq!(plan.bounds.len(), 2);

    let indexed = run(&c, &p, &AggregateOptions::default());
    let scanned = run(&c, &p, &AggregateOptions::default().hint(Hint::CollectionScan));
    assert_eq!(indexed, scanned);
    assert!(!indexed.is_empty());
}

/// A filter on a non-indexed field falls back to a collection scan
#[test]
fn test_unindexed_filter_scans() {
    let c = people();
    c.create_index(&doc(json!({"age": 1})), IndexOptions::default())
        .unwrap();
    let p = pipeline(json!([{"$match": {"city": "Oslo"}}]));
    let plan = c.explain(&p, &AggregateOptions::default()).unwrap();
    assert_eq!(plan.strategy, "COLLSCAN");
    assert_eq!(plan.index_used, None);
    assert_eq!(plan.estimated_cost, 50);
    assert_eq!(plan.stages, vec!["$match".to_string()]);
}

// =============================================================================
// Multikey
// =============================================================================

/// Each document is returned once even when several elements match
#[test]
fn test_multikey_scan_has_no_duplicates() {
    let c = people();
    c.create_index(&doc(json!({"tags": 1})), IndexOptions::default())
        .unwrap();
    let p = pipeline(json!([{"$match": {"tags": "t0"}}]));
    let plan = c.explain(&p, &AggregateOptions::default()).unwrap();
    assert_eq!(plan.strategy, "IXSCAN");

    let indexed = run(&c, &p, &AggregateOptions::default());
    let scanned = run(&c, &p, &AggregateOptions::default().hint(Hint::CollectionScan));
    assert_eq!(indexed, scanned);
}

/// Two array fields in one compound key are rejected
#[test]
fn test_parallel_arrays_rejected() {
    let c = Collection::new("pairs", EngineConfig::default());
    c.create_index(&doc(json!({"a": 1, "b": 1})), IndexOptions::default())
        .unwrap();
    c.insert_one(doc(json!({"a": [1, 2], "b": 3}))).unwrap();
    let err = c
        .insert_one(doc(json!({"a": [1, 2], "b": [3, 4]})))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ParallelArrays);
    assert_eq!(c.len(), 1);
}

// =============================================================================
// Index Order
// =============================================================================

/// A sort on the full index key reads the index backwards
#[test]
fn test_sort_uses_index_order() {
    let c = Collection::new("scores", EngineConfig::default());
    c.create_index(&doc(json!({"score": 1})), IndexOptions::default())
        .unwrap();
    for score in [40, 10, 30, 50, 20] {
        c.insert_one(doc(json!({"score": score}))).unwrap();
    }
    let p = pipeline(json!([
        {"$sort": {"score": -1}},
        {"$limit": 3},
        {"$project": {"_id": 0, "score": 1}}
    ]));
    let plan = c.explain(&p, &AggregateOptions::default()).unwrap();
    assert_eq!(plan.strategy, "INDEX_ORDER");
    assert_eq!(plan.bounds, vec!["direction: backward".to_string()]);
    assert_eq!(plan.stages, vec!["$limit".to_string(), "$project".to_string()]);

    let out = run(&c, &p, &AggregateOptions::default());
    assert_eq!(
        out,
        vec![
            doc(json!({"score": 50})),
            doc(json!({"score": 40})),
            doc(json!({"score": 30}))
        ]
    );
}

/// A sort on a key prefix still sorts in memory
#[test]
fn test_partial_key_sort_does_not_use_index_order() {
    let c = people();
    c.create_index(&doc(json!({"city": 1, "age": 1})), IndexOptions::default())
        .unwrap();
    let p = pipeline(json!([{"$sort": {"city": 1}}]));
    let plan = c.explain(&p, &AggregateOptions::default()).unwrap();
    assert_eq!(plan.strategy, "COLLSCAN");
    assert_eq!(plan.stages, vec!["$sort".to_string()]);
}

// =============================================================================
// Hints
// =============================================================================

/// A hint forces the named index even when a scan would be cheaper
#[test]
fn test_hint_forces_index() {
    let c = people();
    c.create_index(&doc(json!({"age": 1})), IndexOptions::default())
        .unwrap();
    c.create_index(&doc(json!({"city": 1})), IndexOptions::default())
        .unwrap();
    let p = pipeline(json!([{"$match": {"city": "Oslo", "age": 4}}]));
    let hinted = AggregateOptions::default().hint(Hint::Index("city_1".into()));
    let plan = c.explain(&p, &hinted).unwrap();
    assert_eq!(plan.index_used.as_deref(), Some("city_1"));

    let out = run(&c, &p, &hinted);
    assert_eq!(out, run(&c, &p, &AggregateOptions::default()));
}

/// Unknown indexes cannot be hinted
#[test]
fn test_hint_unknown_index() {
    let c = people();
    let p = pipeline(json!([{"$match": {"age": 4}}]));
    let err = c
        .aggregate(&p, &AggregateOptions::default().hint(Hint::Index("nope".into())))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::IndexNotFound);
}

/// Partial indexes cannot be hinted
#[test]
fn test_hint_partial_index_rejected() {
    let c = people();
    c.create_index(
        &doc(json!({"age": 1})),
        IndexOptions::default().partial_filter(doc(json!({"city": "Oslo"}))),
    )
    .unwrap();
    let p = pipeline(json!([{"$match": {"age": 4}}]));
    let err = c
        .explain(&p, &AggregateOptions::default().hint(Hint::Index("age_1".into())))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidStageSpec);

    let plan = c.explain(&p, &AggregateOptions::default()).unwrap();
    assert_eq!(plan.strategy, "COLLSCAN");
}

// =============================================================================
// Text Index Limits
// =============================================================================

/// Only one text index per collection
#[test]
fn test_second_text_index_rejected() {
    let c = Collection::new("docs", EngineConfig::default());
    c.create_index(&doc(json!({"title": "text"})), IndexOptions::default())
        .unwrap();
    let err = c
        .create_index(&doc(json!({"body": "text"})), IndexOptions::default())
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::TextIndexLimitExceeded);
}

/// A text match explains as a TEXT access path
#[test]
fn test_text_explain() {
    let c = Collection::new("docs", EngineConfig::default());
    c.create_index(&doc(json!({"title": "text"})), IndexOptions::default())
        .unwrap();
    c.insert_one(doc(json!({"title": "river boats", "year": 2020})))
        .unwrap();
    c.insert_one(doc(json!({"title": "mountain boats", "year": 1990})))
        .unwrap();
    let p = pipeline(json!([
        {"$match": {"$text": {"$search": "boats"}, "year": {"$gt": 2000}}},
        {"$count": "n"}
    ]));
    let plan = c.explain(&p, &AggregateOptions::default()).unwrap();
    assert_eq!(plan.strategy, "TEXT");
    assert_eq!(plan.index_used.as_deref(), Some("title_text"));
    assert_eq!(plan.stages, vec!["$match".to_string(), "$count".to_string()]);

    let out = run(&c, &p, &AggregateOptions::default());
    assert_eq!(out, vec![doc(json!({"n": 1}))]);
}
