//! In-memory collection
//!
//! Records live in a `BTreeMap` keyed by a monotonically increasing
//! record id, so a scan always visits records in insertion order. Every
//! mutation updates the index catalog synchronously; a write rejected by
//! any index leaves both the records and the indexes untouched.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::rc::{Rc, Weak};

use chrono::{DateTime, Utc};

use crate::config::EngineConfig;
use crate::errors::{AggError, AggResult};
use crate::executor::{Projection, SortSpec};
use crate::index::{IndexCatalog, IndexOptions, IndexSpec, RecordId, ID_INDEX_NAME};
use crate::observability::{log_event, Event};
use crate::pipeline::{AggregateCursor, AggregateOptions, Pipeline, StageSpec};
use crate::planner::ExplainPlan;
use crate::query::Filter;
use crate::value::{Document, ObjectId, Value};

use super::database::{Database, DatabaseInner};
use super::options::{FindOptions, InsertManyResult, WriteError};
use super::source::DocumentSource;

#[derive(Debug)]
struct CollectionState {
    name: String,
    records: BTreeMap<RecordId, Document>,
    next_id: RecordId,
    indexes: IndexCatalog,
    config: EngineConfig,
    database: Weak<DatabaseInner>,
}

/// Shared handle to one collection; clones address the same records
#[derive(Debug, Clone)]
pub struct Collection {
    inner: Rc<RefCell<CollectionState>>,
}

/// Give a document an `_id` when it has none; `_id` is always first
fn prepare_document(mut doc: Document) -> AggResult<(Value, Document)> {
    match doc.remove("_id") {
        Some(Value::Array(_)) => Err(AggError::type_mismatch("_id cannot be an array")),
        Some(id) => {
            doc.insert_first("_id", id.clone());
            Ok((id, doc))
        }
        None => {
            let id = Value::ObjectId(ObjectId::new());
            doc.insert_first("_id", id.clone());
            Ok((id, doc))
        }
    }
}

fn rejected(name: &str, err: AggError) -> AggError {
    log_event(
        Event::WriteRejected,
        &[("collection", name), ("code", err.code().code())],
    );
    err
}

impl CollectionState {
    fn store(&mut self, doc: Document) -> AggResult<Value> {
        let (id_value, doc) = prepare_document(doc)?;
        let id = self.next_id;
        if let Err(err) = self.indexes.insert(id, &doc) {
            return Err(rejected(&self.name, err));
        }
        self.records.insert(id, doc);
        self.next_id += 1;
        Ok(id_value)
    }

    fn matching(&self, filter: &Filter, first_only: bool) -> AggResult<Vec<RecordId>> {
        let mut ids = Vec::new();
        for (id, doc) in &self.records {
            if filter.matches(doc)? {
                ids.push(*id);
                if first_only {
                    break;
                }
            }
        }
        Ok(ids)
    }

    fn delete(&mut self, ids: &[RecordId]) -> u64 {
        let mut deleted = 0;
        for id in ids {
            if let Some(doc) = self.records.remove(id) {
                self.indexes.remove(*id, &doc);
                deleted += 1;
            }
        }
        deleted
    }
}

impl Collection {
    /// A standalone collection, not attached to a database
    pub fn new(name: impl Into<String>, config: EngineConfig) -> Self {
        Self::attached(name.into(), config, Weak::new())
    }

    pub(crate) fn attached(name: String, config: EngineConfig, database: Weak<DatabaseInner>) -> Self {
        let state = CollectionState {
            name,
            records: BTreeMap::new(),
            next_id: 0,
            indexes: IndexCatalog::new(),
            config,
            database,
        };
        Self {
            inner: Rc::new(RefCell::new(state)),
        }
    }

    pub fn name(&self) -> String {
        self.inner.borrow().name.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().records.is_empty()
    }

    /// Every stored document in record order
    pub fn documents(&self) -> Vec<Document> {
        self.inner.borrow().records.values().cloned().collect()
    }

    /// Store one document, generating an ObjectId `_id` when absent
    pub fn insert_one(&self, doc: Document) -> AggResult<Value> {
        self.inner.borrow_mut().store(doc)
    }

    /// Store several documents.
    ///
    /// Ordered inserts stop at the first rejected document; unordered
    /// inserts attempt every document and report each failure.
    pub fn insert_many(&self, docs: Vec<Document>, ordered: bool) -> InsertManyResult {
        let mut state = self.inner.borrow_mut();
        let mut result = InsertManyResult::default();
        for (index, doc) in docs.into_iter().enumerate() {
            match state.store(doc) {
                Ok(id) => result.inserted_ids.push(id),
                Err(error) => {
                    result.write_errors.push(WriteError { index, error });
                    if ordered {
                        break;
                    }
                }
            }
        }
        result
    }

    /// Remove the first document matching `filter`; returns 0 or 1
    pub fn delete_one(&self, filter: &Document) -> AggResult<u64> {
        let filter = Filter::parse(filter)?;
        let mut state = self.inner.borrow_mut();
        let ids = state.matching(&filter, true)?;
        Ok(state.delete(&ids))
    }

    pub fn delete_many(&self, filter: &Document) -> AggResult<u64> {
        let filter = Filter::parse(filter)?;
        let mut state = self.inner.borrow_mut();
        let ids = state.matching(&filter, false)?;
        Ok(state.delete(&ids))
    }

    /// Replace the first document matching `filter`, keeping its `_id` and
    /// record position; returns the number of documents replaced
    pub fn replace_one(&self, filter: &Document, replacement: Document) -> AggResult<u64> {
        let filter = Filter::parse(filter)?;
        let mut state = self.inner.borrow_mut();
        let Some(id) = state.matching(&filter, true)?.first().copied() else {
            return Ok(0);
        };
        let Some(old) = state.records.get(&id).cloned() else {
            return Ok(0);
        };
        let old_id = old.get("_id").cloned().unwrap_or(Value::Null);
        let mut new = replacement;
        match new.remove("_id") {
            Some(given) if given != old_id => {
                return Err(AggError::invalid_stage(
                    "a replacement document cannot change _id",
                ))
            }
            _ => new.insert_first("_id", old_id),
        }
        if let Err(err) = state.indexes.replace(id, &old, &new) {
            return Err(rejected(&state.name, err));
        }
        state.records.insert(id, new);
        Ok(1)
    }

    /// Replace every document at once, keeping the index definitions.
    ///
    /// The new contents are indexed into a fresh catalog first; if any
    /// document is rejected the collection is left unchanged.
    pub fn replace_all(&self, docs: Vec<Document>) -> AggResult<usize> {
        let mut state = self.inner.borrow_mut();
        let mut catalog = IndexCatalog::new();
        let specs: Vec<IndexSpec> = state
            .indexes
            .iter()
            .filter(|i| i.name() != ID_INDEX_NAME)
            .map(|i| i.spec().clone())
            .collect();
        for spec in specs {
            catalog.create(spec, Vec::new())?;
        }

        let mut records = BTreeMap::new();
        let mut next_id = state.next_id;
        for doc in docs {
            let (_, doc) = prepare_document(doc)?;
            if let Err(err) = catalog.insert(next_id, &doc) {
                return Err(rejected(&state.name, err));
            }
            records.insert(next_id, doc);
            next_id += 1;
        }
        let written = records.len();
        state.records = records;
        state.indexes = catalog;
        state.next_id = next_id;
        Ok(written)
    }

    /// Build an index over the existing records; returns its name.
    ///
    /// Creating an index identical to an existing one is a no-op.
    pub fn create_index(&self, key_pattern: &Document, options: IndexOptions) -> AggResult<String> {
        let mut state = self.inner.borrow_mut();
        let spec = IndexSpec::build(key_pattern, &options, state.config.text_language())?;
        let name = spec.name.clone();
        let state = &mut *state;
        let created = state
            .indexes
            .create(spec, state.records.iter().map(|(id, doc)| (*id, doc)))?;
        if created {
            log_event(
                Event::IndexCreated,
                &[("collection", state.name.as_str()), ("index", name.as_str())],
            );
        }
        Ok(name)
    }

    pub fn drop_index(&self, name: &str) -> AggResult<()> {
        let mut state = self.inner.borrow_mut();
        state.indexes.drop(name)?;
        log_event(
            Event::IndexDropped,
            &[("collection", state.name.as_str()), ("index", name)],
        );
        Ok(())
    }

    /// Index definitions in creation order
    pub fn list_indexes(&self) -> Vec<Document> {
        self.inner.borrow().indexes.list()
    }

    /// Remove documents whose TTL-indexed date plus offset is at or before
    /// `now`; returns how many were removed
    pub fn expire_documents(&self, now: DateTime<Utc>) -> u64 {
        let mut state = self.inner.borrow_mut();
        let ids = state.indexes.expired(now);
        let removed = state.delete(&ids);
        if removed > 0 {
            let count = removed.to_string();
            log_event(
                Event::TtlExpired,
                &[("collection", state.name.as_str()), ("documents", count.as_str())],
            );
        }
        removed
    }

    /// Query with sort, skip, limit and projection applied in that order
    pub fn find(&self, filter: &Document, options: FindOptions) -> AggResult<AggregateCursor> {
        let filter = Filter::parse(filter)?;
        let mut stages = Vec::new();
        let has_filter = !matches!(&filter, Filter::And(items) if items.is_empty());
        if has_filter {
            stages.push(StageSpec::Match(filter.clone()));
        }
        if let Some(sort) = &options.sort {
            stages.push(StageSpec::Sort(SortSpec::parse(sort)?));
        }
        if options.skip > 0 {
            stages.push(StageSpec::Skip(options.skip));
        }
        if options.limit > 0 {
            stages.push(StageSpec::Limit(options.limit));
        }
        if let Some(projection) = &options.projection {
            let preceding = if has_filter { Some(&filter) } else { None };
            stages.push(StageSpec::Project(Projection::parse(projection, preceding)?));
        }
        self.aggregate(&Pipeline::from_stages(stages), &AggregateOptions::default())
    }

    /// Run `pipeline` over this collection
    pub fn aggregate(
        &self,
        pipeline: &Pipeline,
        options: &AggregateOptions,
    ) -> AggResult<AggregateCursor> {
        let (plan, config, database) = {
            let state = self.inner.borrow();
            let plan = pipeline.plan(Some(&state.indexes), state.records.len(), options)?;
            let database = state.database.upgrade().map(Database::from_inner);
            (plan, state.config.clone(), database)
        };
        let source: Rc<dyn DocumentSource> = Rc::new(self.clone());
        pipeline.open(plan, source, database.as_ref(), config)
    }

    /// Plan `pipeline` without running it
    pub fn explain(&self, pipeline: &Pipeline, options: &AggregateOptions) -> AggResult<ExplainPlan> {
        let state = self.inner.borrow();
        log_event(Event::ExplainBegin, &[("collection", state.name.as_str())]);
        let plan = pipeline.plan(Some(&state.indexes), state.records.len(), options)?;
        let explain = pipeline.describe(&plan);
        log_event(
            Event::ExplainComplete,
            &[("collection", state.name.as_str()), ("strategy", explain.strategy.as_str())],
        );
        Ok(explain)
    }
}

impl DocumentSource for Collection {
    fn next_after(&self, after: Option<RecordId>) -> Option<(RecordId, Document)> {
        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
        self.inner
            .borrow()
            .records
            .range((lower, Bound::Unbounded))
            .next()
            .map(|(id, doc)| (*id, doc.clone()))
    }

    fn fetch(&self, id: RecordId) -> Option<Document> {
        self.inner.borrow().records.get(&id).cloned()
    }

    fn record_count(&self) -> usize {
        self.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;
    use crate::planner::Hint;
    use crate::value::document_from_json;
    use chrono::TimeZone;
    use serde_json::json;

    fn doc(j: serde_json::Value) -> Document {
        document_from_json(&j).unwrap()
    }

    fn collection() -> Collection {
        Collection::new("items", EngineConfig::default())
    }

    #[test]
    fn test_insert_generates_object_id_first() {
        let c = collection();
        let id = c.insert_one(doc(json!({"name": "a"}))).unwrap();
        assert!(matches!(id, Value::ObjectId(_)));
        let stored = &c.documents()[0];
        assert_eq!(stored.keys().next().map(String::as_str), Some("_id"));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let c = collection();
        c.insert_one(doc(json!({"_id": 1}))).unwrap();
        let err = c.insert_one(doc(json!({"_id": 1}))).unwrap_err();
        assert_eq!(err.code(), ErrorCode::IndexConflict);
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_insert_many_ordered_stops() {
        let c = collection();
        let docs = vec![
            doc(json!({"_id": 1})),
            doc(json!({"_id": 1})),
            doc(json!({"_id": 2})),
        ];
        let result = c.insert_many(docs.clone(), true);
        assert_eq!(result.inserted_ids.len(), 1);
        assert_eq!(result.write_errors[0].index, 1);

        let unordered = collection();
        let result = unordered.insert_many(docs, false);
        assert_eq!(result.inserted_ids, vec![Value::Int32(1), Value::Int32(2)]);
        assert_eq!(result.write_errors.len(), 1);
    }

    #[test]
    fn test_delete_and_replace_maintain_indexes() {
        let c = collection();
        c.create_index(&doc(json!({"sku": 1})), IndexOptions::default().unique(true))
            .unwrap();
        c.insert_one(doc(json!({"_id": 1, "sku": "a"}))).unwrap();
        c.insert_one(doc(json!({"_id": 2, "sku": "b"}))).unwrap();

        assert_eq!(c.delete_one(&doc(json!({"sku": "a"}))).unwrap(), 1);
        c.insert_one(doc(json!({"_id": 3, "sku": "a"}))).unwrap();

        let err = c
            .replace_one(&doc(json!({"_id": 3})), doc(json!({"sku": "b"})))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::IndexConflict);
        assert_eq!(
            c.replace_one(&doc(json!({"_id": 3})), doc(json!({"sku": "c"})))
                .unwrap(),
            1
        );
        assert_eq!(c.delete_many(&doc(json!({}))).unwrap(), 2);
        assert!(c.is_empty());
    }

    #[test]
    fn test_replace_cannot_change_id() {
        let c = collection();
        c.insert_one(doc(json!({"_id": 1, "v": 1}))).unwrap();
        let err = c
            .replace_one(&doc(json!({"_id": 1})), doc(json!({"_id": 2, "v": 2})))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidStageSpec);
    }

    #[test]
    fn test_replace_all_keeps_indexes_and_is_atomic() {
        let c = collection();
        c.create_index(&doc(json!({"k": 1})), IndexOptions::default().unique(true))
            .unwrap();
        c.insert_one(doc(json!({"_id": 1, "k": 1}))).unwrap();

        let err = c
            .replace_all(vec![doc(json!({"k": 5})), doc(json!({"k": 5}))])
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::IndexConflict);
        assert_eq!(c.documents(), vec![doc(json!({"_id": 1, "k": 1}))]);

        assert_eq!(c.replace_all(vec![doc(json!({"k": 7}))]).unwrap(), 1);
        assert_eq!(c.list_indexes().len(), 2);
    }

    #[test]
    fn test_find_sorts_before_skip_and_limit() {
        let c = collection();
        for n in [5, 3, 9, 1, 7] {
            c.insert_one(doc(json!({"_id": n, "n": n}))).unwrap();
        }
        let options = FindOptions::default()
            .limit(2)
            .skip(1)
            .sort(doc(json!({"n": 1})))
            .projection(doc(json!({"_id": 0, "n": 1})));
        let out = c
            .find(&doc(json!({"n": {"$gt": 1}})), options)
            .unwrap()
            .collect_documents()
            .unwrap();
        assert_eq!(out, vec![doc(json!({"n": 5})), doc(json!({"n": 7}))]);
    }

    #[test]
    fn test_ttl_expiry() {
        let c = collection();
        c.create_index(
            &doc(json!({"createdAt": 1})),
            IndexOptions::default().expire_after_seconds(60),
        )
        .unwrap();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        c.insert_one(Document::from_pairs(vec![("createdAt", Value::Date(t0))]))
            .unwrap();
        c.insert_one(doc(json!({"createdAt": "not a date"}))).unwrap();

        assert_eq!(c.expire_documents(t0 + chrono::Duration::seconds(59)), 0);
        assert_eq!(c.expire_documents(t0 + chrono::Duration::seconds(60)), 1);
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_explain_uses_index() {
        let c = collection();
        c.create_index(&doc(json!({"age": 1})), IndexOptions::default())
            .unwrap();
        for age in 0..20 {
            c.insert_one(doc(json!({"age": age}))).unwrap();
        }
        let pipeline = Pipeline::from_json(&json!([{"$match": {"age": {"$lt": 5}}}])).unwrap();
        let explain = c.explain(&pipeline, &AggregateOptions::default()).unwrap();
        assert_eq!(explain.strategy, "IXSCAN");
        assert_eq!(explain.index_used.as_deref(), Some("age_1"));
        assert_eq!(explain.estimated_cost, 5);

        let forced = c
            .explain(&pipeline, &AggregateOptions::default().hint(Hint::CollectionScan))
            .unwrap();
        assert_eq!(forced.strategy, "COLLSCAN");
    }

    #[test]
    fn test_scan_observes_inserts_between_pulls() {
        let c = collection();
        c.insert_one(doc(json!({"_id": 1}))).unwrap();
        let pipeline = Pipeline::from_json(&json!([])).unwrap();
        let mut cursor = c.aggregate(&pipeline, &AggregateOptions::default()).unwrap();
        assert!(cursor.next().unwrap().is_ok());
        c.insert_one(doc(json!({"_id": 2}))).unwrap();
        assert!(cursor.next().unwrap().is_ok());
        assert!(cursor.next().is_none());
    }
}
