//! Database handle
//!
//! A `Database` is created explicitly with [`Database::open`] and torn
//! down with [`Database::close`]; there is no global state. It owns a set
//! of named collections and is what `$out` writes into.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::config::EngineConfig;
use crate::errors::{AggError, AggResult};
use crate::observability::{log_event, Event};
use crate::pipeline::{AggregateCursor, AggregateOptions, Pipeline};
use crate::planner::ExplainPlan;

use super::collection::Collection;

#[derive(Debug)]
pub(crate) struct DatabaseInner {
    config: EngineConfig,
    collections: RefCell<BTreeMap<String, Collection>>,
}

/// Shared handle to a set of named collections
#[derive(Debug, Clone)]
pub struct Database {
    inner: Rc<DatabaseInner>,
}

fn validate_name(name: &str) -> AggResult<()> {
    if name.is_empty() || name.contains('$') || name.contains('\0') {
        return Err(AggError::invalid_stage(format!(
            "invalid collection name '{}'",
            name
        )));
    }
    Ok(())
}

impl Database {
    /// Open a database after validating `config`
    pub fn open(config: EngineConfig) -> AggResult<Self> {
        config.validate()?;
        let mode = format!("{:?}", config.error_mode);
        log_event(Event::DatabaseOpened, &[("error_mode", mode.as_str())]);
        Ok(Self {
            inner: Rc::new(DatabaseInner {
                config,
                collections: RefCell::new(BTreeMap::new()),
            }),
        })
    }

    pub(crate) fn from_inner(inner: Rc<DatabaseInner>) -> Self {
        Self { inner }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// The named collection, created empty on first use
    pub fn collection(&self, name: &str) -> AggResult<Collection> {
        validate_name(name)?;
        let mut collections = self.inner.collections.borrow_mut();
        if let Some(existing) = collections.get(name) {
            return Ok(existing.clone());
        }
        let collection = Collection::attached(
            name.to_string(),
            self.inner.config.clone(),
            Rc::downgrade(&self.inner),
        );
        collections.insert(name.to_string(), collection.clone());
        log_event(Event::CollectionCreated, &[("collection", name)]);
        Ok(collection)
    }

    pub fn get_collection(&self, name: &str) -> Option<Collection> {
        self.inner.collections.borrow().get(name).cloned()
    }

    /// Remove a collection with its indexes; false when it did not exist
    pub fn drop_collection(&self, name: &str) -> bool {
        let dropped = self.inner.collections.borrow_mut().remove(name).is_some();
        if dropped {
            log_event(Event::CollectionDropped, &[("collection", name)]);
        }
        dropped
    }

    /// Collection names in lexicographic order
    pub fn collection_names(&self) -> Vec<String> {
        self.inner.collections.borrow().keys().cloned().collect()
    }

    fn existing(&self, name: &str) -> AggResult<Collection> {
        match self.get_collection(name) {
            Some(collection) => Ok(collection),
            None => self.collection(name),
        }
    }

    pub fn aggregate(
        &self,
        collection: &str,
        pipeline: &Pipeline,
        options: &AggregateOptions,
    ) -> AggResult<AggregateCursor> {
        self.existing(collection)?.aggregate(pipeline, options)
    }

    pub fn explain(
        &self,
        collection: &str,
        pipeline: &Pipeline,
        options: &AggregateOptions,
    ) -> AggResult<ExplainPlan> {
        self.existing(collection)?.explain(pipeline, options)
    }

    /// Drop every collection and release the handle
    pub fn close(self) {
        let count = {
            let mut collections = self.inner.collections.borrow_mut();
            let count = collections.len();
            collections.clear();
            count
        };
        let count = count.to_string();
        log_event(Event::DatabaseClosed, &[("collections", count.as_str())]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;
    use crate::value::{document_from_json, Document};
    use serde_json::json;

    fn doc(j: serde_json::Value) -> Document {
        document_from_json(&j).unwrap()
    }

    #[test]
    fn test_collection_is_shared() {
        let db = Database::open(EngineConfig::default()).unwrap();
        db.collection("a").unwrap().insert_one(doc(json!({"x": 1}))).unwrap();
        assert_eq!(db.collection("a").unwrap().len(), 1);
        assert_eq!(db.collection_names(), vec!["a".to_string()]);
        assert!(db.drop_collection("a"));
        assert!(db.get_collection("a").is_none());
    }

    #[test]
    fn test_invalid_collection_name() {
        let db = Database::open(EngineConfig::default()).unwrap();
        assert_eq!(
            db.collection("bad$name").unwrap_err().code(),
            ErrorCode::InvalidStageSpec
        );
    }

    #[test]
    fn test_open_validates_config() {
        let config = EngineConfig::default().with_max_blocking_stage_bytes(0);
        assert_eq!(
            Database::open(config).unwrap_err().code(),
            ErrorCode::InvalidConfig
        );
    }

    #[test]
    fn test_out_writes_target_collection() {
        let db = Database::open(EngineConfig::default()).unwrap();
        let sales = db.collection("sales").unwrap();
        for (item, qty) in [("a", 2), ("b", 1), ("a", 3)] {
            sales.insert_one(doc(json!({"item": item, "qty": qty}))).unwrap();
        }
        let pipeline = Pipeline::from_json(&json!([
            {"$group": {"_id": "$item", "total": {"$sum": "$qty"}}},
            {"$out": "totals"}
        ]))
        .unwrap();
        let out = db
            .aggregate("sales", &pipeline, &AggregateOptions::default())
            .unwrap()
            .collect_documents()
            .unwrap();
        assert!(out.is_empty());
        let totals = db.get_collection("totals").unwrap().documents();
        assert_eq!(
            totals,
            vec![
                doc(json!({"_id": "a", "total": 5})),
                doc(json!({"_id": "b", "total": 1}))
            ]
        );
    }

    #[test]
    fn test_close_drops_collections() {
        let db = Database::open(EngineConfig::default()).unwrap();
        let handle = db.clone();
        db.collection("a").unwrap();
        db.close();
        assert!(handle.collection_names().is_empty());
    }
}
