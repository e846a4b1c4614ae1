//! Index catalog of a collection
//!
//! # API
//!
//! - `create(spec, records)` - Build an index over the existing records
//! - `drop(name)` - Remove an index (never `_id_`)
//! - `insert(id, doc)` / `remove(id, doc)` / `replace(id, old, new)` -
//!   Synchronous maintenance on every mutation
//! - `expired(now)` - Records eligible for TTL eviction
//!
//! Writes are two-phase: every index computes its entries and checks
//! uniqueness first, and entries are applied only when all indexes accept
//! the document. A rejected write leaves every index untouched.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::errors::{AggError, AggResult};
use crate::query::Geometry;
use crate::value::{Document, Value};

use super::geo_index::GeoIndex;
use super::key::{extract_keys, ExtractedKeys, IndexKey};
use super::spec::{IndexKind, IndexSpec, ID_INDEX_NAME};
use super::text_index::TextIndex;
use super::tree::{IndexTree, RecordId};

/// Storage behind an index
#[derive(Debug)]
pub enum IndexData {
    Tree(IndexTree),
    Text(TextIndex),
    Geo(GeoIndex),
}

/// Entries one document contributes to one index
enum Entries {
    Keys(ExtractedKeys),
    Text,
    Geo(Vec<Geometry>),
}

/// A live index: definition plus data
#[derive(Debug)]
pub struct Index {
    spec: IndexSpec,
    data: IndexData,
    multikey: bool,
}

impl Index {
    fn new(spec: IndexSpec) -> Self {
        let data = match spec.kind {
            IndexKind::Regular => IndexData::Tree(IndexTree::new()),
            IndexKind::Text => IndexData::Text(TextIndex::new(&spec)),
            IndexKind::Geo2dSphere => IndexData::Geo(GeoIndex::new(spec.fields[0].path.clone())),
        };
        Self {
            spec,
            data,
            multikey: false,
        }
    }

    pub fn spec(&self) -> &IndexSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn tree(&self) -> Option<&IndexTree> {
        match &self.data {
            IndexData::Tree(tree) => Some(tree),
            _ => None,
        }
    }

    pub fn text(&self) -> Option<&TextIndex> {
        match &self.data {
            IndexData::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn geo(&self) -> Option<&GeoIndex> {
        match &self.data {
            IndexData::Geo(geo) => Some(geo),
            _ => None,
        }
    }

    /// Whether any indexed document held an array in an indexed field
    pub fn is_multikey(&self) -> bool {
        self.multikey
    }

    /// Entries for `doc`, or None when the partial filter excludes it
    fn entries_for(&self, doc: &Document) -> AggResult<Option<Entries>> {
        if let Some(filter) = &self.spec.partial_filter {
            if !filter.matches(doc)? {
                return Ok(None);
            }
        }
        let entries = match &self.data {
            IndexData::Tree(_) => {
                Entries::Keys(extract_keys(&self.spec.name, doc, &self.spec.key_fields())?)
            }
            IndexData::Text(_) => Entries::Text,
            IndexData::Geo(geo) => Entries::Geo(geo.extract(doc)?),
        };
        Ok(Some(entries))
    }

    fn check_unique(&self, id: RecordId, entries: &Option<Entries>) -> AggResult<()> {
        if !self.spec.unique {
            return Ok(());
        }
        if let (IndexData::Tree(tree), Some(Entries::Keys(extracted))) = (&self.data, entries) {
            for key in &extracted.keys {
                if tree.lookup_eq(key).iter().any(|other| *other != id) {
                    return Err(AggError::index_conflict(&self.spec.name, key));
                }
            }
        }
        Ok(())
    }

    fn apply(&mut self, id: RecordId, doc: &Document, entries: Option<Entries>) {
        match (&mut self.data, entries) {
            (IndexData::Tree(tree), Some(Entries::Keys(extracted))) => {
                self.multikey |= extracted.multikey;
                for key in extracted.keys {
                    tree.insert(key, id);
                }
            }
            (IndexData::Text(text), Some(Entries::Text)) => text.insert(id, doc),
            (IndexData::Geo(geo), Some(Entries::Geo(geometries))) => geo.insert(id, geometries),
            _ => {}
        }
    }

    fn unapply(&mut self, id: RecordId, doc: &Document) {
        let keys: Vec<IndexKey> = match self.entries_for(doc) {
            Ok(Some(Entries::Keys(extracted))) => extracted.keys,
            _ => Vec::new(),
        };
        match &mut self.data {
            IndexData::Tree(tree) => {
                for key in &keys {
                    tree.remove(key, id);
                }
            }
            IndexData::Text(text) => text.remove(id),
            IndexData::Geo(geo) => geo.remove(id),
        }
    }
}

/// All indexes of one collection, in creation order
#[derive(Debug)]
pub struct IndexCatalog {
    indexes: Vec<Index>,
}

impl Default for IndexCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexCatalog {
    /// Catalog holding only the `_id_` index
    pub fn new() -> Self {
        Self {
            indexes: vec![Index::new(IndexSpec::id_index())],
        }
    }

    pub fn get(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.spec.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Index> {
        self.indexes.iter()
    }

    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    /// Index definitions in listing form
    pub fn list(&self) -> Vec<Document> {
        self.indexes.iter().map(|i| i.spec.to_document()).collect()
    }

    pub fn text_index(&self) -> Option<&Index> {
        self.indexes.iter().find(|i| i.spec.kind == IndexKind::Text)
    }

    pub fn geo_indexes(&self) -> Vec<&Index> {
        self.indexes
            .iter()
            .filter(|i| i.spec.kind == IndexKind::Geo2dSphere)
            .collect()
    }

    /// Build and register an index over `records`.
    ///
    /// Returns `false` when an identical index already exists.
    pub fn create<'a>(
        &mut self,
        spec: IndexSpec,
        records: impl IntoIterator<Item = (RecordId, &'a Document)>,
    ) -> AggResult<bool> {
        if let Some(existing) = self.get(&spec.name) {
            if existing.spec.same_definition(&spec) {
                return Ok(false);
            }
            return Err(AggError::invalid_index(format!(
                "an index named '{}' already exists with a different definition",
                spec.name
            )));
        }
        if spec.kind == IndexKind::Text {
            if let Some(text) = self.text_index() {
                return Err(AggError::text_index_limit(text.name()));
            }
        }
        if let Some(existing) = self
            .indexes
            .iter()
            .find(|i| i.spec.key_pattern() == spec.key_pattern())
        {
            return Err(AggError::invalid_index(format!(
                "index '{}' already covers this key pattern",
                existing.spec.name
            )));
        }

        let mut index = Index::new(spec);
        for (id, doc) in records {
            let entries = index.entries_for(doc)?;
            index.check_unique(id, &entries)?;
            index.apply(id, doc, entries);
        }
        debug!(index = %index.spec.name, multikey = index.multikey, "index built");
        self.indexes.push(index);
        Ok(true)
    }

    /// Remove an index by name
    pub fn drop(&mut self, name: &str) -> AggResult<IndexSpec> {
        if name == ID_INDEX_NAME {
            return Err(AggError::invalid_index("cannot drop the _id_ index"));
        }
        let position = self
            .indexes
            .iter()
            .position(|i| i.spec.name == name)
            .ok_or_else(|| AggError::index_not_found(name))?;
        Ok(self.indexes.remove(position).spec)
    }

    fn prepare(&self, id: RecordId, doc: &Document) -> AggResult<Vec<Option<Entries>>> {
        let mut prepared = Vec::with_capacity(self.indexes.len());
        for index in &self.indexes {
            let entries = index.entries_for(doc)?;
            index.check_unique(id, &entries)?;
            prepared.push(entries);
        }
        Ok(prepared)
    }

    /// Index a new record; nothing changes when any index rejects it
    pub fn insert(&mut self, id: RecordId, doc: &Document) -> AggResult<()> {
        let prepared = self.prepare(id, doc)?;
        for (index, entries) in self.indexes.iter_mut().zip(prepared) {
            index.apply(id, doc, entries);
        }
        Ok(())
    }

    /// Remove a record's entries from every index
    pub fn remove(&mut self, id: RecordId, doc: &Document) {
        for index in &mut self.indexes {
            index.unapply(id, doc);
        }
    }

    /// Swap a record's entries; nothing changes when any index rejects `new`
    pub fn replace(&mut self, id: RecordId, old: &Document, new: &Document) -> AggResult<()> {
        let prepared = self.prepare(id, new)?;
        for (index, entries) in self.indexes.iter_mut().zip(prepared) {
            index.unapply(id, old);
            index.apply(id, new, entries);
        }
        Ok(())
    }

    /// Records whose TTL-indexed date plus the index offset is at or
    /// before `now`, ascending
    pub fn expired(&self, now: DateTime<Utc>) -> Vec<RecordId> {
        let mut ids = BTreeSet::new();
        for index in &self.indexes {
            let (Some(seconds), Some(tree)) = (index.spec.expire_after_seconds, index.tree())
            else {
                continue;
            };
            for (key, record_ids) in tree.iter() {
                let Some(Value::Date(date)) = key.leading_value() else {
                    continue;
                };
                let due = Duration::try_seconds(seconds)
                    .and_then(|offset| date.checked_add_signed(offset))
                    .map_or(false, |deadline| deadline <= now);
                if due {
                    ids.extend(record_ids.iter().copied());
                }
            }
        }
        ids.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;
    use crate::index::spec::IndexOptions;
    use crate::query::TextLanguage;
    use crate::value::document_from_json;
    use serde_json::json;

    fn doc(j: serde_json::Value) -> Document {
        document_from_json(&j).unwrap()
    }

    fn spec(key: serde_json::Value, options: IndexOptions) -> IndexSpec {
        IndexSpec::build(&doc(key), &options, TextLanguage::English).unwrap()
    }

    #[test]
    fn test_id_index_always_present() {
        let mut catalog = IndexCatalog::new();
        assert!(catalog.get("_id_").is_some());
        assert_eq!(catalog.drop("_id_").unwrap_err().code(), ErrorCode::InvalidIndexSpec);
        assert_eq!(catalog.drop("nope").unwrap_err().code(), ErrorCode::IndexNotFound);
    }

    #[test]
    fn test_unique_rejects_duplicate_and_leaves_indexes_untouched() {
        let mut catalog = IndexCatalog::new();
        catalog
            .create(spec(json!({"email": 1}), IndexOptions::default().unique(true)), Vec::new())
            .unwrap();
        catalog.insert(1, &doc(json!({"_id": 1, "email": "a@x"}))).unwrap();
        let err = catalog
            .insert(2, &doc(json!({"_id": 2, "email": "a@x"})))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::IndexConflict);
        let id_tree = catalog.get("_id_").unwrap().tree().unwrap();
        assert_eq!(id_tree.entry_count(), 1);
    }

    #[test]
    fn test_partial_unique_skips_excluded_documents() {
        let mut catalog = IndexCatalog::new();
        let options = IndexOptions::default()
            .unique(true)
            .partial_filter(doc(json!({"email": {"$exists": true}})));
        catalog.create(spec(json!({"email": 1}), options), Vec::new()).unwrap();
        catalog.insert(1, &doc(json!({"_id": 1, "name": "a"}))).unwrap();
        catalog.insert(2, &doc(json!({"_id": 2, "name": "b"}))).unwrap();
        let tree = catalog.get("email_1").unwrap().tree().unwrap();
        assert_eq!(tree.entry_count(), 0);
    }

    #[test]
    fn test_create_over_existing_duplicates_fails() {
        let a = doc(json!({"_id": 1, "k": 5}));
        let b = doc(json!({"_id": 2, "k": 5}));
        let mut catalog = IndexCatalog::new();
        let err = catalog
            .create(
                spec(json!({"k": 1}), IndexOptions::default().unique(true)),
                vec![(1, &a), (2, &b)],
            )
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::IndexConflict);
        assert!(catalog.get("k_1").is_none());
    }

    #[test]
    fn test_second_text_index_rejected() {
        let mut catalog = IndexCatalog::new();
        catalog.create(spec(json!({"title": "text"}), IndexOptions::default()), Vec::new()).unwrap();
        let err = catalog
            .create(spec(json!({"body": "text"}), IndexOptions::default()), Vec::new())
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::TextIndexLimitExceeded);
    }

    #[test]
    fn test_identical_create_is_noop() {
        let mut catalog = IndexCatalog::new();
        assert!(catalog.create(spec(json!({"a": 1}), IndexOptions::default()), Vec::new()).unwrap());
        assert!(!catalog.create(spec(json!({"a": 1}), IndexOptions::default()), Vec::new()).unwrap());
        assert!(catalog
            .create(spec(json!({"a": 1}), IndexOptions::default().name("other")), Vec::new())
            .is_err());
    }

    #[test]
    fn test_replace_moves_keys() {
        let mut catalog = IndexCatalog::new();
        catalog.create(spec(json!({"n": 1}), IndexOptions::default()), Vec::new()).unwrap();
        let old = doc(json!({"_id": 1, "n": 1}));
        let new = doc(json!({"_id": 1, "n": 2}));
        catalog.insert(1, &old).unwrap();
        catalog.replace(1, &old, &new).unwrap();
        let tree = catalog.get("n_1").unwrap().tree().unwrap();
        assert!(tree.lookup_eq(&IndexKey::single(Value::Int32(1))).is_empty());
        assert_eq!(tree.lookup_eq(&IndexKey::single(Value::Int32(2))), &[1]);
    }

    #[test]
    fn test_expired_uses_earliest_date() {
        let mut catalog = IndexCatalog::new();
        catalog
            .create(
                spec(json!({"at": 1}), IndexOptions::default().expire_after_seconds(60)),
                Vec::new(),
            )
            .unwrap();
        catalog
            .insert(1, &doc(json!({"_id": 1, "at": {"$date": "2024-01-01T00:00:00Z"}})))
            .unwrap();
        catalog
            .insert(
                2,
                &doc(json!({"_id": 2, "at": [{"$date": "2030-01-01T00:00:00Z"}, {"$date": "2024-01-01T00:00:30Z"}]})),
            )
            .unwrap();
        catalog
            .insert(3, &doc(json!({"_id": 3, "at": {"$date": "2024-01-01T00:05:00Z"}})))
            .unwrap();
        catalog.insert(4, &doc(json!({"_id": 4, "at": "not a date"}))).unwrap();

        let now = crate::value::codec::parse_date("2024-01-01T00:02:00Z").unwrap();
        assert_eq!(catalog.expired(now), vec![1, 2]);
    }
}
