//! Options and results of collection operations

use crate::errors::AggError;
use crate::value::{Document, Value};

/// Options of [`super::Collection::find`]
///
/// Whatever order the options are given in, a find applies sort, then
/// skip, then limit, then projection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub projection: Option<Document>,
    pub sort: Option<Document>,
    pub skip: u64,
    /// 0 means no limit
    pub limit: u64,
}

impl FindOptions {
    pub fn projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }
}

/// A document rejected by `insert_many`
#[derive(Debug, Clone, PartialEq)]
pub struct WriteError {
    /// Position of the document in the input
    pub index: usize,
    pub error: AggError,
}

/// Outcome of `insert_many`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertManyResult {
    /// `_id` of every stored document, in input order
    pub inserted_ids: Vec<Value>,
    pub write_errors: Vec<WriteError>,
}

impl InsertManyResult {
    pub fn is_ok(&self) -> bool {
        self.write_errors.is_empty()
    }
}
