//! Document store adapter
//!
//! # Design Principles
//!
//! - The engine reads through [`DocumentSource`] and writes through
//!   [`DocumentSink`]; it never depends on how records are stored
//! - [`Collection`] is the in-memory store used by the library and CLI:
//!   records plus a synchronously maintained index catalog
//! - [`Database`] is an explicit handle over named collections
//!
//! # Invariants
//!
//! - Every stored document has an `_id`, stored as its first field
//! - Record ids only grow, so scans see records in insertion order
//! - A rejected write changes neither records nor indexes

mod collection;
mod database;
mod options;
mod source;

pub use collection::Collection;
pub use database::Database;
pub use options::{FindOptions, InsertManyResult, WriteError};
pub use source::{DocumentSink, DocumentSource};
