//! Index layer
//!
//! Indexes are derived, in-memory state maintained synchronously with every
//! collection mutation.
//!
//! # Design Principles
//!
//! - Derived state: indexes mirror the collection, never the source of truth
//! - Deterministic: BTreeMap iteration order, sorted record ids
//! - Candidates only: every index result is re-checked against the full
//!   predicate by the executor
//!
//! # Invariants
//!
//! - The unique `_id_` index always exists and cannot be dropped
//! - A rejected write leaves every index untouched
//! - At most one text index per collection
//! - A document never contributes keys from two array fields of one index

mod geo_index;
mod key;
mod manager;
mod spec;
mod text_index;
mod tree;

pub use geo_index::{GeoHit, GeoIndex};
pub use key::{extract_keys, Direction, ExtractedKeys, IndexKey, KeyPart};
pub use manager::{Index, IndexCatalog, IndexData};
pub use spec::{IndexField, IndexKind, IndexOptions, IndexSpec, ID_INDEX_NAME};
pub use text_index::{TextHit, TextIndex};
pub use tree::{IndexTree, RecordId};
