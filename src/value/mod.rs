//! Value model
//!
//! Tagged values, ordered documents, numeric promotion, the total order
//! used by sort/group/index, field path resolution and the extended JSON
//! encoding boundary.
//!
//! # Invariants
//!
//! - `Value::Missing` is never stored inside a `Document`
//! - The total order is deterministic and independent of numeric subtype
//! - Path resolution never fails; absence is `Value::Missing`

pub mod codec;
mod document;
pub mod number;
pub mod ordering;
pub mod path;
mod types;

pub use codec::{document_from_json, document_to_json, from_json, to_json, CodecError, JsonMode};
pub use document::Document;
pub use number::{Number, NumericKind};
pub use ordering::{compare, equal, OrdValue};
pub use path::FieldPath;
pub use types::{GeoPoint, ObjectId, Value, ValueKind};
