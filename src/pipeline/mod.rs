//! Aggregation pipelines
//!
//! # Lifecycle
//!
//! 1. Parse: stage records become [`StageSpec`]s; structural errors stop
//!    here
//! 2. Plan: the first stage is matched against the collection's indexes
//! 3. Open: stage streams are chained on top of the access path
//! 4. Pull: the [`AggregateCursor`] produces documents on demand
//!
//! # Invariants
//!
//! - A pipeline is immutable once parsed and can be run many times
//! - Stages execute strictly in declaration order
//! - An index never changes the result set of a pipeline

mod cursor;
mod descriptor;
mod driver;

pub use cursor::AggregateCursor;
pub use descriptor::{Pipeline, StageSpec};
pub use driver::AggregateOptions;
