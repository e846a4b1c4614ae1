//! Match filters
//!
//! Filter documents are parsed into a [`Filter`] tree once and evaluated
//! against each document with [`Filter::matches`].
//!
//! # Invariants
//!
//! - Comparison operators never match across type brackets
//! - `{field: null}` matches documents where the field is absent
//! - `$text` is accepted only at the top level; evaluating it without a
//!   text index is an error

mod ast;
pub mod geo;
mod matcher;
pub mod text;

pub(crate) use ast::parse_elem_match;
pub use ast::{Condition, ElemMatch, Filter, RegexMatcher, TypeSpec};
pub use geo::{haversine_distance, Geometry, Shape};
pub use text::{ParsedSearch, TextLanguage, TextQuery};
