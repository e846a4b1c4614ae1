//! Expression evaluator
//!
//! Expressions are parsed once from their descriptor form into an
//! [`Expression`] tree and then evaluated against each document.
//!
//! # Invariants
//!
//! - Parsing rejects unknown operators, wrong arity and undefined variables
//! - Evaluation is pure and deterministic
//! - A missing field evaluates to `Value::Missing`, never to an error

mod arithmetic;
mod arrays;
mod ast;
pub mod conversion;
pub mod dates;
mod evaluator;
mod strings;

pub use arrays::slice_window;
pub use ast::{Expression, MetaField, Operator, TrimSide};
pub use conversion::ConvertTarget;
pub use evaluator::{evaluate, is_truthy, Evaluator, Metadata};
