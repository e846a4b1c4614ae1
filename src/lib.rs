//! aeropipe - document aggregation pipeline engine
//!
//! Ordered transformation pipelines over semi-structured documents, with
//! indexed predicate evaluation and array, geo and text query operators.
//!
//! ```ignore
//! let db = Database::open(EngineConfig::default())?;
//! let orders = db.collection("orders")?;
//! orders.insert_one(document_from_str(r#"{"item": "tea", "qty": 2}"#)?)?;
//! let pipeline = Pipeline::from_json(&json!([
//!     {"$group": {"_id": "$item", "total": {"$sum": "$qty"}}}
//! ]))?;
//! let totals = db
//!     .aggregate("orders", &pipeline, &AggregateOptions::default())?
//!     .collect_documents()?;
//! ```

pub mod cli;
pub mod collection;
pub mod config;
pub mod errors;
pub mod executor;
pub mod expr;
pub mod index;
pub mod observability;
pub mod pipeline;
pub mod planner;
pub mod query;
pub mod value;

pub use collection::{Collection, Database, DocumentSink, DocumentSource, FindOptions};
pub use config::{EngineConfig, ErrorMode};
pub use errors::{AggError, AggResult, ErrorCode, Severity};
pub use pipeline::{AggregateCursor, AggregateOptions, Pipeline, StageSpec};
pub use planner::{ExplainPlan, Hint};
pub use value::{Document, Value};
