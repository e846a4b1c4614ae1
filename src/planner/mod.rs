//! Query planner
//!
//! Inspects only the first stage of a pipeline and picks how its records
//! are obtained: a collection scan or one of the collection's indexes.
//!
//! # Design Principles
//!
//! - Deterministic: same pipeline and indexes, same plan
//! - Explicit: one planning pass before any document flows
//! - Equivalent: an index never changes the result set, only the work
//!
//! # Index Selection Priority (strict order)
//!
//! 1. `$geoNear`: 2dsphere index
//! 2. `$text`: text index
//! 3. Bounded key range on a regular index, cheapest first
//! 4. Index order for a leading `$sort`
//! 5. Collection scan
//!
//! Ties broken lexicographically by index name.

mod bounds;
mod explain;
mod planner;

pub use bounds::{field_bounds, key_range, prefix_bounds, FieldBounds, RangeEnd};
pub use explain::ExplainPlan;
pub use planner::{AccessPath, AccessPlan, Hint, QueryPlanner};
