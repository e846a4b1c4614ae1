//! Explain output
//!
//! Produces deterministic, human-readable explain output and a document
//! form for programmatic callers.

use std::fmt;

use crate::value::{Document, Value};

use super::planner::{AccessPath, AccessPlan};

/// Explain plan output
#[derive(Debug, Clone, PartialEq)]
pub struct ExplainPlan {
    /// COLLSCAN, IXSCAN, INDEX_ORDER, GEO_NEAR_2DSPHERE or TEXT
    pub strategy: String,
    pub index_used: Option<String>,
    pub estimated_cost: usize,
    /// Key ranges per indexed field, for index scans
    pub bounds: Vec<String>,
    /// Stage names as they will execute
    pub stages: Vec<String>,
}

impl ExplainPlan {
    /// Describe `plan` followed by the stages left to run
    pub fn from_plan(plan: &AccessPlan, stages: Vec<String>) -> Self {
        let bounds = match &plan.path {
            AccessPath::IndexScan { bounds, .. } => bounds.clone(),
            AccessPath::IndexOrder { reverse: true, .. } => vec!["direction: backward".into()],
            AccessPath::IndexOrder { .. } => vec!["direction: forward".into()],
            _ => Vec::new(),
        };
        Self {
            strategy: plan.path.strategy().to_string(),
            index_used: plan.path.index_name().map(str::to_string),
            estimated_cost: plan.estimated_cost,
            bounds,
            stages,
        }
    }

    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert("strategy", Value::String(self.strategy.clone()));
        doc.insert(
            "indexUsed",
            self.index_used
                .clone()
                .map_or(Value::Null, Value::String),
        );
        doc.insert("estimatedCost", Value::Int64(self.estimated_cost as i64));
        doc.insert(
            "bounds",
            Value::Array(self.bounds.iter().cloned().map(Value::String).collect()),
        );
        doc.insert(
            "stages",
            Value::Array(self.stages.iter().cloned().map(Value::String).collect()),
        );
        doc
    }
}

impl fmt::Display for ExplainPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== EXPLAIN PLAN ===")?;
        writeln!(f, "Strategy: {}", self.strategy)?;
        if let Some(index) = &self.index_used {
            writeln!(f, "Index: {}", index)?;
        }
        writeln!(f, "Estimated Cost: {}", self.estimated_cost)?;
        if !self.bounds.is_empty() {
            writeln!(f, "Bounds:")?;
            for bound in &self.bounds {
                writeln!(f, "  - {}", bound)?;
            }
        }
        if !self.stages.is_empty() {
            writeln!(f, "Stages:")?;
            for stage in &self.stages {
                writeln!(f, "  - {}", stage)?;
            }
        }
        Ok(())
    }
}
