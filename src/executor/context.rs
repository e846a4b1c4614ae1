//! Per-run execution state
//!
//! Holds the engine configuration, the diagnostics recorded for skipped
//! documents and ignored operands, and the run counters. One context lives for one cursor.

use tracing::warn;

use crate::config::{EngineConfig, ErrorMode};
use crate::errors::{AggError, AggResult, ErrorCode};
use crate::observability::Event;

/// A document dropped under `error_mode = "skip"`, or an operand an
/// accumulator ignored
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub stage: String,
    pub code: ErrorCode,
    pub message: String,
    /// False when the document was kept and only an operand was ignored
    pub dropped: bool,
}

/// Counters collected while a pipeline runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecStats {
    /// Records read from the source
    pub docs_examined: u64,
    /// Documents produced by the last stage
    pub docs_returned: u64,
    /// Documents dropped by per-document errors
    pub docs_skipped: u64,
}

/// Execution context threaded through every stage
#[derive(Debug)]
pub struct ExecContext {
    config: EngineConfig,
    diagnostics: Vec<Diagnostic>,
    pub stats: ExecStats,
}

impl ExecContext {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            diagnostics: Vec::new(),
            stats: ExecStats::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Decide what happens to a document whose evaluation failed.
    ///
    /// Per-document errors are recorded and swallowed in skip mode; every
    /// other error is returned.
    pub fn recover(&mut self, stage: &str, err: AggError) -> AggResult<()> {
        if !err.is_per_document() || self.config.error_mode != ErrorMode::Skip {
            return Err(err);
        }
        warn!(
            event = Event::DocumentSkipped.as_str(),
            code = err.code().code(),
            stage,
            "{}",
            err.message()
        );
        self.stats.docs_skipped += 1;
        self.diagnostics.push(Diagnostic {
            stage: stage.to_string(),
            code: err.code(),
            message: err.message().to_string(),
            dropped: true,
        });
        Ok(())
    }

    /// Record an operand that was left out of a result, in every error mode
    pub fn note(&mut self, stage: &str, err: AggError) {
        warn!(
            event = Event::OperandIgnored.as_str(),
            code = err.code().code(),
            stage,
            "{}",
            err.message()
        );
        self.diagnostics.push(Diagnostic {
            stage: stage.to_string(),
            code: err.code(),
            message: err.message().to_string(),
            dropped: false,
        });
    }

    /// A fresh memory budget for one blocking stage
    pub fn budget(&self, stage: &'static str) -> MemoryBudget {
        MemoryBudget::new(stage, self.config.max_blocking_stage_bytes)
    }
}

/// Approximate byte accounting for one blocking stage
#[derive(Debug, Clone)]
pub struct MemoryBudget {
    stage: &'static str,
    limit: u64,
    used: u64,
}

impl MemoryBudget {
    pub fn new(stage: &'static str, limit: u64) -> Self {
        Self {
            stage,
            limit,
            used: 0,
        }
    }

    /// Account for `bytes` more; fails once the ceiling is crossed
    pub fn charge(&mut self, bytes: usize) -> AggResult<()> {
        self.used = self.used.saturating_add(bytes as u64);
        if self.used > self.limit {
            return Err(AggError::resource_exceeded(self.stage, self.limit));
        }
        Ok(())
    }

    pub fn used(&self) -> u64 {
        self.used
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_mode_propagates() {
        let mut ctx = ExecContext::new(EngineConfig::default());
        let err = AggError::divide_by_zero("$divide");
        assert!(ctx.recover("$project", err).is_err());
        assert!(ctx.diagnostics().is_empty());
    }

    #[test]
    fn test_skip_mode_records_diagnostic() {
        let mut ctx = ExecContext::new(EngineConfig::default().with_error_mode(ErrorMode::Skip));
        ctx.recover("$project", AggError::divide_by_zero("$divide")).unwrap();
        assert_eq!(ctx.diagnostics().len(), 1);
        assert_eq!(ctx.diagnostics()[0].code, ErrorCode::DivideByZero);
        assert_eq!(ctx.stats.docs_skipped, 1);
    }

    #[test]
    fn test_skip_mode_keeps_structural_errors() {
        let mut ctx = ExecContext::new(EngineConfig::default().with_error_mode(ErrorMode::Skip));
        assert!(ctx
            .recover("$bucket", AggError::bucket_out_of_range(7))
            .is_err());
    }

    #[test]
    fn test_note_keeps_document_in_abort_mode() {
        let mut ctx = ExecContext::new(EngineConfig::default());
        ctx.note("$group", AggError::type_mismatch("$sum ignored a string operand"));
        assert_eq!(ctx.diagnostics().len(), 1);
        assert!(!ctx.diagnostics()[0].dropped);
        assert_eq!(ctx.stats.docs_skipped, 0);
    }

    #[test]
    fn test_budget_ceiling() {
        let mut budget = MemoryBudget::new("$sort", 100);
        budget.charge(60).unwrap();
        let err = budget.charge(60).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ResourceExceeded);
    }
}
