//! ObservationScope for automatic begin/complete logging
//!
//! - Logs `{name}_BEGIN` on creation
//! - Logs `{name}_COMPLETE` when completed
//! - Logs `{name}_ERROR` when failed
//! - Logs `{name}_INCOMPLETE` on drop if neither happened

use std::time::Instant;

use tracing::{error, info, warn};

/// A scope that logs begin and end events for one operation
///
/// ```ignore
/// let scope = ObservationScope::new("PIPELINE");
/// // ... run ...
/// scope.complete_with_fields(&[("docs_returned", "3")]);
/// ```
#[derive(Debug)]
pub struct ObservationScope {
    name: &'static str,
    completed: bool,
    timer: Timer,
}

impl ObservationScope {
    /// Create a new observation scope; logs `{name}_BEGIN` immediately
    pub fn new(name: &'static str) -> Self {
        info!(event = %format!("{}_BEGIN", name));
        Self {
            name,
            completed: false,
            timer: Timer::new(),
        }
    }

    /// Mark the scope as successfully completed
    pub fn complete(self) {
        self.complete_with_fields(&[]);
    }

    /// Mark the scope as completed, attaching extra fields
    pub fn complete_with_fields(mut self, fields: &[(&str, &str)]) {
        self.completed = true;
        info!(
            event = %format!("{}_COMPLETE", self.name),
            elapsed_ms = self.timer.elapsed_ms(),
            fields = %render_fields(fields)
        );
    }

    /// Mark the scope as failed; logs `{name}_ERROR`
    pub fn fail(mut self, reason: &str) {
        self.completed = true;
        error!(
            event = %format!("{}_ERROR", self.name),
            elapsed_ms = self.timer.elapsed_ms(),
            reason
        );
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }
}

impl Drop for ObservationScope {
    fn drop(&mut self) {
        if !self.completed {
            warn!(
                event = %format!("{}_INCOMPLETE", self.name),
                reason = "scope dropped without completion"
            );
        }
    }
}

/// Fields rendered in a deterministic `key=value` order
fn render_fields(fields: &[(&str, &str)]) -> String {
    let mut sorted: Vec<_> = fields.iter().collect();
    sorted.sort_by_key(|(k, _)| *k);
    sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(" ")
}

/// A simple duration timer for logging elapsed time
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Elapsed whole milliseconds
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_complete() {
        let scope = ObservationScope::new("TEST_OP");
        assert!(!scope.is_completed());
        scope.complete();
    }

    #[test]
    fn test_scope_fail() {
        let scope = ObservationScope::new("TEST_OP");
        scope.fail("boom");
    }

    #[test]
    fn test_scope_drop_without_completion() {
        let _scope = ObservationScope::new("TEST_OP");
    }

    #[test]
    fn test_render_fields_sorted() {
        assert_eq!(render_fields(&[("b", "2"), ("a", "1")]), "a=1 b=2");
    }
}
