//! Lifecycle events
//!
//! Every event has a stable SCREAMING_CASE name that is attached to the
//! `tracing` record as the `event` field.

use std::fmt;

/// Engine lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Database handle
    DatabaseOpened,
    DatabaseClosed,
    CollectionCreated,
    CollectionDropped,

    // Configuration
    ConfigLoaded,

    // Pipeline
    PipelineCompiled,
    PipelinePlanned,
    PipelineExecuted,
    PipelineAborted,
    DocumentSkipped,
    OperandIgnored,
    CursorAbandoned,
    OutWritten,

    // Explain
    ExplainBegin,
    ExplainComplete,

    // Indexes
    IndexCreated,
    IndexDropped,
    TtlExpired,

    // Writes
    WriteRejected,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::DatabaseOpened => "DATABASE_OPENED",
            Event::DatabaseClosed => "DATABASE_CLOSED",
            Event::CollectionCreated => "COLLECTION_CREATED",
            Event::CollectionDropped => "COLLECTION_DROPPED",

            Event::ConfigLoaded => "CONFIG_LOADED",

            Event::PipelineCompiled => "PIPELINE_COMPILED",
            Event::PipelinePlanned => "PIPELINE_PLANNED",
            Event::PipelineExecuted => "PIPELINE_EXECUTED",
            Event::PipelineAborted => "PIPELINE_ABORTED",
            Event::DocumentSkipped => "DOCUMENT_SKIPPED",
            Event::OperandIgnored => "OPERAND_IGNORED",
            Event::CursorAbandoned => "CURSOR_ABANDONED",
            Event::OutWritten => "OUT_WRITTEN",

            Event::ExplainBegin => "EXPLAIN_BEGIN",
            Event::ExplainComplete => "EXPLAIN_COMPLETE",

            Event::IndexCreated => "INDEX_CREATED",
            Event::IndexDropped => "INDEX_DROPPED",
            Event::TtlExpired => "TTL_EXPIRED",

            Event::WriteRejected => "WRITE_REJECTED",
        }
    }

    /// Returns true if the event reports a failed operation
    pub fn is_failure(&self) -> bool {
        matches!(self, Event::PipelineAborted | Event::WriteRejected)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_events_have_string_representation() {
        let events = [
            Event::DatabaseOpened,
            Event::DatabaseClosed,
            Event::CollectionCreated,
            Event::CollectionDropped,
            Event::ConfigLoaded,
            Event::PipelineCompiled,
            Event::PipelinePlanned,
            Event::PipelineExecuted,
            Event::PipelineAborted,
            Event::DocumentSkipped,
            Event::CursorAbandoned,
            Event::OutWritten,
            Event::ExplainBegin,
            Event::ExplainComplete,
            Event::IndexCreated,
            Event::IndexDropped,
            Event::TtlExpired,
            Event::WriteRejected,
        ];

        for event in events {
            let s = event.as_str();
            assert!(!s.is_empty());
            assert!(s.chars().all(|c| c.is_uppercase() || c == '_'));
        }
    }

    #[test]
    fn test_failure_events() {
        assert!(Event::PipelineAborted.is_failure());
        assert!(!Event::PipelineExecuted.is_failure());
    }

    #[test]
    fn test_event_display() {
        assert_eq!(format!("{}", Event::DocumentSkipped), "DOCUMENT_SKIPPED");
    }
}
