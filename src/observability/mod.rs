//! Observability
//!
//! Lifecycle events and begin/complete scopes emitted through `tracing`.
//! Installing a subscriber is left to the embedding program (the CLI
//! installs an `EnvFilter` fmt subscriber).
//!
//! # Principles
//!
//! 1. Observability is read-only; it never changes execution
//! 2. Every record carries a stable `event` name
//! 3. No background threads

mod events;
mod scope;

pub use events::Event;
pub use scope::{ObservationScope, Timer};

use tracing::{info, warn};

/// Log a lifecycle event with `key=value` detail fields
pub fn log_event(event: Event, fields: &[(&str, &str)]) {
    let detail = fields
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(" ");
    if event.is_failure() {
        warn!(event = event.as_str(), detail = %detail);
    } else {
        info!(event = event.as_str(), detail = %detail);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event() {
        log_event(Event::DatabaseOpened, &[]);
        log_event(Event::IndexCreated, &[("name", "email_1")]);
        log_event(Event::PipelineAborted, &[("reason", "test")]);
    }
}
