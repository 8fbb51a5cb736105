//! Explicit trace sinks
//!
//! Components that produce a stream of events take a [`TraceSink`]
//! instead of writing to global telemetry state. The default sink
//! forwards to `tracing`; tests use [`MemorySink`] to assert on the
//! stream directly.

use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// One traced event.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceEvent {
    /// Component that produced the event, e.g. `simulation`.
    pub scope: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl TraceEvent {
    pub fn new(scope: impl Into<String>, message: impl Into<String>) -> Self {
        Self { scope: scope.into(), message: message.into(), at: Utc::now() }
    }
}

pub trait TraceSink: Send + Sync {
    fn record(&self, event: TraceEvent);
}

/// Default sink: forwards every event to `tracing` at debug level.
#[derive(Debug, Default)]
pub struct TracingSink;

impl TraceSink for TracingSink {
    fn record(&self, event: TraceEvent) {
        tracing::debug!(scope = %event.scope, "{}", event.message);
    }
}

/// Collects events in memory for inspection.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<TraceEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<TraceEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl TraceSink for MemorySink {
    fn record(&self, event: TraceEvent) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event);
    }
}
