//! Per-iteration run log

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One iteration's summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub iteration: u32,
    pub blueprint_version: u32,
    pub pass_rate: f64,
    pub note: String,
    pub at: DateTime<Utc>,
}

/// Append-only in-memory log of an evolution run, shareable across
/// tasks.
#[derive(Debug, Default)]
pub struct ArtifactLog {
    records: Mutex<Vec<LogRecord>>,
}

impl ArtifactLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, iteration: u32, blueprint_version: u32, pass_rate: f64, note: impl Into<String>) {
        let record = LogRecord {
            iteration,
            blueprint_version,
            pass_rate,
            note: note.into(),
            at: Utc::now(),
        };
        self.records.lock().unwrap_or_else(|e| e.into_inner()).push(record);
    }

    pub fn snapshot(&self) -> Vec<LogRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
