//! Bounded evolution loop
//!
//! Drives the full pipeline: select a pattern, synthesize, simulate,
//! repair, emit, test, classify, and either converge or escalate. Every
//! boundary to the outside world (code emission, test execution, config
//! repair, artifact storage) is a trait, so the loop itself stays
//! deterministic and testable.

mod log;
mod orchestrator;

pub use log::{ArtifactLog, LogRecord};
pub use orchestrator::EvolutionOrchestrator;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::blueprint::Blueprint;
use crate::judge::{FailureClassification, TestOutcome};
use crate::simulation::{SimulationIssue, SimulatorConfig};

/// Tunables for one evolution run.
#[derive(Debug, Clone)]
pub struct EvolutionConfig {
    /// Full emit/test iterations before giving up.
    pub max_iterations: u32,
    /// Fraction of tests that must pass to converge.
    pub pass_threshold: f64,
    /// Structural repair attempts per simulation failure.
    pub max_repair_attempts: u32,
    /// Non-improving iterations tolerated before declaring stagnation.
    pub stagnation_window: u32,
    pub simulator: SimulatorConfig,
    /// Seed message for every dry run.
    pub sample_input: String,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            pass_threshold: 0.9,
            max_repair_attempts: 3,
            stagnation_window: 2,
            simulator: SimulatorConfig::default(),
            sample_input: "Hello, what can you do?".into(),
        }
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Pass rate reached the threshold.
    Converged,
    /// Iteration budget spent without converging.
    IterationBound,
    /// Pass rate stopped improving.
    Stagnation,
    /// The loop hit something it cannot repair on its own.
    ManualEscalation,
}

/// What prompted a repair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairTrigger {
    Simulation { issues: Vec<SimulationIssue> },
    TestFailures { failing: usize, total: usize, classification: FailureClassification },
}

/// One repair attempt in the run's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairAttempt {
    /// 1-based evolution iteration the attempt happened in.
    pub iteration: u32,
    pub prior_version: u32,
    pub trigger: RepairTrigger,
    /// `None` when the attempt was abandoned (budget spent, invariant
    /// violation).
    pub resulting_version: Option<u32>,
    pub recorded_at: DateTime<Utc>,
}

/// Complete record of one evolution run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionRun {
    pub id: Uuid,
    pub attempts: Vec<RepairAttempt>,
    pub termination: TerminationReason,
    pub best_pass_rate: f64,
    /// The blueprint the run ended with, when synthesis got that far.
    pub blueprint: Option<Blueprint>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Source files emitted for one blueprint version, keyed by path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceArtifact {
    pub blueprint_version: u32,
    pub files: IndexMap<String, String>,
}

/// Turns a blueprint into runnable source.
#[async_trait]
pub trait CodeEmitter: Send + Sync {
    async fn emit(&self, blueprint: &Blueprint) -> anyhow::Result<SourceArtifact>;
}

/// Runs the generated test batch against an emitted artifact.
#[async_trait]
pub trait TestHarness: Send + Sync {
    async fn run_tests(&self, artifact: &SourceArtifact) -> anyhow::Result<Vec<TestOutcome>>;
}

/// Applies repairs outside the blueprint: retrieval settings, tool
/// registrations.
#[async_trait]
pub trait ConfigRepairHook: Send + Sync {
    async fn repair(&self, classification: &FailureClassification) -> anyhow::Result<()>;
}

/// Persists artifacts between iterations; returns a revision id.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn commit(&self, version: u32, message: &str) -> anyhow::Result<String>;
}

/// Cooperative cancellation, checked at iteration boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
