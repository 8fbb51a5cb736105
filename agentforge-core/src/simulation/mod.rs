//! Oracle-driven dry-run simulation
//!
//! Before any code is emitted, a blueprint is walked symbolically: an
//! oracle stands in for every node's real effect, guards are evaluated
//! against the simulated state, and structural problems (runaway loops,
//! unreachable nodes, dangling branches) surface as issues instead of
//! runtime failures later.

mod oracle;
mod simulator;
mod trace;

pub use oracle::{HeuristicOracle, ScriptedOracle};
pub use simulator::{Simulator, SimulatorConfig};
pub use trace::{render_mermaid, render_trace};

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::blueprint::{NodeDef, NodeId};
use crate::schema::{FieldValue, SimState};

/// What a recorded step describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    EnterNode,
    /// Recorded only when the walk halts abnormally inside a node.
    ExitNode,
    GuardEvaluated,
    EdgeFollowed,
}

/// One entry in the simulation transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationStep {
    pub step_number: u32,
    pub kind: StepKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    pub description: String,
    /// Fields this step changed, with their new values.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub changed: IndexMap<String, FieldValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Fails the simulation; the blueprint must be revised.
    Error,
    /// Reported but does not fail the simulation.
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    InfiniteLoop,
    UnreachableNode,
    DanglingEdgeTarget,
    NonTerminatingGuard,
    StepBudgetExceeded,
    OracleTimeout,
}

impl IssueKind {
    /// Step-budget and oracle-timeout findings are environmental, not
    /// structural, so they never fail a simulation on their own.
    pub fn severity(self) -> Severity {
        match self {
            IssueKind::InfiniteLoop
            | IssueKind::DanglingEdgeTarget
            | IssueKind::NonTerminatingGuard => Severity::Error,
            IssueKind::UnreachableNode
            | IssueKind::StepBudgetExceeded
            | IssueKind::OracleTimeout => Severity::Warning,
        }
    }
}

/// A structural or environmental problem found during simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationIssue {
    pub kind: IssueKind,
    pub severity: Severity,
    pub affected_nodes: Vec<NodeId>,
    pub description: String,
    /// For dangling-branch issues: the branch key that had no target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl SimulationIssue {
    pub fn new(
        kind: IssueKind,
        affected_nodes: impl IntoIterator<Item = NodeId>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            affected_nodes: affected_nodes.into_iter().collect(),
            description: description.into(),
            missing_branch: None,
            suggestion: None,
        }
    }

    pub fn with_missing_branch(mut self, key: impl Into<String>) -> Self {
        self.missing_branch = Some(key.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Full record of one dry run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationReport {
    /// True when no error-severity issue was raised.
    pub success: bool,
    pub steps: Vec<SimulationStep>,
    pub issues: Vec<SimulationIssue>,
    pub final_state: SimState,
    /// Always equals `steps.len()`.
    pub step_count: u32,
    /// Human-readable transcript.
    pub trace: String,
    /// Mermaid rendering of the walked path, when any node was entered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mermaid: Option<String>,
    pub oracle_timeouts: u32,
    pub simulated_at: DateTime<Utc>,
}

// Replays of the same blueprint with the same oracle must compare equal,
// so the wall-clock timestamp is excluded from equality.
impl PartialEq for SimulationReport {
    fn eq(&self, other: &Self) -> bool {
        self.success == other.success
            && self.steps == other.steps
            && self.issues == other.issues
            && self.final_state == other.final_state
            && self.step_count == other.step_count
            && self.trace == other.trace
            && self.mermaid == other.mermaid
            && self.oracle_timeouts == other.oracle_timeouts
    }
}

impl SimulationReport {
    pub fn errors(&self) -> impl Iterator<Item = &SimulationIssue> {
        self.issues.iter().filter(|i| i.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &SimulationIssue> {
        self.issues.iter().filter(|i| !i.is_error())
    }
}

/// What the oracle decided a node does on this visit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decision {
    /// State writes to apply, reducer-aware.
    pub updates: IndexMap<String, FieldValue>,
    /// Branch key to take if the node hosts a guard; `None` lets the
    /// guard evaluate against post-update state instead.
    pub branch_key: Option<String>,
}

impl Decision {
    pub fn update(mut self, field: impl Into<String>, value: FieldValue) -> Self {
        self.updates.insert(field.into(), value);
        self
    }

    pub fn branch(mut self, key: impl Into<String>) -> Self {
        self.branch_key = Some(key.into());
        self
    }
}

/// The oracle took too long; the simulator falls back to a heuristic
/// decision and records a warning.
#[derive(Debug, Error)]
#[error("oracle produced no decision within {after:?}")]
pub struct OracleTimeout {
    pub after: Duration,
}

/// Stand-in for a node's real effect during a dry run.
#[async_trait]
pub trait StepOracle: Send + Sync {
    async fn decide(
        &self,
        node: &NodeDef,
        state: &SimState,
    ) -> std::result::Result<Decision, OracleTimeout>;
}
