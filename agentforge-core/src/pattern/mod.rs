//! Reusable execution-topology patterns
//!
//! Each pattern is a template: default nodes, edges, guarded edges, the
//! state fields the topology needs, and a hint for how many loop
//! iterations it should tolerate. Templates ship as YAML files embedded
//! in the crate and are parsed once at library load.

mod library;

pub use library::{PatternError, PatternLibrary};

use serde::{Deserialize, Serialize};

use crate::blueprint::{EdgeDef, GuardedEdgeDef, NodeDef, NodeId};
use crate::schema::StateField;

/// The four supported topology patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternId {
    /// Straight-line execution with optional tool hand-offs.
    Linear,
    /// Generate/critique refinement loop.
    ReflectLoop,
    /// Delegator routing work to workers.
    Supervisor,
    /// Planner, executor, and replanner.
    PlanExecute,
}

impl std::fmt::Display for PatternId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatternId::Linear => write!(f, "linear"),
            PatternId::ReflectLoop => write!(f, "reflect_loop"),
            PatternId::Supervisor => write!(f, "supervisor"),
            PatternId::PlanExecute => write!(f, "plan_execute"),
        }
    }
}

/// Marker naming the node whose routing already branches on capability
/// use; the synthesizer wires tool branches into that node's guard
/// instead of inventing a second routing point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityBranch {
    pub source: NodeId,
}

/// Immutable topology template, loaded once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternTemplate {
    pub id: PatternId,
    #[serde(default)]
    pub description: String,
    /// Loop tolerance hint; repairs use it when bounding runaway cycles.
    pub max_iterations: i64,
    pub entry_point: NodeId,
    pub nodes: Vec<NodeDef>,
    #[serde(default)]
    pub edges: Vec<EdgeDef>,
    #[serde(default)]
    pub guarded_edges: Vec<GuardedEdgeDef>,
    #[serde(default)]
    pub required_fields: Vec<StateField>,
    #[serde(default)]
    pub capability_branch: Option<CapabilityBranch>,
}
