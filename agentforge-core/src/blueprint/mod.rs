//! Candidate execution graphs
//!
//! A [`Blueprint`] is a validated candidate workflow graph: a pattern id, a
//! typed state schema, nodes, plain edges, guarded edges, and an entry
//! point. Blueprints are immutable once created; repairs produce a new
//! blueprint with a bumped version number.

pub mod analysis;
mod guard;

pub use guard::{GuardExpression, KEY_CONTINUE, KEY_DEFAULT, KEY_ELSE, KEY_END, KEY_THEN, KEY_TOOL};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pattern::PatternId;
use crate::schema::StateSchema;
use crate::synthesis::SynthesisError;

/// Stable node identifier. Nodes are always referenced by id, never by
/// object reference, so cycles stay data rather than memory hazards.
pub type NodeId = String;

/// What a node does when the emitted agent runs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// LLM reasoning step.
    Reasoning,
    /// External tool invocation.
    Tool,
    /// Document retrieval step.
    Retrieval,
    /// Pure routing node; exists only to host a guard.
    GuardOnly,
}

/// A single node in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
    pub id: NodeId,
    pub kind: NodeKind,
    /// Free-text role description, opaque to this engine; the emitter
    /// turns it into a prompt.
    #[serde(default)]
    pub role: String,
}

impl NodeDef {
    pub fn new(id: impl Into<NodeId>, kind: NodeKind, role: impl Into<String>) -> Self {
        Self { id: id.into(), kind, role: role.into() }
    }
}

/// Where an edge lands: a node, or the terminal sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EdgeTarget {
    Node(NodeId),
    End,
}

impl EdgeTarget {
    pub fn node(id: impl Into<NodeId>) -> Self {
        EdgeTarget::Node(id.into())
    }

    pub fn as_node(&self) -> Option<&NodeId> {
        match self {
            EdgeTarget::Node(id) => Some(id),
            EdgeTarget::End => None,
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self, EdgeTarget::End)
    }
}

impl std::fmt::Display for EdgeTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EdgeTarget::Node(id) => write!(f, "{id}"),
            EdgeTarget::End => write!(f, "END"),
        }
    }
}

// Serialized as a plain string so persisted blueprints keep the familiar
// "END" sentinel form.
impl Serialize for EdgeTarget {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for EdgeTarget {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(if raw == "END" { EdgeTarget::End } else { EdgeTarget::Node(raw) })
    }
}

/// Unconditional edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeDef {
    pub source: NodeId,
    pub target: EdgeTarget,
}

impl EdgeDef {
    pub fn new(source: impl Into<NodeId>, target: EdgeTarget) -> Self {
        Self { source: source.into(), target }
    }
}

/// Edge whose target depends on evaluating a guard against current state.
///
/// The branch map must cover every key the guard can produce; that is a
/// blueprint invariant, checked by [`Blueprint::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardedEdgeDef {
    pub source: NodeId,
    pub guard: GuardExpression,
    pub branches: IndexMap<String, EdgeTarget>,
}

impl GuardedEdgeDef {
    pub fn new(
        source: impl Into<NodeId>,
        guard: GuardExpression,
        branches: impl IntoIterator<Item = (String, EdgeTarget)>,
    ) -> Self {
        Self { source: source.into(), guard, branches: branches.into_iter().collect() }
    }
}

/// A validated candidate execution graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    pub id: Uuid,
    /// Monotonically increasing across revisions of the same blueprint.
    pub version: u32,
    pub pattern: PatternId,
    pub state_schema: StateSchema,
    pub nodes: Vec<NodeDef>,
    pub edges: Vec<EdgeDef>,
    pub guarded_edges: Vec<GuardedEdgeDef>,
    pub entry_point: NodeId,
}

impl Blueprint {
    pub fn node(&self, id: &str) -> Option<&NodeDef> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.node(id).is_some()
    }

    /// First plain edge out of `id`, if any.
    pub fn plain_edge_from(&self, id: &str) -> Option<&EdgeDef> {
        self.edges.iter().find(|e| e.source == id)
    }

    /// Guarded edge out of `id`, if any. Guarded edges take precedence
    /// over plain edges during simulation.
    pub fn guarded_edge_from(&self, id: &str) -> Option<&GuardedEdgeDef> {
        self.guarded_edges.iter().find(|e| e.source == id)
    }

    /// Check every structural invariant. A violation is fatal to the
    /// synthesis attempt that produced this blueprint, never a warning.
    pub fn validate(&self) -> Result<(), SynthesisError> {
        let mut seen = std::collections::HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(SynthesisError::InvariantViolation(format!(
                    "duplicate node id '{}'",
                    node.id
                )));
            }
        }

        if !self.has_node(&self.entry_point) {
            return Err(SynthesisError::InvariantViolation(format!(
                "entry point '{}' does not resolve to a node",
                self.entry_point
            )));
        }

        for edge in &self.edges {
            if !self.has_node(&edge.source) {
                return Err(SynthesisError::InvariantViolation(format!(
                    "edge source '{}' does not resolve to a node",
                    edge.source
                )));
            }
            if let EdgeTarget::Node(target) = &edge.target {
                if !self.has_node(target) {
                    return Err(SynthesisError::InvariantViolation(format!(
                        "edge target '{target}' does not resolve to a node or END"
                    )));
                }
            }
        }

        for guarded in &self.guarded_edges {
            if !self.has_node(&guarded.source) {
                return Err(SynthesisError::InvariantViolation(format!(
                    "guarded edge source '{}' does not resolve to a node",
                    guarded.source
                )));
            }
            for (key, target) in &guarded.branches {
                if let EdgeTarget::Node(t) = target {
                    if !self.has_node(t) {
                        return Err(SynthesisError::InvariantViolation(format!(
                            "branch '{key}' of guarded edge from '{}' targets unknown node '{t}'",
                            guarded.source
                        )));
                    }
                }
            }
            for key in guarded.guard.branch_keys() {
                if !guarded.branches.contains_key(&key) {
                    return Err(SynthesisError::InvariantViolation(format!(
                        "guard on '{}' can produce key '{key}' but the branch map does not cover it",
                        guarded.source
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldType, StateField};

    fn linear_blueprint() -> Blueprint {
        Blueprint {
            id: Uuid::nil(),
            version: 1,
            pattern: PatternId::Linear,
            state_schema: StateSchema::from_fields([StateField::new(
                "messages",
                FieldType::MessageList,
            )]),
            nodes: vec![NodeDef::new("agent", NodeKind::Reasoning, "primary agent")],
            edges: vec![EdgeDef::new("agent", EdgeTarget::End)],
            guarded_edges: vec![],
            entry_point: "agent".into(),
        }
    }

    #[test]
    fn valid_blueprint_passes() {
        assert!(linear_blueprint().validate().is_ok());
    }

    #[test]
    fn duplicate_node_id_rejected() {
        let mut bp = linear_blueprint();
        bp.nodes.push(NodeDef::new("agent", NodeKind::Tool, "dup"));
        assert!(matches!(bp.validate(), Err(SynthesisError::InvariantViolation(_))));
    }

    #[test]
    fn dangling_edge_target_rejected() {
        let mut bp = linear_blueprint();
        bp.edges.push(EdgeDef::new("agent", EdgeTarget::node("ghost")));
        assert!(bp.validate().is_err());
    }

    #[test]
    fn entry_point_must_resolve() {
        let mut bp = linear_blueprint();
        bp.entry_point = "missing".into();
        assert!(bp.validate().is_err());
    }

    #[test]
    fn uncovered_guard_key_rejected() {
        let mut bp = linear_blueprint();
        bp.edges.clear();
        bp.guarded_edges.push(GuardedEdgeDef::new(
            "agent",
            GuardExpression::ToolCallPresent,
            // covers "tool" but not "end"
            [("tool".to_string(), EdgeTarget::node("agent"))],
        ));
        let err = bp.validate().unwrap_err();
        assert!(err.to_string().contains("end"));
    }

    #[test]
    fn edge_target_round_trips_through_json() {
        let end: EdgeTarget = serde_json::from_str("\"END\"").unwrap();
        assert!(end.is_end());
        let node: EdgeTarget = serde_json::from_str("\"critic\"").unwrap();
        assert_eq!(node, EdgeTarget::node("critic"));
        assert_eq!(serde_json::to_string(&EdgeTarget::End).unwrap(), "\"END\"");
    }
}
