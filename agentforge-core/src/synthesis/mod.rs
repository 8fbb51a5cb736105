//! Blueprint synthesis
//!
//! The [`GraphSynthesizer`] turns a pattern id plus a capability
//! configuration into a validated [`Blueprint`](crate::Blueprint), and
//! revises existing blueprints in response to simulation findings.
//! Synthesis is deterministic: the same inputs always produce the same
//! topology (blueprint ids aside).

mod revision;
mod synthesizer;

pub use synthesizer::GraphSynthesizer;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pattern::{PatternError, PatternId};

pub type Result<T> = std::result::Result<T, SynthesisError>;

#[derive(Debug, Error)]
pub enum SynthesisError {
    /// Two schema fragments declare the same field with different types.
    #[error("state field '{field}' declared as both {existing} and {incoming}")]
    SchemaConflict { field: String, existing: String, incoming: String },
    /// A produced blueprint broke a structural invariant. Always a bug in
    /// synthesis or revision logic, never recoverable by retrying.
    #[error("blueprint invariant violated: {0}")]
    InvariantViolation(String),
    #[error("no template registered for pattern '{0}'")]
    UnknownPattern(PatternId),
    #[error(transparent)]
    Pattern(#[from] PatternError),
}

/// An external tool the emitted agent may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCapability {
    /// Routing key and node-id stem; must be unique within the config.
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl ToolCapability {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self { name: name.into(), description: description.into() }
    }
}

/// Document-retrieval settings. Presence of this config makes the
/// synthesizer prepend an intent router and a retriever node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalCapability {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_chunk_size() -> usize {
    1000
}

fn default_top_k() -> usize {
    4
}

impl Default for RetrievalCapability {
    fn default() -> Self {
        Self { chunk_size: default_chunk_size(), top_k: default_top_k() }
    }
}

/// Capabilities to graft onto a pattern template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityConfig {
    #[serde(default)]
    pub tools: Vec<ToolCapability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieval: Option<RetrievalCapability>,
}

impl CapabilityConfig {
    pub fn with_tool(mut self, tool: ToolCapability) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_retrieval(mut self, retrieval: RetrievalCapability) -> Self {
        self.retrieval = Some(retrieval);
        self
    }
}
