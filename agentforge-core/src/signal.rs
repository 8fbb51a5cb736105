//! Requirement signal handed in by the upstream requirement extractor
//!
//! The natural-language analysis itself happens outside this crate; what
//! arrives here is the distilled signal the pattern heuristics and the
//! synthesizer need.

use serde::{Deserialize, Serialize};

/// Two-phase requirement clarification status.
///
/// A signal that still needs clarification must not be built; the upstream
/// extractor resolves it exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClarificationState {
    NeedsClarification,
    Resolved,
}

impl ClarificationState {
    /// The single allowed transition.
    pub fn resolve(self) -> ClarificationState {
        ClarificationState::Resolved
    }

    pub fn is_resolved(self) -> bool {
        matches!(self, ClarificationState::Resolved)
    }
}

/// Distilled description of what the requested agent has to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementSignal {
    /// Free-text summary of the requirement.
    pub description: String,
    /// Sequential sub-steps the extractor identified, if any.
    #[serde(default)]
    pub planned_steps: Vec<String>,
    /// Number of distinct tool-routing branches the requirement implies.
    #[serde(default)]
    pub tool_routes: usize,
    /// Whether the requirement calls for document retrieval.
    #[serde(default)]
    pub wants_retrieval: bool,
    pub clarification: ClarificationState,
}

impl RequirementSignal {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            planned_steps: Vec::new(),
            tool_routes: 0,
            wants_retrieval: false,
            clarification: ClarificationState::Resolved,
        }
    }

    pub fn with_planned_steps<S: Into<String>>(
        mut self,
        steps: impl IntoIterator<Item = S>,
    ) -> Self {
        self.planned_steps = steps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tool_routes(mut self, routes: usize) -> Self {
        self.tool_routes = routes;
        self
    }

    pub fn with_retrieval(mut self) -> Self {
        self.wants_retrieval = true;
        self
    }

    pub fn needing_clarification(mut self) -> Self {
        self.clarification = ClarificationState::NeedsClarification;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clarification_resolves_once() {
        let state = ClarificationState::NeedsClarification;
        assert!(!state.is_resolved());
        let state = state.resolve();
        assert!(state.is_resolved());
        // resolving again is a no-op
        assert!(state.resolve().is_resolved());
    }
}
