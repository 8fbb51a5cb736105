//! Built-in oracles
//!
//! [`HeuristicOracle`] fabricates plausible node effects from the node
//! kind alone, which is enough to exercise a topology. [`ScriptedOracle`]
//! replays a fixed decision queue and backs most of the test suite.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::blueprint::{NodeDef, NodeKind};
use crate::schema::{FieldValue, SimMessage, SimState};

use super::{Decision, OracleTimeout, StepOracle};

/// Kind-based stand-in effects, no model behind it.
#[derive(Debug, Default)]
pub struct HeuristicOracle;

#[async_trait]
impl StepOracle for HeuristicOracle {
    async fn decide(&self, node: &NodeDef, state: &SimState) -> Result<Decision, OracleTimeout> {
        Ok(heuristic_decision(node, state))
    }
}

/// Replays a queue of pre-built decisions; once the queue drains, every
/// further node gets the default empty decision.
#[derive(Debug, Default)]
pub struct ScriptedOracle {
    decisions: Mutex<VecDeque<Decision>>,
}

impl ScriptedOracle {
    pub fn new(decisions: impl IntoIterator<Item = Decision>) -> Self {
        Self { decisions: Mutex::new(decisions.into_iter().collect()) }
    }
}

#[async_trait]
impl StepOracle for ScriptedOracle {
    async fn decide(&self, _node: &NodeDef, _state: &SimState) -> Result<Decision, OracleTimeout> {
        let mut queue = self.decisions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(queue.pop_front().unwrap_or_default())
    }
}

/// Shared fallback used both by [`HeuristicOracle`] and by the simulator
/// when a real oracle times out.
pub(crate) fn heuristic_decision(node: &NodeDef, state: &SimState) -> Decision {
    match node.kind {
        NodeKind::Reasoning => {
            let mut decision = Decision::default().update(
                "messages",
                FieldValue::Messages(vec![SimMessage::assistant(format!(
                    "[sim] {} output",
                    node.id
                ))]),
            );
            if state.contains_key("draft") {
                decision = decision
                    .update("draft", FieldValue::Str(format!("[sim] draft from {}", node.id)));
            }
            // an optimistic stand-in declares the task done, so truthy
            // completion guards can exit
            if state.contains_key("is_finished") {
                decision = decision.update("is_finished", FieldValue::Bool(true));
            }
            decision
        }
        NodeKind::Tool => Decision::default().update(
            "messages",
            FieldValue::Messages(vec![SimMessage::tool(format!("[sim] {} result", node.id))]),
        ),
        NodeKind::Retrieval => Decision::default()
            .update(
                "retrieved_docs",
                FieldValue::StrList(vec!["doc-1".into(), "doc-2".into(), "doc-3".into()]),
            )
            .update("context", FieldValue::Str("[sim] retrieved context".into()))
            .update(
                "messages",
                FieldValue::Messages(vec![SimMessage::tool("[sim] retrieval complete")]),
            ),
        NodeKind::GuardOnly => {
            let has_context =
                state.get("context").is_some_and(FieldValue::truthy);
            let route = if has_context { "chat" } else { "search" };
            Decision::default().update("router_decision", FieldValue::Str(route.into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[tokio::test]
    async fn scripted_oracle_drains_then_defaults() {
        let oracle = ScriptedOracle::new([Decision::default().branch("end")]);
        let node = NodeDef::new("critic", NodeKind::Reasoning, "");
        let state = IndexMap::new();
        let first = oracle.decide(&node, &state).await.unwrap();
        assert_eq!(first.branch_key.as_deref(), Some("end"));
        let second = oracle.decide(&node, &state).await.unwrap();
        assert_eq!(second, Decision::default());
    }

    #[test]
    fn guard_only_routes_search_without_context() {
        let node = NodeDef::new("intent_router", NodeKind::GuardOnly, "");
        let empty = IndexMap::new();
        let decision = heuristic_decision(&node, &empty);
        assert_eq!(decision.updates["router_decision"], FieldValue::Str("search".into()));

        let mut with_context = IndexMap::new();
        with_context.insert("context".to_string(), FieldValue::Str("already retrieved".into()));
        let decision = heuristic_decision(&node, &with_context);
        assert_eq!(decision.updates["router_decision"], FieldValue::Str("chat".into()));
    }
}
