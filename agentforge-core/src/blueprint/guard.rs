//! Guard expressions
//!
//! Guards are a closed tagged vocabulary rather than interpreted condition
//! snippets: every expression statically enumerates the branch keys it can
//! produce, which makes branch-map coverage checkable at validation time
//! and removes arbitrary code execution from the blueprint entirely.

use serde::{Deserialize, Serialize};

use crate::schema::{FieldValue, SimState};

/// Branch keys shared by the counter-style guards.
pub const KEY_CONTINUE: &str = "continue";
pub const KEY_END: &str = "end";
pub const KEY_THEN: &str = "then";
pub const KEY_ELSE: &str = "else";
pub const KEY_TOOL: &str = "tool";
pub const KEY_DEFAULT: &str = "default";

/// A statically enumerable routing condition over simulated state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardExpression {
    /// `continue` while the message list holds fewer than `limit` entries.
    MessageCountBelow { limit: usize },
    /// `continue` while the named integer counter is below `limit`.
    CounterBelow { field: String, limit: i64 },
    /// `then` when the named field is truthy, `else` otherwise.
    FieldTruthy { field: String },
    /// `then` when the named field equals `value`, `else` otherwise.
    FieldEquals { field: String, value: FieldValue },
    /// `tool` when the last message carries a tool call, `end` otherwise.
    ToolCallPresent,
    /// Route on the string value of `field`: a declared key when it
    /// matches, `default` otherwise.
    FieldDispatch { field: String, keys: Vec<String> },
}

impl GuardExpression {
    /// Every branch key this guard can produce. The blueprint invariant
    /// requires the branch map to cover all of them.
    pub fn branch_keys(&self) -> Vec<String> {
        match self {
            GuardExpression::MessageCountBelow { .. } | GuardExpression::CounterBelow { .. } => {
                vec![KEY_CONTINUE.into(), KEY_END.into()]
            }
            GuardExpression::FieldTruthy { .. } | GuardExpression::FieldEquals { .. } => {
                vec![KEY_THEN.into(), KEY_ELSE.into()]
            }
            GuardExpression::ToolCallPresent => vec![KEY_TOOL.into(), KEY_END.into()],
            GuardExpression::FieldDispatch { keys, .. } => {
                let mut all: Vec<String> = keys.clone();
                all.push(KEY_DEFAULT.into());
                all
            }
        }
    }

    /// The key this guard's branch map routes through to leave a loop, in
    /// the guard's own vocabulary.
    pub fn terminal_key(&self) -> &'static str {
        match self {
            GuardExpression::MessageCountBelow { .. }
            | GuardExpression::CounterBelow { .. }
            | GuardExpression::ToolCallPresent => KEY_END,
            GuardExpression::FieldTruthy { .. } | GuardExpression::FieldEquals { .. } => KEY_ELSE,
            GuardExpression::FieldDispatch { .. } => KEY_DEFAULT,
        }
    }

    /// Deterministic dispatch over current state. Total: always returns
    /// one of [`branch_keys`](GuardExpression::branch_keys).
    pub fn evaluate(&self, state: &SimState) -> String {
        match self {
            GuardExpression::MessageCountBelow { limit } => {
                let count = state
                    .get("messages")
                    .and_then(FieldValue::as_messages)
                    .map_or(0, <[_]>::len);
                if count < *limit { KEY_CONTINUE.into() } else { KEY_END.into() }
            }
            GuardExpression::CounterBelow { field, limit } => {
                let current = state.get(field).and_then(FieldValue::as_int).unwrap_or(0);
                if current < *limit { KEY_CONTINUE.into() } else { KEY_END.into() }
            }
            GuardExpression::FieldTruthy { field } => {
                if state.get(field).is_some_and(FieldValue::truthy) {
                    KEY_THEN.into()
                } else {
                    KEY_ELSE.into()
                }
            }
            GuardExpression::FieldEquals { field, value } => {
                if state.get(field) == Some(value) { KEY_THEN.into() } else { KEY_ELSE.into() }
            }
            GuardExpression::ToolCallPresent => {
                let pending = state
                    .get("messages")
                    .and_then(FieldValue::as_messages)
                    .and_then(|m| m.last())
                    .is_some_and(|m| m.tool_call.is_some());
                if pending { KEY_TOOL.into() } else { KEY_END.into() }
            }
            GuardExpression::FieldDispatch { field, keys } => {
                match state.get(field).and_then(FieldValue::as_str) {
                    Some(value) if keys.iter().any(|k| k == value) => value.to_string(),
                    _ => KEY_DEFAULT.into(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SimMessage;
    use indexmap::IndexMap;

    fn state(entries: impl IntoIterator<Item = (&'static str, FieldValue)>) -> SimState {
        entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect::<IndexMap<_, _>>()
    }

    #[test]
    fn counter_below_flips_at_limit() {
        let guard = GuardExpression::CounterBelow { field: "iteration_count".into(), limit: 3 };
        assert_eq!(guard.evaluate(&state([("iteration_count", FieldValue::Int(2))])), "continue");
        assert_eq!(guard.evaluate(&state([("iteration_count", FieldValue::Int(3))])), "end");
        // missing counter reads as zero
        assert_eq!(guard.evaluate(&state([])), "continue");
    }

    #[test]
    fn tool_call_present_inspects_last_message() {
        let guard = GuardExpression::ToolCallPresent;
        let with_call = state([(
            "messages",
            FieldValue::Messages(vec![
                SimMessage::assistant("searching").with_tool_call("web_search"),
            ]),
        )]);
        assert_eq!(guard.evaluate(&with_call), "tool");
        let without = state([("messages", FieldValue::Messages(vec![SimMessage::user("hi")]))]);
        assert_eq!(guard.evaluate(&without), "end");
    }

    #[test]
    fn dispatch_falls_back_to_default() {
        let guard = GuardExpression::FieldDispatch {
            field: "next_action".into(),
            keys: vec!["worker".into(), "web_search".into()],
        };
        assert_eq!(
            guard.evaluate(&state([("next_action", FieldValue::Str("web_search".into()))])),
            "web_search"
        );
        assert_eq!(
            guard.evaluate(&state([("next_action", FieldValue::Str("unknown".into()))])),
            "default"
        );
        assert_eq!(guard.branch_keys(), vec!["worker", "web_search", "default"]);
    }

    #[test]
    fn evaluate_always_lands_in_branch_keys() {
        let guards = [
            GuardExpression::MessageCountBelow { limit: 2 },
            GuardExpression::CounterBelow { field: "n".into(), limit: 1 },
            GuardExpression::FieldTruthy { field: "is_finished".into() },
            GuardExpression::FieldEquals { field: "x".into(), value: FieldValue::Int(1) },
            GuardExpression::ToolCallPresent,
            GuardExpression::FieldDispatch { field: "route".into(), keys: vec!["a".into()] },
        ];
        let empty = state([]);
        for guard in guards {
            let key = guard.evaluate(&empty);
            assert!(guard.branch_keys().contains(&key), "{key} not enumerated");
        }
    }
}
