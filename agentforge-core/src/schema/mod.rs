//! Typed state-field catalog backing every blueprint
//!
//! A [`StateSchema`] is the ordered, name-unique set of fields a workflow
//! graph reads and writes while it runs. Pattern templates and capability
//! configs each contribute their own partial schemas; [`StateSchema::merge`]
//! folds them into one coherent schema or fails loudly on a type conflict.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::synthesis::SynthesisError;

/// Simulated state: field name to current value, in schema order.
pub type SimState = IndexMap<String, FieldValue>;

/// Semantic type of a state field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Str,
    Int,
    Bool,
    Float,
    MessageList,
    StrList,
    Optional(Box<FieldType>),
}

impl FieldType {
    /// Value a field of this type starts out with when no explicit
    /// default is declared.
    pub fn default_value(&self) -> FieldValue {
        match self {
            FieldType::Str => FieldValue::Str(String::new()),
            FieldType::Int => FieldValue::Int(0),
            FieldType::Bool => FieldValue::Bool(false),
            FieldType::Float => FieldValue::Float(0.0),
            FieldType::MessageList => FieldValue::Messages(Vec::new()),
            FieldType::StrList => FieldValue::StrList(Vec::new()),
            FieldType::Optional(_) => FieldValue::Null,
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::Str => write!(f, "str"),
            FieldType::Int => write!(f, "int"),
            FieldType::Bool => write!(f, "bool"),
            FieldType::Float => write!(f, "float"),
            FieldType::MessageList => write!(f, "message_list"),
            FieldType::StrList => write!(f, "str_list"),
            FieldType::Optional(inner) => write!(f, "optional<{}>", inner),
        }
    }
}

/// One message in a simulated conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimMessage {
    pub role: String,
    pub content: String,
    /// Name of the tool this message asks to invoke, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<String>,
}

impl SimMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into(), tool_call: None }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".into(), content: content.into(), tool_call: None }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self { role: "tool".into(), content: content.into(), tool_call: None }
    }

    pub fn with_tool_call(mut self, tool: impl Into<String>) -> Self {
        self.tool_call = Some(tool.into());
        self
    }
}

/// Runtime value of a state field during simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    Str(String),
    Int(i64),
    Bool(bool),
    Float(f64),
    Messages(Vec<SimMessage>),
    StrList(Vec<String>),
    Null,
}

impl FieldValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_messages(&self) -> Option<&[SimMessage]> {
        match self {
            FieldValue::Messages(m) => Some(m),
            _ => None,
        }
    }

    /// Loose truthiness used by guard evaluation: empty, zero, false and
    /// null are all falsy.
    pub fn truthy(&self) -> bool {
        match self {
            FieldValue::Str(s) => !s.is_empty(),
            FieldValue::Int(n) => *n != 0,
            FieldValue::Bool(b) => *b,
            FieldValue::Float(x) => *x != 0.0,
            FieldValue::Messages(m) => !m.is_empty(),
            FieldValue::StrList(l) => !l.is_empty(),
            FieldValue::Null => false,
        }
    }
}

/// Reducer tag controlling how successive writes to a field combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reducer {
    /// New list values are appended to the existing list rather than
    /// replacing it (message accumulation).
    Append,
}

/// A single named, typed field in a state schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateField {
    pub name: String,
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reducer: Option<Reducer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl StateField {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self { name: name.into(), field_type, default: None, reducer: None, description: None }
    }

    pub fn with_default(mut self, default: FieldValue) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_reducer(mut self, reducer: Reducer) -> Self {
        self.reducer = Some(reducer);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Initial value for this field: the declared default, or the type's.
    pub fn initial_value(&self) -> FieldValue {
        self.default.clone().unwrap_or_else(|| self.field_type.default_value())
    }
}

/// Ordered, name-unique set of state fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSchema {
    fields: IndexMap<String, StateField>,
}

impl StateSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a schema from fields; later duplicates silently overwrite
    /// earlier ones (callers that care about conflicts use [`merge`]).
    ///
    /// [`merge`]: StateSchema::merge
    pub fn from_fields(fields: impl IntoIterator<Item = StateField>) -> Self {
        let mut schema = Self::new();
        for field in fields {
            schema.fields.insert(field.name.clone(), field);
        }
        schema
    }

    /// Merge schemas left to right. A later field with the same name and
    /// the same type overwrites (idempotent); the same name with a
    /// different type is a hard synthesis error naming both types.
    pub fn merge(
        schemas: impl IntoIterator<Item = StateSchema>,
    ) -> Result<StateSchema, SynthesisError> {
        let mut merged = StateSchema::new();
        for schema in schemas {
            for (name, field) in schema.fields {
                match merged.fields.get(&name) {
                    Some(existing) if existing.field_type != field.field_type => {
                        return Err(SynthesisError::SchemaConflict {
                            field: name,
                            existing: existing.field_type.to_string(),
                            incoming: field.field_type.to_string(),
                        });
                    }
                    _ => {
                        merged.fields.insert(name, field);
                    }
                }
            }
        }
        Ok(merged)
    }

    pub fn get(&self, name: &str) -> Option<&StateField> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = &StateField> {
        self.fields.values()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Initial simulated state: every field at its default, in schema order.
    pub fn defaults(&self) -> SimState {
        self.fields.values().map(|f| (f.name.clone(), f.initial_value())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> StateSchema {
        StateSchema::from_fields([
            StateField::new("messages", FieldType::MessageList).with_reducer(Reducer::Append),
            StateField::new("is_finished", FieldType::Bool).with_default(FieldValue::Bool(false)),
        ])
    }

    #[test]
    fn merge_dedupes_identical_fields() {
        let merged = StateSchema::merge([base(), base()]).unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.get("messages").unwrap().reducer, Some(Reducer::Append));
    }

    #[test]
    fn merge_is_left_to_right_and_later_wins() {
        let a = StateSchema::from_fields([
            StateField::new("draft", FieldType::Str).with_default(FieldValue::Str("a".into())),
        ]);
        let b = StateSchema::from_fields([
            StateField::new("draft", FieldType::Str).with_default(FieldValue::Str("b".into())),
        ]);
        let merged = StateSchema::merge([a, b]).unwrap();
        assert_eq!(merged.get("draft").unwrap().default, Some(FieldValue::Str("b".into())));
    }

    #[test]
    fn merge_conflict_names_both_types() {
        let a = StateSchema::from_fields([StateField::new("count", FieldType::Int)]);
        let b = StateSchema::from_fields([StateField::new("count", FieldType::Str)]);
        let err = StateSchema::merge([a, b]).unwrap_err();
        match err {
            SynthesisError::SchemaConflict { field, existing, incoming } => {
                assert_eq!(field, "count");
                assert_eq!(existing, "int");
                assert_eq!(incoming, "str");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn defaults_follow_schema_order() {
        let schema = StateSchema::from_fields([
            StateField::new("messages", FieldType::MessageList),
            StateField::new("iteration_count", FieldType::Int).with_default(FieldValue::Int(0)),
            StateField::new("note", FieldType::Optional(Box::new(FieldType::Str))),
        ]);
        let state = schema.defaults();
        let keys: Vec<_> = state.keys().cloned().collect();
        assert_eq!(keys, vec!["messages", "iteration_count", "note"]);
        assert_eq!(state["note"], FieldValue::Null);
    }

    #[test]
    fn field_value_truthiness() {
        assert!(!FieldValue::Str(String::new()).truthy());
        assert!(FieldValue::Str("x".into()).truthy());
        assert!(!FieldValue::Null.truthy());
        assert!(FieldValue::Messages(vec![SimMessage::user("hi")]).truthy());
    }
}
