//! Template instantiation and capability grafting

use tracing::{debug, info};
use uuid::Uuid;

use crate::blueprint::{
    Blueprint, EdgeDef, EdgeTarget, GuardExpression, GuardedEdgeDef, NodeDef, NodeId, NodeKind,
    KEY_DEFAULT,
};
use crate::pattern::{PatternId, PatternLibrary, PatternTemplate};
use crate::schema::{FieldType, FieldValue, Reducer, StateField, StateSchema};

use super::{CapabilityConfig, Result, SynthesisError};

/// Node prepended when retrieval is configured; routes search-style
/// requests to the retriever and everything else straight to the agent.
pub(crate) const INTENT_ROUTER: &str = "intent_router";
pub(crate) const RETRIEVER: &str = "retriever";

/// Field a reasoning node writes to request a tool by name.
pub(crate) const PENDING_TOOL_FIELD: &str = "pending_tool";
pub(crate) const ROUTER_DECISION_FIELD: &str = "router_decision";

/// Builds validated blueprints from pattern templates and revises them
/// when simulation finds structural problems.
#[derive(Debug, Clone)]
pub struct GraphSynthesizer {
    library: PatternLibrary,
}

impl GraphSynthesizer {
    pub fn new(library: PatternLibrary) -> Self {
        Self { library }
    }

    pub fn library(&self) -> &PatternLibrary {
        &self.library
    }

    pub(crate) fn template(&self, pattern: PatternId) -> Result<&PatternTemplate> {
        self.library.get(pattern).ok_or(SynthesisError::UnknownPattern(pattern))
    }

    /// Instantiate `pattern` and graft the configured capabilities onto
    /// it. The result always passes [`Blueprint::validate`].
    pub fn synthesize(
        &self,
        pattern: PatternId,
        capabilities: &CapabilityConfig,
    ) -> Result<Blueprint> {
        let template = self.template(pattern)?;

        let mut blueprint = Blueprint {
            id: Uuid::new_v4(),
            version: 1,
            pattern,
            state_schema: StateSchema::new(),
            nodes: template.nodes.clone(),
            edges: template.edges.clone(),
            guarded_edges: template.guarded_edges.clone(),
            entry_point: template.entry_point.clone(),
        };

        let mut capability_fields = Vec::new();

        if !capabilities.tools.is_empty() {
            let branch_source = template
                .capability_branch
                .as_ref()
                .map_or_else(|| template.entry_point.clone(), |b| b.source.clone());
            self.graft_tools(&mut blueprint, &branch_source, capabilities, &mut capability_fields);
        }

        if capabilities.retrieval.is_some() {
            self.graft_retrieval(&mut blueprint, &mut capability_fields);
        }

        blueprint.state_schema = StateSchema::merge([
            base_schema(),
            StateSchema::from_fields(template.required_fields.clone()),
            StateSchema::from_fields(capability_fields),
        ])?;

        blueprint.validate()?;
        info!(
            pattern = %pattern,
            nodes = blueprint.nodes.len(),
            tools = capabilities.tools.len(),
            retrieval = capabilities.retrieval.is_some(),
            "synthesized blueprint"
        );
        Ok(blueprint)
    }

    /// Add one tool node per configured tool and route to them from the
    /// template's capability-branch node. If that node already dispatches
    /// on a state field, the tool routes join its existing guard;
    /// otherwise its plain edge is replaced by a dispatch guard whose
    /// default branch preserves the old target.
    fn graft_tools(
        &self,
        blueprint: &mut Blueprint,
        branch_source: &str,
        capabilities: &CapabilityConfig,
        fields: &mut Vec<StateField>,
    ) {
        for tool in &capabilities.tools {
            let node_id = format!("tool_{}", tool.name);
            debug!(tool = %tool.name, node = %node_id, "grafting tool node");
            blueprint.nodes.push(NodeDef::new(&node_id, NodeKind::Tool, tool.description.clone()));
            // tool results flow back to the node that requested them
            blueprint.edges.push(EdgeDef::new(&node_id, EdgeTarget::node(branch_source)));
        }

        let existing_dispatch = blueprint
            .guarded_edges
            .iter_mut()
            .find(|g| g.source == branch_source)
            .filter(|g| matches!(g.guard, GuardExpression::FieldDispatch { .. }));

        if let Some(guarded) = existing_dispatch {
            if let GuardExpression::FieldDispatch { keys, .. } = &mut guarded.guard {
                for tool in &capabilities.tools {
                    keys.push(tool.name.clone());
                    guarded
                        .branches
                        .insert(tool.name.clone(), EdgeTarget::node(format!("tool_{}", tool.name)));
                }
            }
        } else {
            // replace the plain edge; its target becomes the default route
            let default_target = match blueprint.edges.iter().position(|e| e.source == branch_source)
            {
                Some(pos) => blueprint.edges.remove(pos).target,
                None => EdgeTarget::End,
            };
            let mut branches: Vec<(String, EdgeTarget)> = capabilities
                .tools
                .iter()
                .map(|t| (t.name.clone(), EdgeTarget::node(format!("tool_{}", t.name))))
                .collect();
            branches.push((KEY_DEFAULT.to_string(), default_target));
            let guard = GuardExpression::FieldDispatch {
                field: PENDING_TOOL_FIELD.into(),
                keys: capabilities.tools.iter().map(|t| t.name.clone()).collect(),
            };
            blueprint.guarded_edges.push(GuardedEdgeDef::new(branch_source, guard, branches));
            fields.push(
                StateField::new(PENDING_TOOL_FIELD, FieldType::Optional(Box::new(FieldType::Str)))
                    .with_description("Tool requested by the agent for the next hop."),
            );
        }
    }

    /// Prepend an intent router and a retriever node ahead of the old
    /// entry point.
    fn graft_retrieval(&self, blueprint: &mut Blueprint, fields: &mut Vec<StateField>) {
        let old_entry: NodeId = blueprint.entry_point.clone();
        debug!(entry = %old_entry, "grafting retrieval front-end");

        blueprint.nodes.push(NodeDef::new(
            INTENT_ROUTER,
            NodeKind::GuardOnly,
            "Classifies the request as a document search or plain chat.",
        ));
        blueprint.nodes.push(NodeDef::new(
            RETRIEVER,
            NodeKind::Retrieval,
            "Fetches relevant documents and folds them into the context.",
        ));

        blueprint.guarded_edges.push(GuardedEdgeDef::new(
            INTENT_ROUTER,
            GuardExpression::FieldDispatch {
                field: ROUTER_DECISION_FIELD.into(),
                keys: vec!["search".into(), "chat".into()],
            },
            [
                ("search".to_string(), EdgeTarget::node(RETRIEVER)),
                ("chat".to_string(), EdgeTarget::node(&old_entry)),
                ("default".to_string(), EdgeTarget::node(&old_entry)),
            ],
        ));
        blueprint.edges.push(EdgeDef::new(RETRIEVER, EdgeTarget::node(&old_entry)));
        blueprint.entry_point = INTENT_ROUTER.into();

        fields.push(
            StateField::new("retrieved_docs", FieldType::StrList)
                .with_description("Raw documents pulled by the retriever."),
        );
        fields.push(
            StateField::new("context", FieldType::Str)
                .with_description("Retrieved context folded into one prompt block."),
        );
        fields.push(StateField::new(
            ROUTER_DECISION_FIELD,
            FieldType::Optional(Box::new(FieldType::Str)),
        ));
    }
}

/// Fields every blueprint carries regardless of pattern.
pub(crate) fn base_schema() -> StateSchema {
    StateSchema::from_fields([
        StateField::new("messages", FieldType::MessageList)
            .with_reducer(Reducer::Append)
            .with_description("Conversation history."),
        StateField::new("is_finished", FieldType::Bool).with_default(FieldValue::Bool(false)),
    ])
}
