//! Embedded template library and requirement-driven pattern selection

use indexmap::IndexMap;
use thiserror::Error;
use tracing::debug;

use crate::signal::RequirementSignal;

use super::{PatternId, PatternTemplate};

/// Keywords in a requirement description that indicate the user wants
/// output refined over multiple rounds.
const REFINEMENT_KEYWORDS: &[&str] =
    &["iterate", "iterative", "improve", "refine", "review", "revise", "critique", "polish"];

/// Plans longer than this are worth a dedicated planner/executor split.
const PLAN_STEP_THRESHOLD: usize = 3;

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("failed to parse embedded template: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("template declares id {declared} but was registered as {registered}")]
    IdMismatch { declared: PatternId, registered: PatternId },
}

/// The four built-in topology templates, parsed from embedded YAML.
#[derive(Debug, Clone)]
pub struct PatternLibrary {
    templates: IndexMap<PatternId, PatternTemplate>,
}

impl PatternLibrary {
    /// Parse the embedded templates. Fails only if a shipped template is
    /// malformed, which is a packaging bug rather than a user error.
    pub fn load() -> Result<Self, PatternError> {
        let sources = [
            (PatternId::Linear, include_str!("templates/linear.yaml")),
            (PatternId::ReflectLoop, include_str!("templates/reflect_loop.yaml")),
            (PatternId::Supervisor, include_str!("templates/supervisor.yaml")),
            (PatternId::PlanExecute, include_str!("templates/plan_execute.yaml")),
        ];
        let mut templates = IndexMap::new();
        for (id, source) in sources {
            let template: PatternTemplate = serde_yaml::from_str(source)?;
            if template.id != id {
                return Err(PatternError::IdMismatch { declared: template.id, registered: id });
            }
            templates.insert(id, template);
        }
        Ok(Self { templates })
    }

    pub fn get(&self, id: PatternId) -> Option<&PatternTemplate> {
        self.templates.get(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = PatternId> + '_ {
        self.templates.keys().copied()
    }

    /// Pick the topology that fits a requirement signal. Checks run in
    /// priority order; the first match wins and the fallback is linear.
    pub fn select(&self, signal: &RequirementSignal) -> PatternId {
        let selected = if signal.planned_steps.len() > PLAN_STEP_THRESHOLD {
            PatternId::PlanExecute
        } else if Self::wants_refinement(&signal.description) {
            PatternId::ReflectLoop
        } else if signal.tool_routes > 1 {
            PatternId::Supervisor
        } else {
            PatternId::Linear
        };
        debug!(pattern = %selected, "selected topology pattern");
        selected
    }

    fn wants_refinement(description: &str) -> bool {
        let lowered = description.to_lowercase();
        REFINEMENT_KEYWORDS.iter().any(|kw| lowered.contains(kw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::GuardExpression;
    use crate::schema::FieldType;

    #[test]
    fn all_templates_parse() {
        let library = PatternLibrary::load().unwrap();
        assert_eq!(library.ids().count(), 4);
        for id in library.ids() {
            let template = library.get(id).unwrap();
            assert_eq!(template.id, id);
            assert!(template.nodes.iter().any(|n| n.id == template.entry_point));
        }
    }

    #[test]
    fn guards_and_defaults_parse_from_tagged_yaml() {
        // the on-disk representation for enum values is the YAML tag form
        let yaml = r#"
id: supervisor
description: routing check
max_iterations: 2
entry_point: supervisor
nodes:
  - id: supervisor
    kind: reasoning
    role: routes work
guarded_edges:
  - source: supervisor
    guard: !field_dispatch
      field: next_action
      keys:
        - worker
    branches:
      worker: supervisor
      default: END
required_fields:
  - name: next_action
    field_type: str
    default: !str ""
"#;
        let template: PatternTemplate = serde_yaml::from_str(yaml).unwrap();
        match &template.guarded_edges[0].guard {
            GuardExpression::FieldDispatch { field, keys } => {
                assert_eq!(field, "next_action");
                assert_eq!(keys, &["worker".to_string()]);
            }
            other => panic!("unexpected guard: {other:?}"),
        }
        assert_eq!(
            template.required_fields[0].default,
            Some(crate::schema::FieldValue::Str(String::new()))
        );
    }

    #[test]
    fn reflect_loop_bounds_its_cycle() {
        let library = PatternLibrary::load().unwrap();
        let template = library.get(PatternId::ReflectLoop).unwrap();
        let guarded = &template.guarded_edges[0];
        assert_eq!(guarded.source, "critic");
        match &guarded.guard {
            GuardExpression::CounterBelow { field, limit } => {
                assert_eq!(field, "iteration_count");
                assert_eq!(*limit, 3);
            }
            other => panic!("unexpected guard: {other:?}"),
        }
        let counter = template.required_fields.iter().find(|f| f.name == "iteration_count");
        assert_eq!(counter.unwrap().field_type, FieldType::Int);
    }

    #[test]
    fn long_plans_win_over_refinement_wording() {
        let library = PatternLibrary::load().unwrap();
        let signal = RequirementSignal::new("iteratively refine a migration plan")
            .with_planned_steps(["audit", "schema", "backfill", "cutover", "verify"]);
        assert_eq!(library.select(&signal), PatternId::PlanExecute);
    }

    #[test]
    fn refinement_wording_wins_over_tool_routes() {
        let library = PatternLibrary::load().unwrap();
        let signal = RequirementSignal::new("Review and revise the summary").with_tool_routes(3);
        assert_eq!(library.select(&signal), PatternId::ReflectLoop);
    }

    #[test]
    fn multiple_tool_routes_select_supervisor() {
        let library = PatternLibrary::load().unwrap();
        let signal = RequirementSignal::new("answer questions").with_tool_routes(2);
        assert_eq!(library.select(&signal), PatternId::Supervisor);
    }

    #[test]
    fn default_is_linear() {
        let library = PatternLibrary::load().unwrap();
        let signal = RequirementSignal::new("answer a single question");
        assert_eq!(library.select(&signal), PatternId::Linear);
    }
}
