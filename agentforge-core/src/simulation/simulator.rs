//! Blueprint walker

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::blueprint::analysis::GraphIndex;
use crate::blueprint::{Blueprint, EdgeTarget, GuardExpression, NodeId};
use crate::schema::{FieldValue, Reducer, SimMessage, SimState};
use crate::trace::{TraceEvent, TraceSink, TracingSink};

use super::oracle::heuristic_decision;
use super::trace::{render_mermaid, render_trace};
use super::{
    Decision, IssueKind, SimulationIssue, SimulationReport, SimulationStep, StepKind, StepOracle,
};

/// Tunables for a dry run.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Hard ceiling on recorded steps.
    pub max_steps: u32,
    /// Visits to one node before the walk is declared a runaway loop.
    pub cycle_threshold: u32,
    pub oracle_timeout: Duration,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self { max_steps: 50, cycle_threshold: 5, oracle_timeout: Duration::from_secs(30) }
    }
}

/// Walks a blueprint against an oracle and reports what it found.
#[derive(Clone)]
pub struct Simulator {
    config: SimulatorConfig,
    sink: Arc<dyn TraceSink>,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new(SimulatorConfig::default())
    }
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Self {
        Self { config, sink: Arc::new(TracingSink) }
    }

    /// Route step events through an explicit sink instead of `tracing`.
    pub fn with_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Dry-run the blueprint from its entry point. Never fails: every
    /// problem becomes an issue in the report.
    pub async fn simulate(
        &self,
        blueprint: &Blueprint,
        oracle: &dyn StepOracle,
        sample_input: &str,
    ) -> SimulationReport {
        let index = GraphIndex::build(blueprint);
        let mut state = blueprint.state_schema.defaults();
        seed_input(&mut state, sample_input);

        let mut steps: Vec<SimulationStep> = Vec::new();
        let mut issues = self.static_issues(blueprint, &index);
        let mut oracle_timeouts = 0u32;
        let mut visits: HashMap<NodeId, u32> = HashMap::new();

        let mut current = blueprint.entry_point.clone();
        loop {
            let count = visits.entry(current.clone()).or_insert(0);
            *count += 1;
            if *count > self.config.cycle_threshold {
                let members = index.cycle_members(blueprint, &current);
                issues.push(
                    SimulationIssue::new(
                        IssueKind::InfiniteLoop,
                        members.clone(),
                        format!(
                            "node '{current}' visited more than {} times; cycle: {}",
                            self.config.cycle_threshold,
                            members.join(" -> "),
                        ),
                    )
                    .with_suggestion("bound the cycle with a counter guard"),
                );
                push_step(
                    &mut steps,
                    &*self.sink,
                    StepKind::ExitNode,
                    Some(&current),
                    format!("halted in '{current}': runaway loop"),
                    IndexMap::new(),
                );
                break;
            }

            // the node may not exist if the blueprint skipped validation
            let Some(node) = blueprint.node(&current) else {
                issues.push(SimulationIssue::new(
                    IssueKind::DanglingEdgeTarget,
                    [current.clone()],
                    format!("walk reached unknown node '{current}'"),
                ));
                break;
            };

            let decision = match tokio::time::timeout(
                self.config.oracle_timeout,
                oracle.decide(node, &state),
            )
            .await
            {
                Ok(Ok(decision)) => decision,
                Ok(Err(timeout)) => {
                    oracle_timeouts += 1;
                    issues.push(SimulationIssue::new(
                        IssueKind::OracleTimeout,
                        [current.clone()],
                        format!("oracle gave up on '{current}': {timeout}"),
                    ));
                    heuristic_decision(node, &state)
                }
                Err(_) => {
                    oracle_timeouts += 1;
                    issues.push(SimulationIssue::new(
                        IssueKind::OracleTimeout,
                        [current.clone()],
                        format!(
                            "oracle exceeded {:?} on '{current}', using heuristic fallback",
                            self.config.oracle_timeout
                        ),
                    ));
                    heuristic_decision(node, &state)
                }
            };

            let mut changed = apply_updates(blueprint, &mut state, &decision.updates);
            bump_guard_counter(blueprint, &current, &decision, &mut state, &mut changed);

            push_step(
                &mut steps,
                &*self.sink,
                StepKind::EnterNode,
                Some(&current),
                format!("entered '{current}'"),
                changed,
            );

            if let Some(guarded) = blueprint.guarded_edge_from(&current) {
                let key = decision
                    .branch_key
                    .clone()
                    .unwrap_or_else(|| guarded.guard.evaluate(&state));
                debug!(node = %current, branch = %key, "guard evaluated");
                let target = guarded.branches.get(&key).cloned();
                let shown =
                    target.as_ref().map_or_else(|| "?".to_string(), |t| t.to_string());
                push_step(
                    &mut steps,
                    &*self.sink,
                    StepKind::GuardEvaluated,
                    Some(&current),
                    format!("guard on '{current}' chose '{key}' -> {shown}"),
                    IndexMap::new(),
                );
                match target {
                    Some(EdgeTarget::End) => break,
                    Some(EdgeTarget::Node(next)) => current = next,
                    None => {
                        issues.push(
                            SimulationIssue::new(
                                IssueKind::DanglingEdgeTarget,
                                [current.clone()],
                                format!(
                                    "guard on '{current}' produced '{key}' but no branch covers it"
                                ),
                            )
                            .with_missing_branch(key.clone())
                            .with_suggestion(format!("route branch '{key}' to END or a node")),
                        );
                        push_step(
                            &mut steps,
                            &*self.sink,
                            StepKind::ExitNode,
                            Some(&current),
                            format!("halted in '{current}': branch '{key}' has no target"),
                            IndexMap::new(),
                        );
                        break;
                    }
                }
            } else if let Some(edge) = blueprint.plain_edge_from(&current) {
                push_step(
                    &mut steps,
                    &*self.sink,
                    StepKind::EdgeFollowed,
                    Some(&current),
                    format!("followed edge {current} -> {}", edge.target),
                    IndexMap::new(),
                );
                match &edge.target {
                    EdgeTarget::End => break,
                    EdgeTarget::Node(next) => current = next.clone(),
                }
            } else {
                // no outgoing edge at all: treat as an implicit END
                push_step(
                    &mut steps,
                    &*self.sink,
                    StepKind::EdgeFollowed,
                    Some(&current),
                    format!("followed edge {current} -> END (implicit)"),
                    IndexMap::new(),
                );
                break;
            }

            if steps.len() as u32 >= self.config.max_steps {
                issues.push(SimulationIssue::new(
                    IssueKind::StepBudgetExceeded,
                    [current.clone()],
                    format!("walk exceeded the step budget of {}", self.config.max_steps),
                ));
                break;
            }
        }

        let unreachable = index.unreachable_from(blueprint);
        if !unreachable.is_empty() {
            issues.push(SimulationIssue::new(
                IssueKind::UnreachableNode,
                unreachable.clone(),
                format!("unreachable from entry point: {}", unreachable.join(", ")),
            ));
        }

        let success = !issues.iter().any(SimulationIssue::is_error);
        if !success {
            warn!(
                blueprint = %blueprint.id,
                version = blueprint.version,
                errors = issues.iter().filter(|i| i.is_error()).count(),
                "simulation failed"
            );
        }

        let entered_any = steps.iter().any(|s| s.kind == StepKind::EnterNode);
        SimulationReport {
            success,
            step_count: steps.len() as u32,
            trace: render_trace(&steps),
            mermaid: entered_any.then(|| render_mermaid(&steps)),
            steps,
            issues,
            final_state: state,
            oracle_timeouts,
            simulated_at: Utc::now(),
        }
    }

    /// Checks that need no walking: a guard none of whose branches can
    /// reach END traps the walk no matter what the oracle decides.
    fn static_issues(&self, blueprint: &Blueprint, index: &GraphIndex) -> Vec<SimulationIssue> {
        let mut issues = Vec::new();
        for guarded in &blueprint.guarded_edges {
            let escapes = guarded.branches.values().any(|t| index.reaches_end(t));
            if !escapes {
                issues.push(
                    SimulationIssue::new(
                        IssueKind::NonTerminatingGuard,
                        [guarded.source.clone()],
                        format!("no branch of the guard on '{}' can reach END", guarded.source),
                    )
                    .with_suggestion("route the guard's terminal branch to END"),
                );
            }
        }
        issues
    }
}

fn seed_input(state: &mut SimState, sample_input: &str) {
    if let Some(FieldValue::Messages(messages)) = state.get_mut("messages") {
        messages.push(SimMessage::user(sample_input));
    }
}

/// Apply oracle updates reducer-aware and return the resulting values of
/// every touched field.
fn apply_updates(
    blueprint: &Blueprint,
    state: &mut SimState,
    updates: &IndexMap<String, FieldValue>,
) -> IndexMap<String, FieldValue> {
    let mut changed = IndexMap::new();
    for (field, value) in updates {
        let appends = blueprint
            .state_schema
            .get(field)
            .is_some_and(|f| f.reducer == Some(Reducer::Append));
        let merged = match (appends, state.get(field), value) {
            (true, Some(FieldValue::Messages(existing)), FieldValue::Messages(new)) => {
                let mut all = existing.clone();
                all.extend(new.iter().cloned());
                FieldValue::Messages(all)
            }
            (true, Some(FieldValue::StrList(existing)), FieldValue::StrList(new)) => {
                let mut all = existing.clone();
                all.extend(new.iter().cloned());
                FieldValue::StrList(all)
            }
            _ => value.clone(),
        };
        state.insert(field.clone(), merged.clone());
        changed.insert(field.clone(), merged);
    }
    changed
}

/// When the node hosts a counter guard and the oracle left the counter
/// alone, advance it: real node implementations do, and without this the
/// loop would depend on oracle cooperation to ever terminate.
fn bump_guard_counter(
    blueprint: &Blueprint,
    current: &str,
    decision: &Decision,
    state: &mut SimState,
    changed: &mut IndexMap<String, FieldValue>,
) {
    let Some(guarded) = blueprint.guarded_edge_from(current) else { return };
    let GuardExpression::CounterBelow { field, .. } = &guarded.guard else { return };
    if decision.updates.contains_key(field) {
        return;
    }
    let next = state.get(field).and_then(FieldValue::as_int).unwrap_or(0) + 1;
    state.insert(field.clone(), FieldValue::Int(next));
    changed.insert(field.clone(), FieldValue::Int(next));
}

fn push_step(
    steps: &mut Vec<SimulationStep>,
    sink: &dyn TraceSink,
    kind: StepKind,
    node_id: Option<&str>,
    description: String,
    changed: IndexMap<String, FieldValue>,
) {
    sink.record(TraceEvent::new("simulation", description.clone()));
    steps.push(SimulationStep {
        step_number: steps.len() as u32 + 1,
        kind,
        node_id: node_id.map(String::from),
        description,
        changed,
    });
}
