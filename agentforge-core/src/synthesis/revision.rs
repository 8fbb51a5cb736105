//! Structural revision of blueprints from simulation findings

use tracing::{debug, info};

use crate::blueprint::{
    Blueprint, EdgeTarget, GuardExpression, GuardedEdgeDef, NodeId, KEY_CONTINUE, KEY_END,
};
use crate::schema::{FieldType, FieldValue, StateField, StateSchema};
use crate::simulation::{IssueKind, SimulationIssue};

use super::synthesizer::GraphSynthesizer;
use super::Result;

/// Counter the revision pass introduces when it has to bound a loop that
/// had no counter of its own.
const LOOP_COUNT_FIELD: &str = "loop_count";

impl GraphSynthesizer {
    /// Produce a revised blueprint that addresses the given issues. The
    /// version is bumped and every structural invariant re-checked;
    /// warnings in the slice are ignored.
    pub fn revise(&self, blueprint: &Blueprint, issues: &[SimulationIssue]) -> Result<Blueprint> {
        let mut revised = blueprint.clone();
        revised.version = blueprint.version + 1;

        for issue in issues.iter().filter(|i| i.is_error()) {
            debug!(kind = ?issue.kind, nodes = ?issue.affected_nodes, "applying revision");
            match issue.kind {
                IssueKind::InfiniteLoop => self.bound_loop(&mut revised, issue)?,
                IssueKind::DanglingEdgeTarget => Self::repair_dangling(&mut revised, issue),
                IssueKind::NonTerminatingGuard => Self::add_terminal_branch(&mut revised, issue),
                IssueKind::UnreachableNode => Self::remove_nodes(&mut revised, issue),
                IssueKind::StepBudgetExceeded | IssueKind::OracleTimeout => {}
            }
        }

        revised.validate()?;
        info!(
            id = %revised.id,
            from = blueprint.version,
            to = revised.version,
            "revised blueprint"
        );
        Ok(revised)
    }

    /// Bound a runaway cycle. Prefer tightening an existing counter guard
    /// on the cycle; otherwise convert one edge of the cycle into a
    /// counter guard over a dedicated loop counter.
    fn bound_loop(&self, revised: &mut Blueprint, issue: &SimulationIssue) -> Result<()> {
        let max_iterations = self.template(revised.pattern)?.max_iterations;
        let affected = &issue.affected_nodes;

        if let Some(guarded) =
            revised.guarded_edges.iter_mut().find(|g| affected.contains(&g.source))
        {
            match &mut guarded.guard {
                GuardExpression::CounterBelow { limit, .. } => {
                    *limit = (*limit - 1).max(1);
                }
                _ => {
                    let continue_target = in_cycle_target(guarded, affected);
                    guarded.guard = GuardExpression::CounterBelow {
                        field: LOOP_COUNT_FIELD.into(),
                        limit: max_iterations,
                    };
                    guarded.branches.clear();
                    guarded.branches.insert(KEY_CONTINUE.into(), continue_target);
                    guarded.branches.insert(KEY_END.into(), EdgeTarget::End);
                    ensure_loop_counter(revised)?;
                }
            }
            return Ok(());
        }

        // no guard anywhere on the cycle: convert the first affected
        // node's plain edge into a bounded one
        if let Some(source) = affected.first().cloned() {
            if let Some(pos) = revised.edges.iter().position(|e| e.source == source) {
                let old = revised.edges.remove(pos);
                revised.guarded_edges.push(GuardedEdgeDef::new(
                    source,
                    GuardExpression::CounterBelow {
                        field: LOOP_COUNT_FIELD.into(),
                        limit: max_iterations,
                    },
                    [
                        (KEY_CONTINUE.to_string(), old.target),
                        (KEY_END.to_string(), EdgeTarget::End),
                    ],
                ));
                ensure_loop_counter(revised)?;
            }
        }
        Ok(())
    }

    /// Point the named missing branch at END, and retarget anything else
    /// that still lands on a node that no longer exists.
    fn repair_dangling(revised: &mut Blueprint, issue: &SimulationIssue) {
        if let (Some(source), Some(key)) = (issue.affected_nodes.first(), &issue.missing_branch) {
            if let Some(guarded) = revised.guarded_edges.iter_mut().find(|g| &g.source == source) {
                guarded.branches.insert(key.clone(), EdgeTarget::End);
            }
        }

        let known: Vec<NodeId> = revised.nodes.iter().map(|n| n.id.clone()).collect();
        let resolve = |target: &mut EdgeTarget| {
            if let EdgeTarget::Node(id) = target {
                if !known.contains(id) {
                    *target = EdgeTarget::End;
                }
            }
        };
        for edge in &mut revised.edges {
            resolve(&mut edge.target);
        }
        for guarded in &mut revised.guarded_edges {
            for target in guarded.branches.values_mut() {
                resolve(target);
            }
        }
    }

    /// Give the guard a way out: route its terminal key to END.
    fn add_terminal_branch(revised: &mut Blueprint, issue: &SimulationIssue) {
        for source in &issue.affected_nodes {
            if let Some(guarded) = revised.guarded_edges.iter_mut().find(|g| &g.source == source) {
                let key = guarded.guard.terminal_key().to_string();
                guarded.branches.insert(key, EdgeTarget::End);
            }
        }
    }

    /// Drop unreachable nodes together with everything that leaves them.
    fn remove_nodes(revised: &mut Blueprint, issue: &SimulationIssue) {
        let doomed = &issue.affected_nodes;
        revised.nodes.retain(|n| !doomed.contains(&n.id));
        revised.edges.retain(|e| !doomed.contains(&e.source));
        revised.guarded_edges.retain(|g| !doomed.contains(&g.source));
        Self::repair_dangling(revised, &SimulationIssue::new(IssueKind::DanglingEdgeTarget, [], ""));
    }
}

/// A branch target that stays inside the reported cycle, so the bounded
/// loop keeps looping until the counter trips.
fn in_cycle_target(guarded: &GuardedEdgeDef, affected: &[NodeId]) -> EdgeTarget {
    guarded
        .branches
        .values()
        .find(|t| t.as_node().is_some_and(|id| affected.contains(id)))
        .or_else(|| guarded.branches.values().find(|t| !t.is_end()))
        .cloned()
        .unwrap_or(EdgeTarget::End)
}

fn ensure_loop_counter(revised: &mut Blueprint) -> Result<()> {
    let counter = StateField::new(LOOP_COUNT_FIELD, FieldType::Int)
        .with_default(FieldValue::Int(0))
        .with_description("Bounds loops introduced by structural repair.");
    revised.state_schema = StateSchema::merge([
        revised.state_schema.clone(),
        StateSchema::from_fields([counter]),
    ])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{PatternId, PatternLibrary};
    use crate::synthesis::CapabilityConfig;

    fn synthesizer() -> GraphSynthesizer {
        GraphSynthesizer::new(PatternLibrary::load().unwrap())
    }

    #[test]
    fn revision_bumps_version_even_for_empty_issue_list() {
        let synth = synthesizer();
        let bp = synth.synthesize(PatternId::Linear, &CapabilityConfig::default()).unwrap();
        let revised = synth.revise(&bp, &[]).unwrap();
        assert_eq!(revised.version, 2);
        assert_eq!(revised.id, bp.id);
    }

    #[test]
    fn infinite_loop_tightens_existing_counter_guard() {
        let synth = synthesizer();
        let bp = synth.synthesize(PatternId::ReflectLoop, &CapabilityConfig::default()).unwrap();
        let issue = SimulationIssue::new(
            IssueKind::InfiniteLoop,
            ["generator".to_string(), "critic".to_string()],
            "cycle generator/critic never terminated",
        );
        let revised = synth.revise(&bp, &[issue]).unwrap();
        match &revised.guarded_edge_from("critic").unwrap().guard {
            GuardExpression::CounterBelow { limit, .. } => assert_eq!(*limit, 2),
            other => panic!("unexpected guard: {other:?}"),
        }
    }

    #[test]
    fn infinite_loop_without_guard_gets_a_counter() {
        let synth = synthesizer();
        let bp = synth.synthesize(PatternId::PlanExecute, &CapabilityConfig::default()).unwrap();
        // pretend executor/replanner cycles without its truthy guard firing
        let mut stripped = bp.clone();
        stripped.guarded_edges.clear();
        stripped.edges.push(crate::blueprint::EdgeDef::new(
            "replanner",
            EdgeTarget::node("executor"),
        ));
        let issue = SimulationIssue::new(
            IssueKind::InfiniteLoop,
            ["executor".to_string(), "replanner".to_string()],
            "cycle executor/replanner never terminated",
        );
        let revised = synth.revise(&stripped, &[issue]).unwrap();
        let guarded = revised.guarded_edge_from("executor").unwrap();
        assert!(matches!(guarded.guard, GuardExpression::CounterBelow { .. }));
        assert!(revised.state_schema.contains(LOOP_COUNT_FIELD));
        assert!(revised.validate().is_ok());
    }

    #[test]
    fn dangling_branch_is_routed_to_end() {
        let synth = synthesizer();
        let bp = synth.synthesize(PatternId::Supervisor, &CapabilityConfig::default()).unwrap();
        let issue = SimulationIssue::new(
            IssueKind::DanglingEdgeTarget,
            ["supervisor".to_string()],
            "branch 'escalate' has no target",
        )
        .with_missing_branch("escalate");
        let revised = synth.revise(&bp, &[issue]).unwrap();
        let guarded = revised.guarded_edge_from("supervisor").unwrap();
        assert_eq!(guarded.branches["escalate"], EdgeTarget::End);
    }

    #[test]
    fn unreachable_node_is_removed_with_its_edges() {
        let synth = synthesizer();
        let mut bp = synth.synthesize(PatternId::Linear, &CapabilityConfig::default()).unwrap();
        bp.nodes.push(crate::blueprint::NodeDef::new(
            "orphan",
            crate::blueprint::NodeKind::Reasoning,
            "never wired in",
        ));
        bp.edges.push(crate::blueprint::EdgeDef::new("orphan", EdgeTarget::node("agent")));
        let issue = SimulationIssue::new(
            IssueKind::UnreachableNode,
            ["orphan".to_string()],
            "orphan is not reachable from the entry point",
        );
        // unreachable alone is a warning; force it through as an error
        let mut issue = issue;
        issue.severity = crate::simulation::Severity::Error;
        let revised = synth.revise(&bp, &[issue]).unwrap();
        assert!(!revised.has_node("orphan"));
        assert!(revised.plain_edge_from("orphan").is_none());
        assert!(revised.validate().is_ok());
    }

    #[test]
    fn non_terminating_guard_gains_exit() {
        let synth = synthesizer();
        let mut bp = synth.synthesize(PatternId::Supervisor, &CapabilityConfig::default()).unwrap();
        // rewire the default branch back into the loop so nothing exits
        let guarded = bp.guarded_edges.iter_mut().find(|g| g.source == "supervisor").unwrap();
        guarded.branches.insert("default".into(), EdgeTarget::node("worker"));
        let issue = SimulationIssue::new(
            IssueKind::NonTerminatingGuard,
            ["supervisor".to_string()],
            "no branch of the supervisor guard reaches END",
        );
        let revised = synth.revise(&bp, &[issue]).unwrap();
        let guarded = revised.guarded_edge_from("supervisor").unwrap();
        assert_eq!(guarded.branches["default"], EdgeTarget::End);
    }
}
