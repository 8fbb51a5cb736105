//! Bounded structural repair
//!
//! Turns a failed simulation report into a revised blueprint, refusing
//! once the attempt budget is spent so a broken topology cannot be
//! reworked forever.

use thiserror::Error;
use tracing::{info, warn};

use crate::blueprint::Blueprint;
use crate::simulation::{SimulationIssue, SimulationReport};
use crate::synthesis::{GraphSynthesizer, SynthesisError};

#[derive(Debug, Error)]
pub enum RepairError {
    /// The attempt budget ran out; escalate instead of revising again.
    #[error("repair budget exhausted after {attempts} attempts")]
    Exhausted { attempts: u32 },
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),
}

/// Plans one structural revision per failed simulation, up to a budget.
#[derive(Debug, Clone)]
pub struct RepairPlanner {
    synthesizer: GraphSynthesizer,
}

impl RepairPlanner {
    pub fn new(synthesizer: GraphSynthesizer) -> Self {
        Self { synthesizer }
    }

    pub fn synthesizer(&self) -> &GraphSynthesizer {
        &self.synthesizer
    }

    /// Revise `blueprint` to address the report's errors. Warnings are
    /// logged and left alone; only error-severity issues drive revision.
    pub fn plan_repair(
        &self,
        blueprint: &Blueprint,
        report: &SimulationReport,
        attempt_index: u32,
        max_attempts: u32,
    ) -> Result<Blueprint, RepairError> {
        for warning in report.warnings() {
            warn!(kind = ?warning.kind, "{}", warning.description);
        }

        let errors: Vec<_> = report.errors().cloned().collect();
        self.plan_structural_repair(blueprint, &errors, attempt_index, max_attempts)
    }

    /// Revise against issues observed outside a simulation (the judge's
    /// structural findings), under the same attempt budget.
    pub fn plan_structural_repair(
        &self,
        blueprint: &Blueprint,
        issues: &[SimulationIssue],
        attempt_index: u32,
        max_attempts: u32,
    ) -> Result<Blueprint, RepairError> {
        if attempt_index >= max_attempts {
            return Err(RepairError::Exhausted { attempts: max_attempts });
        }

        let revised = self.synthesizer.revise(blueprint, issues)?;
        info!(
            attempt = attempt_index + 1,
            of = max_attempts,
            version = revised.version,
            "planned structural repair"
        );
        Ok(revised)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{PatternId, PatternLibrary};
    use crate::simulation::{HeuristicOracle, Simulator};
    use crate::synthesis::CapabilityConfig;

    fn planner() -> RepairPlanner {
        RepairPlanner::new(GraphSynthesizer::new(PatternLibrary::load().unwrap()))
    }

    #[tokio::test]
    async fn repairing_a_broken_loop_makes_it_simulate_clean() {
        let planner = planner();
        let mut bp = planner
            .synthesizer()
            .synthesize(PatternId::ReflectLoop, &CapabilityConfig::default())
            .unwrap();
        // both critic branches loop back: the walk can never end
        let guarded = bp.guarded_edges.iter_mut().find(|g| g.source == "critic").unwrap();
        guarded
            .branches
            .insert("end".into(), crate::blueprint::EdgeTarget::node("generator"));

        let simulator = Simulator::default();
        let report = simulator.simulate(&bp, &HeuristicOracle, "draft").await;
        assert!(!report.success);

        let repaired = planner.plan_repair(&bp, &report, 0, 3).unwrap();
        assert_eq!(repaired.version, 2);
        let second = simulator.simulate(&repaired, &HeuristicOracle, "draft").await;
        assert!(second.success, "issues: {:?}", second.issues);
    }

    #[test]
    fn structural_findings_respect_the_budget() {
        let planner = planner();
        let bp = planner
            .synthesizer()
            .synthesize(PatternId::ReflectLoop, &CapabilityConfig::default())
            .unwrap();
        let issue = SimulationIssue::new(
            crate::simulation::IssueKind::InfiniteLoop,
            ["generator".to_string(), "critic".to_string()],
            "recursion limit reached in the emitted agent",
        );
        let revised = planner.plan_structural_repair(&bp, &[issue.clone()], 0, 1).unwrap();
        assert_eq!(revised.version, 2);
        let err = planner.plan_structural_repair(&revised, &[issue], 1, 1).unwrap_err();
        assert!(matches!(err, RepairError::Exhausted { attempts: 1 }));
    }

    #[tokio::test]
    async fn budget_exhaustion_is_an_error() {
        let planner = planner();
        let bp = planner
            .synthesizer()
            .synthesize(PatternId::Linear, &CapabilityConfig::default())
            .unwrap();
        let report = Simulator::default().simulate(&bp, &HeuristicOracle, "hi").await;
        let err = planner.plan_repair(&bp, &report, 3, 3).unwrap_err();
        assert!(matches!(err, RepairError::Exhausted { attempts: 3 }));
    }
}
