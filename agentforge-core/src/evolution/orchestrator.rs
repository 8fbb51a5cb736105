//! The evolution loop itself

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::blueprint::analysis::GraphIndex;
use crate::judge::{ExecutionJudge, JudgeError, RepairStage};
use crate::repair::RepairPlanner;
use crate::signal::RequirementSignal;
use crate::simulation::{IssueKind, SimulationIssue, Simulator, StepOracle};
use crate::synthesis::{CapabilityConfig, RetrievalCapability};

use super::{
    ArtifactLog, ArtifactStore, CancelToken, CodeEmitter, ConfigRepairHook, EvolutionConfig,
    EvolutionRun, RepairAttempt, RepairTrigger, TerminationReason, TestHarness,
};

/// Oracle timeouts per simulation at which an iteration counts as
/// stagnant even if the pass rate moved.
const TIMEOUT_STAGNATION_FLOOR: u32 = 2;

/// Runs the synthesize/simulate/repair/emit/test loop until it
/// converges, stalls, or has to hand the problem to a human.
pub struct EvolutionOrchestrator {
    planner: RepairPlanner,
    simulator: Simulator,
    judge: ExecutionJudge,
    config: EvolutionConfig,
    emitter: Arc<dyn CodeEmitter>,
    harness: Arc<dyn TestHarness>,
    oracle: Arc<dyn StepOracle>,
    hook: Option<Arc<dyn ConfigRepairHook>>,
    store: Option<Arc<dyn ArtifactStore>>,
    cancel: CancelToken,
    log: Arc<ArtifactLog>,
}

impl EvolutionOrchestrator {
    pub fn new(
        planner: RepairPlanner,
        config: EvolutionConfig,
        emitter: Arc<dyn CodeEmitter>,
        harness: Arc<dyn TestHarness>,
        oracle: Arc<dyn StepOracle>,
    ) -> Self {
        let simulator = Simulator::new(config.simulator.clone());
        Self {
            planner,
            simulator,
            judge: ExecutionJudge::new(),
            config,
            emitter,
            harness,
            oracle,
            hook: None,
            store: None,
            cancel: CancelToken::new(),
            log: Arc::new(ArtifactLog::new()),
        }
    }

    pub fn with_config_repair_hook(mut self, hook: Arc<dyn ConfigRepairHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn with_artifact_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Route the simulator's step events through an explicit sink.
    pub fn with_trace_sink(mut self, sink: Arc<dyn crate::trace::TraceSink>) -> Self {
        self.simulator = self.simulator.clone().with_trace_sink(sink);
        self
    }

    pub fn log(&self) -> Arc<ArtifactLog> {
        Arc::clone(&self.log)
    }

    /// Evolve an agent for `signal`. Errors only on synthesis of the very
    /// first blueprint; everything after that is captured in the run.
    pub async fn run(
        &self,
        signal: &RequirementSignal,
        capabilities: &CapabilityConfig,
    ) -> anyhow::Result<EvolutionRun> {
        if !signal.clarification.is_resolved() {
            anyhow::bail!("requirement signal still needs clarification");
        }

        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let mut attempts: Vec<RepairAttempt> = Vec::new();

        // the extractor can flag retrieval before any explicit config exists
        let mut capabilities = capabilities.clone();
        if signal.wants_retrieval && capabilities.retrieval.is_none() {
            capabilities.retrieval = Some(RetrievalCapability::default());
        }

        let pattern = self.planner.synthesizer().library().select(signal);
        info!(run = %run_id, pattern = %pattern, "starting evolution run");
        let mut blueprint = self.planner.synthesizer().synthesize(pattern, &capabilities)?;
        let mut needs_validation = true;
        let mut structural_attempts = 0u32;

        let mut best_pass_rate = 0.0f64;
        let mut previous_rate: Option<f64> = None;
        let mut stagnation_streak = 0u32;
        let mut termination = TerminationReason::IterationBound;

        'iterations: for iteration in 1..=self.config.max_iterations {
            if self.cancel.is_cancelled() {
                warn!(run = %run_id, iteration, "cancelled, escalating");
                termination = TerminationReason::ManualEscalation;
                break;
            }

            // timeouts only count against the iteration whose simulation
            // produced them
            let mut last_oracle_timeouts = 0u32;

            if needs_validation {
                let mut attempt_index = 0;
                loop {
                    let report = self
                        .simulator
                        .simulate(&blueprint, self.oracle.as_ref(), &self.config.sample_input)
                        .await;
                    last_oracle_timeouts = report.oracle_timeouts;
                    if report.success {
                        debug!(version = blueprint.version, steps = report.step_count, "simulation clean");
                        break;
                    }
                    let trigger = RepairTrigger::Simulation { issues: report.issues.clone() };
                    match self.planner.plan_repair(
                        &blueprint,
                        &report,
                        attempt_index,
                        self.config.max_repair_attempts,
                    ) {
                        Ok(revised) => {
                            attempts.push(RepairAttempt {
                                iteration,
                                prior_version: blueprint.version,
                                trigger,
                                resulting_version: Some(revised.version),
                                recorded_at: Utc::now(),
                            });
                            blueprint = revised;
                            attempt_index += 1;
                        }
                        Err(err) => {
                            error!(iteration, %err, "structural repair abandoned");
                            attempts.push(RepairAttempt {
                                iteration,
                                prior_version: blueprint.version,
                                trigger,
                                resulting_version: None,
                                recorded_at: Utc::now(),
                            });
                            termination = TerminationReason::ManualEscalation;
                            break 'iterations;
                        }
                    }
                }
                needs_validation = false;
            }

            let artifact = match self.emitter.emit(&blueprint).await {
                Ok(artifact) => artifact,
                Err(err) => {
                    error!(iteration, %err, "code emission failed");
                    termination = TerminationReason::ManualEscalation;
                    break;
                }
            };
            let outcomes = match self.harness.run_tests(&artifact).await {
                Ok(outcomes) => outcomes,
                Err(err) => {
                    error!(iteration, %err, "test harness failed");
                    termination = TerminationReason::ManualEscalation;
                    break;
                }
            };

            let total = outcomes.len();
            let passed = outcomes.iter().filter(|o| o.passed).count();
            let pass_rate = if total == 0 { 1.0 } else { passed as f64 / total as f64 };
            best_pass_rate = best_pass_rate.max(pass_rate);
            info!(iteration, version = blueprint.version, passed, total, "test batch finished");

            self.log.append(
                iteration,
                blueprint.version,
                pass_rate,
                format!("{passed}/{total} tests passed"),
            );
            if let Some(store) = &self.store {
                match store
                    .commit(
                        blueprint.version,
                        &format!("iteration {iteration}: {passed}/{total} tests passed"),
                    )
                    .await
                {
                    Ok(revision) => debug!(%revision, "artifact committed"),
                    Err(err) => warn!(%err, "artifact commit failed"),
                }
            }

            if pass_rate >= self.config.pass_threshold {
                termination = TerminationReason::Converged;
                break;
            }

            let improved = previous_rate.is_none_or(|prev| pass_rate > prev);
            if !improved || last_oracle_timeouts >= TIMEOUT_STAGNATION_FLOOR {
                stagnation_streak += 1;
            } else {
                stagnation_streak = 0;
            }
            previous_rate = Some(pass_rate);
            if stagnation_streak >= self.config.stagnation_window {
                warn!(iteration, pass_rate, "pass rate stopped improving");
                termination = TerminationReason::Stagnation;
                break;
            }

            match self.judge.classify(&outcomes) {
                Ok(classification) => {
                    debug!(category = ?classification.category, target = ?classification.target, "classified failures");
                    let trigger = RepairTrigger::TestFailures {
                        failing: total - passed,
                        total,
                        classification: classification.clone(),
                    };
                    match classification.target {
                        RepairStage::GraphSynthesizer => {
                            let index = GraphIndex::build(&blueprint);
                            let cyclic = index.cyclic_nodes(&blueprint);
                            let issue = SimulationIssue::new(
                                IssueKind::InfiniteLoop,
                                cyclic,
                                classification.detail.clone(),
                            );
                            match self.planner.plan_structural_repair(
                                &blueprint,
                                &[issue],
                                structural_attempts,
                                self.config.max_repair_attempts,
                            ) {
                                Ok(revised) => {
                                    structural_attempts += 1;
                                    attempts.push(RepairAttempt {
                                        iteration,
                                        prior_version: blueprint.version,
                                        trigger,
                                        resulting_version: Some(revised.version),
                                        recorded_at: Utc::now(),
                                    });
                                    blueprint = revised;
                                    needs_validation = true;
                                }
                                Err(err) => {
                                    error!(%err, "structural revision failed");
                                    attempts.push(RepairAttempt {
                                        iteration,
                                        prior_version: blueprint.version,
                                        trigger,
                                        resulting_version: None,
                                        recorded_at: Utc::now(),
                                    });
                                    termination = TerminationReason::ManualEscalation;
                                    break 'iterations;
                                }
                            }
                        }
                        RepairStage::RetrievalConfig | RepairStage::ToolConfig => {
                            if let Some(hook) = &self.hook {
                                if let Err(err) = hook.repair(&classification).await {
                                    error!(%err, "config repair hook failed");
                                    termination = TerminationReason::ManualEscalation;
                                    break 'iterations;
                                }
                            }
                            attempts.push(RepairAttempt {
                                iteration,
                                prior_version: blueprint.version,
                                trigger,
                                resulting_version: Some(blueprint.version),
                                recorded_at: Utc::now(),
                            });
                        }
                        RepairStage::CodeEmitter => {
                            // the next iteration re-emits from the same
                            // blueprint
                            attempts.push(RepairAttempt {
                                iteration,
                                prior_version: blueprint.version,
                                trigger,
                                resulting_version: Some(blueprint.version),
                                recorded_at: Utc::now(),
                            });
                        }
                        RepairStage::Manual => {
                            warn!(detail = %classification.detail, "escalating to manual review");
                            termination = TerminationReason::ManualEscalation;
                            break;
                        }
                    }
                }
                Err(JudgeError::NoFailingOutcomes) => {
                    // below threshold with nothing failing means the
                    // harness reported an inconsistent batch
                    warn!(iteration, pass_rate, "inconsistent test batch, escalating");
                    termination = TerminationReason::ManualEscalation;
                    break;
                }
            }
        }

        info!(run = %run_id, ?termination, best_pass_rate, "evolution run finished");
        Ok(EvolutionRun {
            id: run_id,
            attempts,
            termination,
            best_pass_rate,
            blueprint: Some(blueprint),
            started_at,
            finished_at: Utc::now(),
        })
    }
}
