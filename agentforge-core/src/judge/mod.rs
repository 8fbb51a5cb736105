//! Failure classification
//!
//! After emitted code runs its test batch, the judge reads the failing
//! outcomes and decides which stage of the pipeline should act on them.
//! Classification is a fixed rule table evaluated top to bottom; the
//! first matching rule wins.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Diagnostic signatures of code-level faults in the emitted program.
static RUNTIME_SIGNATURES: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        "SyntaxError",
        "ImportError",
        "ModuleNotFoundError",
        "NameError",
        "AttributeError",
        "TypeError",
        r"Traceback \(most recent call last\)",
        "panicked at",
    ])
    .unwrap()
});

/// Signatures of graph-logic faults: the emitted agent ran but its
/// topology trapped it.
static STRUCTURAL_SIGNATURES: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        "GraphRecursionError",
        "(?i)recursion limit",
        "(?i)iteration limit",
        "(?i)infinite loop",
    ])
    .unwrap()
});

static TOOL_SIGNATURES: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new(["(?i)tool", "(?i)function call"]).unwrap()
});

static TOOL_CONFIG_SIGNATURES: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new(["(?i)unknown tool", "(?i)tool.*not found", "(?i)no such tool"]).unwrap()
});

/// Markers a test harness emits when retrieval produced nothing usable.
const EMPTY_RETRIEVAL_MARKERS: &[&str] =
    &["retrieval context is empty", "no documents retrieved", "empty context"];

/// Minimum failing outcomes with empty retrieval before the retrieval
/// config itself is blamed rather than a single flaky query.
const RETRIEVAL_CONFIG_QUORUM: usize = 3;
const CONTEXTUAL_RECALL_FLOOR: f64 = 0.3;
const FAITHFULNESS_FLOOR: f64 = 0.5;

/// Result of one evaluated test case against the emitted agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub test_id: String,
    pub passed: bool,
    /// Harness output for the case: assertion text, stderr, stack trace.
    #[serde(default)]
    pub diagnostic: String,
    /// Named quality metrics in `[0, 1]`, e.g. faithfulness.
    #[serde(default)]
    pub metrics: IndexMap<String, f64>,
    /// Documents the agent retrieved while answering this case.
    #[serde(default)]
    pub retrieval_context: Vec<String>,
}

impl TestOutcome {
    pub fn passed(test_id: impl Into<String>) -> Self {
        Self {
            test_id: test_id.into(),
            passed: true,
            diagnostic: String::new(),
            metrics: IndexMap::new(),
            retrieval_context: Vec::new(),
        }
    }

    pub fn failed(test_id: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        Self {
            test_id: test_id.into(),
            passed: false,
            diagnostic: diagnostic.into(),
            metrics: IndexMap::new(),
            retrieval_context: Vec::new(),
        }
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    pub fn with_retrieval_context(
        mut self,
        context: impl IntoIterator<Item = String>,
    ) -> Self {
        self.retrieval_context = context.into_iter().collect();
        self
    }

    fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// The topology itself trapped the agent.
    Structural,
    /// The emitted code is broken.
    Runtime,
    /// Retrieval returns documents but they do not support the answers.
    RetrievalQuality,
    /// Retrieval returns nothing useful across the batch.
    RetrievalConfig,
    /// A tool was called and misbehaved.
    ToolError,
    /// A tool was requested that is not wired up.
    ToolConfig,
    Unclassifiable,
}

/// Which pipeline stage should act on a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStage {
    GraphSynthesizer,
    CodeEmitter,
    RetrievalConfig,
    ToolConfig,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureClassification {
    pub category: FailureCategory,
    pub target: RepairStage,
    pub detail: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JudgeError {
    /// Every outcome passed; there is nothing to classify.
    #[error("no failing outcomes to classify")]
    NoFailingOutcomes,
}

/// Stateless rule-table classifier over a test batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionJudge;

impl ExecutionJudge {
    pub fn new() -> Self {
        Self
    }

    /// Classify the batch by its failing outcomes. Rules are checked in
    /// a fixed order so mixed batches classify deterministically.
    pub fn classify(
        &self,
        outcomes: &[TestOutcome],
    ) -> Result<FailureClassification, JudgeError> {
        let failing: Vec<&TestOutcome> = outcomes.iter().filter(|o| !o.passed).collect();
        if failing.is_empty() {
            return Err(JudgeError::NoFailingOutcomes);
        }
        debug!(failing = failing.len(), total = outcomes.len(), "classifying test batch");

        // rule 1: code-level faults trump everything else
        if let Some(outcome) =
            failing.iter().find(|o| RUNTIME_SIGNATURES.is_match(&o.diagnostic))
        {
            return Ok(FailureClassification {
                category: FailureCategory::Runtime,
                target: RepairStage::CodeEmitter,
                detail: format!("'{}' failed with a code-level fault", outcome.test_id),
                suggestions: vec!["regenerate the emitted module that raised the fault".into()],
            });
        }

        // rule 2: the whole batch retrieves nothing useful
        let starved = failing
            .iter()
            .filter(|o| {
                let marked = EMPTY_RETRIEVAL_MARKERS
                    .iter()
                    .any(|m| o.diagnostic.to_lowercase().contains(m));
                let low_recall =
                    o.metric("contextual_recall").is_some_and(|v| v < CONTEXTUAL_RECALL_FLOOR);
                marked || low_recall
            })
            .count();
        if starved >= RETRIEVAL_CONFIG_QUORUM {
            return Ok(FailureClassification {
                category: FailureCategory::RetrievalConfig,
                target: RepairStage::RetrievalConfig,
                detail: format!("{starved} failing cases retrieved nothing usable"),
                suggestions: vec![
                    "reduce chunk size and raise top_k".into(),
                    "verify the document source is indexed".into(),
                ],
            });
        }

        // rule 3: retrieval happens but the answers ignore it
        if let Some(outcome) = failing.iter().find(|o| {
            o.metric("faithfulness").is_some_and(|v| v < FAITHFULNESS_FLOOR)
                && !o.retrieval_context.is_empty()
        }) {
            return Ok(FailureClassification {
                category: FailureCategory::RetrievalQuality,
                target: RepairStage::RetrievalConfig,
                detail: format!(
                    "'{}' answered against retrieved context with low faithfulness",
                    outcome.test_id
                ),
                suggestions: vec!["tighten the retrieval prompt to cite the context".into()],
            });
        }

        // rule 4: tool trouble, split on whether the tool even exists
        if let Some(outcome) =
            failing.iter().find(|o| TOOL_SIGNATURES.is_match(&o.diagnostic))
        {
            let category = if TOOL_CONFIG_SIGNATURES.is_match(&outcome.diagnostic) {
                FailureCategory::ToolConfig
            } else {
                FailureCategory::ToolError
            };
            return Ok(FailureClassification {
                category,
                target: RepairStage::ToolConfig,
                detail: format!("'{}' failed inside a tool call", outcome.test_id),
                suggestions: vec!["check the tool registration and its arguments".into()],
            });
        }

        // rule 5: the agent ran but its topology trapped it
        if let Some(outcome) =
            failing.iter().find(|o| STRUCTURAL_SIGNATURES.is_match(&o.diagnostic))
        {
            return Ok(FailureClassification {
                category: FailureCategory::Structural,
                target: RepairStage::GraphSynthesizer,
                detail: format!("'{}' hit a graph-logic limit", outcome.test_id),
                suggestions: vec!["bound the offending cycle with a counter guard".into()],
            });
        }

        // rule 6: nothing matched; a human has to look
        Ok(FailureClassification {
            category: FailureCategory::Unclassifiable,
            target: RepairStage::Manual,
            detail: format!("{} failing cases matched no known signature", failing.len()),
            suggestions: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_passing_is_an_error() {
        let outcomes = vec![TestOutcome::passed("t1"), TestOutcome::passed("t2")];
        assert_eq!(
            ExecutionJudge::new().classify(&outcomes),
            Err(JudgeError::NoFailingOutcomes)
        );
    }

    #[test]
    fn syntax_error_is_runtime_for_the_emitter() {
        let outcomes = vec![TestOutcome::failed("t1", "SyntaxError: invalid syntax")];
        let classification = ExecutionJudge::new().classify(&outcomes).unwrap();
        assert_eq!(classification.category, FailureCategory::Runtime);
        assert_eq!(classification.target, RepairStage::CodeEmitter);
    }

    #[test]
    fn batch_wide_empty_retrieval_blames_the_config() {
        let outcomes: Vec<_> = (0..4)
            .map(|i| {
                TestOutcome::failed(format!("t{i}"), "answer missed the point")
                    .with_metric("contextual_recall", 0.0)
            })
            .collect();
        let classification = ExecutionJudge::new().classify(&outcomes).unwrap();
        assert_eq!(classification.category, FailureCategory::RetrievalConfig);
        assert_eq!(classification.target, RepairStage::RetrievalConfig);
    }

    #[test]
    fn two_starved_cases_are_not_enough_for_config_blame() {
        let outcomes: Vec<_> = (0..2)
            .map(|i| {
                TestOutcome::failed(format!("t{i}"), "retrieval context is empty")
            })
            .collect();
        let classification = ExecutionJudge::new().classify(&outcomes).unwrap();
        assert_ne!(classification.category, FailureCategory::RetrievalConfig);
    }

    #[test]
    fn low_faithfulness_with_context_is_quality() {
        let outcomes = vec![TestOutcome::failed("t1", "hallucinated the figure")
            .with_metric("faithfulness", 0.2)
            .with_retrieval_context(["the report says 42%".to_string()])];
        let classification = ExecutionJudge::new().classify(&outcomes).unwrap();
        assert_eq!(classification.category, FailureCategory::RetrievalQuality);
    }

    #[test]
    fn unknown_tool_is_a_config_problem() {
        let outcomes =
            vec![TestOutcome::failed("t1", "Unknown tool 'currency_convert' requested")];
        let classification = ExecutionJudge::new().classify(&outcomes).unwrap();
        assert_eq!(classification.category, FailureCategory::ToolConfig);
        assert_eq!(classification.target, RepairStage::ToolConfig);
    }

    #[test]
    fn tool_crash_is_a_tool_error() {
        let outcomes =
            vec![TestOutcome::failed("t1", "tool 'web_search' returned HTTP 500")];
        let classification = ExecutionJudge::new().classify(&outcomes).unwrap();
        assert_eq!(classification.category, FailureCategory::ToolError);
        assert_eq!(classification.target, RepairStage::ToolConfig);
    }

    #[test]
    fn recursion_limit_is_structural() {
        let outcomes = vec![TestOutcome::failed(
            "t1",
            "GraphRecursionError: recursion limit of 25 reached",
        )];
        let classification = ExecutionJudge::new().classify(&outcomes).unwrap();
        assert_eq!(classification.category, FailureCategory::Structural);
        assert_eq!(classification.target, RepairStage::GraphSynthesizer);
    }

    #[test]
    fn runtime_wins_over_structural_in_mixed_batches() {
        let outcomes = vec![
            TestOutcome::failed("t1", "GraphRecursionError: recursion limit of 25 reached"),
            TestOutcome::failed("t2", "NameError: name 'contextt' is not defined"),
        ];
        let classification = ExecutionJudge::new().classify(&outcomes).unwrap();
        assert_eq!(classification.category, FailureCategory::Runtime);
    }

    #[test]
    fn unmatched_diagnostics_escalate_to_manual() {
        let outcomes = vec![TestOutcome::failed("t1", "expected 'blue', got 'red'")];
        let classification = ExecutionJudge::new().classify(&outcomes).unwrap();
        assert_eq!(classification.category, FailureCategory::Unclassifiable);
        assert_eq!(classification.target, RepairStage::Manual);
    }
}
