//! Core engine for turning agent build requests into validated workflow graphs
//!
//! This crate contains the blueprint synthesis, simulation, and repair engine:
//! pattern selection, typed state schemas, graph assembly, oracle-driven
//! dry-run simulation, test-failure classification, and the bounded
//! evolution loop that drives all of it to convergence.

pub mod blueprint;
pub mod evolution;
pub mod judge;
pub mod pattern;
pub mod repair;
pub mod schema;
pub mod signal;
pub mod simulation;
pub mod synthesis;
pub mod trace;

pub use blueprint::{Blueprint, EdgeDef, EdgeTarget, GuardExpression, GuardedEdgeDef, NodeDef, NodeKind};
pub use evolution::{EvolutionConfig, EvolutionOrchestrator, EvolutionRun, TerminationReason};
pub use judge::{ExecutionJudge, FailureClassification, TestOutcome};
pub use pattern::{PatternId, PatternLibrary, PatternTemplate};
pub use repair::RepairPlanner;
pub use schema::{FieldType, FieldValue, StateField, StateSchema};
pub use signal::RequirementSignal;
pub use simulation::{Decision, SimulationReport, Simulator, SimulatorConfig, StepOracle};
pub use synthesis::{CapabilityConfig, GraphSynthesizer, SynthesisError};
