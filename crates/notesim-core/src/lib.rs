//! # notesim-core
//!
//! Orchestration engine for the community-notes simulation.
//!
//! This crate provides:
//! - The per-run control loop (content gating, population, recovery, dispatch)
//! - The six-step agent turn workflow with durable, replayable steps
//! - Idempotent dispatch keyed by deterministic workflow ids
//! - Memory compaction and the circuit breaker guarding turn scheduling
//! - Engine configuration and tracing setup
//! - In-memory collaborators for tests

mod circuit_breaker;
mod config;
mod dispatch;
mod memory;
mod orchestrator;
mod population;
mod recovery;
pub mod telemetry;
pub mod testing;
mod turn;
mod worker;
pub mod workflow;

pub use circuit_breaker::CircuitBreaker;
pub use config::{
    ConfigError, DispatchConfig, EngineConfig, LoopConfig, PopulationConfig, TurnConfig,
};
pub use dispatch::{
    AGENT_TURN_WORKFLOW, Dispatcher, ORCHESTRATOR_WORKFLOW, ScheduleOutcome,
    orchestrator_workflow_id, turn_workflow_id,
};
pub use memory::{CompactionResult, compact_history, next_memory, should_compact};
pub use orchestrator::{LoopExit, Orchestrator, OrchestratorReport};
pub use population::PopulationManager;
pub use recovery::{RecoveryOutcome, StuckAgentRecovery};
pub use turn::{AgentTurnWorkflow, ExecutionOutcome, PersistOutcome, TurnContext, TurnReport};
pub use worker::{Collaborators, WorkflowOutput, WorkflowWorker};
pub use workflow::WorkflowRunner;
