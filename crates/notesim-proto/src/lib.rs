//! # notesim-proto
//!
//! Shared types, error definitions, and traits for the notesim engine.
//!
//! This crate provides the foundational abstractions used by the engine,
//! including:
//! - The simulation data model (runs, agent instances, memory, actions)
//! - The durable substrate boundary (queues, workflow status, step journal)
//! - Storage and LLM collaborator traits
//! - The common error type

mod action;
mod agent;
mod content;
mod engine;
mod error;
mod ids;
mod run;
mod store;
mod substrate;

pub use action::{ActionSelection, ActionType, AgentAction, HelpfulnessLevel, NoteClassification};
pub use agent::{
    AgentInstance, AgentMemory, AgentProfile, ConversationMessage, MessageRole,
    RECENT_ACTIONS_CAPACITY, RecentActions,
};
pub use content::{ContentAvailability, Note, Request, RequestWithNotes, TurnDependencies};
pub use engine::{
    ActionContext, AgentEngine, MemoryCompactor, ProgressCache, ScoringOutcome, ScoringTrigger,
    SelectionResult, TurnResult, UsageLimits, progress_cache_key,
};
pub use error::{Error, Result};
pub use ids::{
    AgentInstanceId, CommunityId, ConfigId, NoteId, ParticipantId, ProfileId, RequestId, RunId,
};
pub use run::{OrchestratorConfig, PopulationSnapshot, RunMetrics, RunStatus, SimulationRun};
pub use store::SimulationStore;
pub use substrate::{
    DispatchArgs, EnqueueOptions, StepJournal, StepRecord, WorkflowHandle, WorkflowQueue,
    WorkflowStatus,
};
