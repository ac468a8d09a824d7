//! Error types shared across the notesim crates.

use crate::RunStatus;
use thiserror::Error;

/// Errors raised by the orchestration core and its collaborators.
#[derive(Debug, Error)]
pub enum Error {
    /// A required entity does not exist. Fatal for the step that raised it.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The agent engine ran past its per-turn request or token budget.
    #[error("usage limit exceeded: {0}")]
    UsageLimitExceeded(String),

    /// The run is in a status the requested operation cannot start from.
    #[error("run {run_id} is {status} and cannot be orchestrated")]
    InvalidRunState { run_id: String, status: RunStatus },

    /// The circuit breaker is open after too many consecutive failures.
    #[error("circuit breaker open after {failures} consecutive failures")]
    CircuitOpen { failures: u32 },

    /// A journaled step was replayed with different input than it recorded.
    #[error("step {step} of workflow {workflow_id} replayed with different input")]
    NonDeterministicReplay { workflow_id: String, step: String },

    /// Invalid orchestrator or engine configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("workflow substrate error: {0}")]
    Substrate(String),

    #[error("agent engine error: {0}")]
    Agent(String),

    #[error("memory compaction error: {0}")]
    Compaction(String),

    #[error("scoring error: {0}")]
    Scoring(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Creates a not-found error for the given entity kind.
    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Creates a storage error.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Creates a substrate error.
    pub fn substrate(msg: impl Into<String>) -> Self {
        Self::Substrate(msg.into())
    }

    /// Returns true for errors the turn workflow degrades into a pass.
    pub fn is_usage_limit(&self) -> bool {
        matches!(self, Self::UsageLimitExceeded(_))
    }

    /// Returns true for infrastructure failures that may clear on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Substrate(_))
    }
}

/// Result alias using the shared [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
