//! Durable execution substrate boundary.
//!
//! The substrate owns the work queues, deduplicates enqueues by key, reports
//! the terminal status of dispatched workflows, and journals step outputs so
//! a retried workflow can resume where it crashed. The engine consumes it
//! through [`WorkflowQueue`] and [`StepJournal`].

use crate::{AgentInstanceId, Result, RunId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Options for a single enqueue call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueOptions {
    pub queue_name: String,
    pub workflow_name: String,
    pub workflow_id: String,
    /// Enqueues sharing this key collapse into one execution.
    pub deduplication_id: String,
}

/// Handle returned by the substrate for an enqueued workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowHandle {
    pub workflow_id: String,
}

/// Status of a dispatched workflow as reported by the substrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    Enqueued,
    Pending,
    Running,
    Success,
    Error,
    MaxRecoveryAttemptsExceeded,
    Cancelled,
}

impl WorkflowStatus {
    /// Terminal statuses that leave an agent stuck and warrant a retry.
    pub fn needs_recovery(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Error
                | WorkflowStatus::MaxRecoveryAttemptsExceeded
                | WorkflowStatus::Cancelled
        )
    }

    /// Accepted by the substrate and not finished yet.
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Enqueued | WorkflowStatus::Pending | WorkflowStatus::Running
        )
    }
}

/// Arguments carried by a queued workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "workflow", rename_all = "snake_case")]
pub enum DispatchArgs {
    AgentTurn {
        agent_instance_id: AgentInstanceId,
    },
    Orchestrator {
        run_id: RunId,
        generation: u32,
    },
}

/// A journaled step result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub workflow_id: String,
    /// Position of the step within its workflow, starting at 0.
    pub step_index: u32,
    pub step_name: String,
    /// Hex SHA-256 of the step's JSON-encoded input.
    pub input_hash: String,
    /// JSON-encoded step output.
    pub output: String,
}

/// Queue side of the substrate.
#[async_trait]
pub trait WorkflowQueue: Send + Sync {
    async fn enqueue(&self, options: EnqueueOptions, args: DispatchArgs) -> Result<WorkflowHandle>;

    /// Returns `None` when the workflow id was never dispatched.
    async fn get_workflow_status(&self, workflow_id: &str) -> Result<Option<WorkflowStatus>>;
}

/// Step persistence side of the substrate.
#[async_trait]
pub trait StepJournal: Send + Sync {
    async fn load_step(&self, workflow_id: &str, step_index: u32) -> Result<Option<StepRecord>>;

    async fn record_step(&self, record: StepRecord) -> Result<()>;
}
