//! Idempotent dispatch of agent turns and orchestrator generations.
//!
//! Workflow ids are deterministic and double as the substrate's
//! deduplication key, so dispatching the same turn twice collapses into one
//! execution while a retry (new `retry_count`) gets a fresh id.

use crate::config::DispatchConfig;
use notesim_proto::{
    AgentInstanceId, DispatchArgs, EnqueueOptions, OrchestratorConfig, Result, RunId,
    SimulationStore, WorkflowHandle, WorkflowQueue,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const AGENT_TURN_WORKFLOW: &str = "agent_turn";
pub const ORCHESTRATOR_WORKFLOW: &str = "orchestrator";

/// Workflow id and dedup key of one agent turn attempt.
pub fn turn_workflow_id(
    agent_instance_id: AgentInstanceId,
    turn_number: u32,
    retry_count: u32,
) -> String {
    format!("turn-{agent_instance_id}-{turn_number}-retry{retry_count}")
}

/// Workflow id and dedup key of one orchestrator generation.
pub fn orchestrator_workflow_id(run_id: RunId, generation: u32) -> String {
    format!("orchestrator-{run_id}-gen{generation}")
}

/// Counts reported by [`Dispatcher::schedule_turns_step`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleOutcome {
    pub dispatched: u32,
    /// Instances that already played their maximum number of turns.
    pub skipped: u32,
    pub removed_for_retries: u32,
    /// Instances left alone because their current turn has not finished.
    pub in_flight: u32,
}

pub struct Dispatcher {
    queue: Arc<dyn WorkflowQueue>,
    store: Arc<dyn SimulationStore>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<dyn WorkflowQueue>,
        store: Arc<dyn SimulationStore>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            queue,
            store,
            config,
        }
    }

    pub fn retry_exhaustion_threshold(&self) -> u32 {
        self.config.retry_exhaustion_threshold
    }

    pub async fn dispatch_agent_turn(
        &self,
        agent_instance_id: AgentInstanceId,
        turn_number: u32,
        retry_count: u32,
    ) -> Result<WorkflowHandle> {
        let workflow_id = turn_workflow_id(agent_instance_id, turn_number, retry_count);
        let options = EnqueueOptions {
            queue_name: self.config.turn_queue.clone(),
            workflow_name: AGENT_TURN_WORKFLOW.to_string(),
            workflow_id: workflow_id.clone(),
            deduplication_id: workflow_id,
        };
        let handle = self
            .queue
            .enqueue(options, DispatchArgs::AgentTurn { agent_instance_id })
            .await?;
        debug!(
            agent_instance_id = %agent_instance_id,
            turn_number,
            retry_count,
            workflow_id = %handle.workflow_id,
            "Dispatched agent turn"
        );
        Ok(handle)
    }

    /// Enqueues the control loop for `run_id` under a new generation.
    pub async fn dispatch_orchestrator(
        &self,
        run_id: RunId,
        generation: u32,
    ) -> Result<WorkflowHandle> {
        let workflow_id = orchestrator_workflow_id(run_id, generation);
        let options = EnqueueOptions {
            queue_name: self.config.orchestrator_queue.clone(),
            workflow_name: ORCHESTRATOR_WORKFLOW.to_string(),
            workflow_id: workflow_id.clone(),
            deduplication_id: workflow_id,
        };
        let handle = self
            .queue
            .enqueue(options, DispatchArgs::Orchestrator { run_id, generation })
            .await?;
        info!(run_id = %run_id, generation, "Dispatched orchestrator");
        Ok(handle)
    }

    /// Dispatches the next turn of every active instance of the run.
    ///
    /// Instances at `max_turns_per_agent` are skipped, as are those listed in
    /// `in_flight`. Instances whose retry count reached the exhaustion
    /// threshold are removed in one batch instead of dispatched.
    pub async fn schedule_turns_step(
        &self,
        run_id: RunId,
        config: &OrchestratorConfig,
        in_flight: &[AgentInstanceId],
    ) -> Result<ScheduleOutcome> {
        let agents = self.store.list_active_agents(run_id).await?;
        let mut outcome = ScheduleOutcome::default();
        let mut exhausted = Vec::new();

        for agent in &agents {
            if agent.turn_count >= config.max_turns_per_agent {
                outcome.skipped += 1;
                continue;
            }
            if agent.retry_count >= self.config.retry_exhaustion_threshold {
                exhausted.push(agent.id);
                continue;
            }
            if in_flight.contains(&agent.id) {
                outcome.in_flight += 1;
                continue;
            }
            self.dispatch_agent_turn(agent.id, agent.turn_count + 1, agent.retry_count)
                .await?;
            outcome.dispatched += 1;
        }

        if !exhausted.is_empty() {
            outcome.removed_for_retries = self.store.remove_agents(&exhausted).await?;
            warn!(
                run_id = %run_id,
                removed = outcome.removed_for_retries,
                threshold = self.config.retry_exhaustion_threshold,
                "Removed agents that exhausted their retries"
            );
        }

        debug!(
            run_id = %run_id,
            dispatched = outcome.dispatched,
            skipped = outcome.skipped,
            removed_for_retries = outcome.removed_for_retries,
            in_flight = outcome.in_flight,
            "Scheduled turns"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_workflow_id_format() {
        let id = AgentInstanceId::new();
        assert_eq!(turn_workflow_id(id, 4, 1), format!("turn-{id}-4-retry1"));
    }

    #[test]
    fn test_turn_workflow_id_is_deterministic() {
        let id = AgentInstanceId::new();
        assert_eq!(turn_workflow_id(id, 2, 0), turn_workflow_id(id, 2, 0));
    }

    #[test]
    fn test_retry_changes_turn_workflow_id() {
        let id = AgentInstanceId::new();
        assert_ne!(turn_workflow_id(id, 2, 0), turn_workflow_id(id, 2, 1));
    }

    #[test]
    fn test_orchestrator_workflow_id_format() {
        let run_id = RunId::new();
        assert_eq!(
            orchestrator_workflow_id(run_id, 3),
            format!("orchestrator-{run_id}-gen3")
        );
    }
}
