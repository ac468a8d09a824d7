//! Stuck-agent recovery.
//!
//! An agent is stuck when its last dispatched turn ended in a failure status
//! without its own state advancing. Recovery bumps its retry count, which
//! gives the next dispatch a fresh workflow id the substrate will not
//! deduplicate away. Agents whose current turn is still queued or running
//! are reported back so the scheduler can leave them alone.

use crate::dispatch::turn_workflow_id;
use notesim_proto::{AgentInstanceId, Result, RunId, SimulationStore, WorkflowQueue};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryOutcome {
    pub retried: u32,
    pub agent_ids: Vec<AgentInstanceId>,
    /// Agents whose current turn the substrate has accepted but not finished.
    pub in_flight: Vec<AgentInstanceId>,
}

pub struct StuckAgentRecovery {
    store: Arc<dyn SimulationStore>,
    queue: Arc<dyn WorkflowQueue>,
    retry_exhaustion_threshold: u32,
}

impl StuckAgentRecovery {
    pub fn new(
        store: Arc<dyn SimulationStore>,
        queue: Arc<dyn WorkflowQueue>,
        retry_exhaustion_threshold: u32,
    ) -> Self {
        Self {
            store,
            queue,
            retry_exhaustion_threshold,
        }
    }

    pub async fn recover(&self, run_id: RunId) -> Result<RecoveryOutcome> {
        let agents = self.store.list_active_agents(run_id).await?;
        let mut outcome = RecoveryOutcome::default();

        for agent in agents {
            if agent.retry_count >= self.retry_exhaustion_threshold {
                continue;
            }

            let workflow_id = turn_workflow_id(agent.id, agent.turn_count + 1, agent.retry_count);
            let status = match self.queue.get_workflow_status(&workflow_id).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(
                        agent_instance_id = %agent.id,
                        workflow_id = %workflow_id,
                        error = %e,
                        "Failed to read turn status; skipping recovery for this agent"
                    );
                    continue;
                }
            };

            let Some(status) = status else {
                continue;
            };
            if status.is_in_flight() {
                outcome.in_flight.push(agent.id);
                continue;
            }
            if !status.needs_recovery() {
                continue;
            }

            if let Some(retry_count) = self.store.increment_retry_count(agent.id).await? {
                info!(
                    agent_instance_id = %agent.id,
                    workflow_id = %workflow_id,
                    status = ?status,
                    retry_count,
                    "Recovering stuck agent"
                );
                outcome.retried += 1;
                outcome.agent_ids.push(agent.id);
            } else {
                debug!(agent_instance_id = %agent.id, "Agent left the run before recovery");
            }
        }

        Ok(outcome)
    }
}
