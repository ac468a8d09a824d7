//! Executes dequeued workflows.
//!
//! The substrate hands the worker a workflow id and the arguments it was
//! enqueued with; the worker routes them to the turn workflow or the control
//! loop.

use crate::config::EngineConfig;
use crate::orchestrator::{Orchestrator, OrchestratorReport};
use crate::turn::{AgentTurnWorkflow, TurnReport};
use notesim_proto::{
    AgentEngine, DispatchArgs, MemoryCompactor, ProgressCache, Result, ScoringTrigger,
    SimulationStore, StepJournal, WorkflowQueue,
};
use std::sync::Arc;
use tracing::{Instrument, info_span};

/// Collaborators shared by every workflow the worker runs.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn SimulationStore>,
    pub queue: Arc<dyn WorkflowQueue>,
    pub journal: Arc<dyn StepJournal>,
    pub engine: Arc<dyn AgentEngine>,
    pub compactor: Arc<dyn MemoryCompactor>,
    pub scoring: Arc<dyn ScoringTrigger>,
    pub cache: Arc<dyn ProgressCache>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowOutput {
    Turn(TurnReport),
    Orchestrator(OrchestratorReport),
}

pub struct WorkflowWorker {
    turns: AgentTurnWorkflow,
    orchestrator: Orchestrator,
}

impl WorkflowWorker {
    pub fn new(collaborators: Collaborators, config: &EngineConfig) -> Self {
        let Collaborators {
            store,
            queue,
            journal,
            engine,
            compactor,
            scoring,
            cache,
        } = collaborators;

        Self {
            turns: AgentTurnWorkflow::new(
                Arc::clone(&store),
                engine,
                compactor,
                cache,
                journal,
                config.turn.clone(),
            ),
            orchestrator: Orchestrator::new(store, queue, scoring, config),
        }
    }

    pub fn turns(&self) -> &AgentTurnWorkflow {
        &self.turns
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub async fn execute(&self, workflow_id: &str, args: DispatchArgs) -> Result<WorkflowOutput> {
        match args {
            DispatchArgs::AgentTurn { agent_instance_id } => {
                let span = info_span!("agent_turn", workflow_id, agent_instance_id = %agent_instance_id);
                self.turns
                    .run_agent_turn(agent_instance_id, workflow_id)
                    .instrument(span)
                    .await
                    .map(WorkflowOutput::Turn)
            }
            DispatchArgs::Orchestrator { run_id, generation } => {
                let span = info_span!("orchestrator", workflow_id, run_id = %run_id, generation);
                self.orchestrator
                    .run_orchestrator(run_id)
                    .instrument(span)
                    .await
                    .map(WorkflowOutput::Orchestrator)
            }
        }
    }
}
