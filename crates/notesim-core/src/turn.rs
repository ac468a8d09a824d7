//! Agent turn workflow.
//!
//! One dispatched turn runs six journaled steps:
//!
//! 1. `load_context`: instance, profile, run community, and memory
//! 2. `compact_memory`: summarize history on the compaction cadence
//! 3. `build_deps`: open requests with their notes, and notes needing ratings
//! 4. `select_action`: phase 1, choose an action type
//! 5. `execute_action`: phase 2, carry the action out (skipped on pass)
//! 6. `persist_state`: write memory, advance the turn, reset retries
//!
//! Running out of usage budget never fails a turn: the agent passes instead
//! and the messages produced so far are kept.

use crate::config::TurnConfig;
use crate::memory::{CompactionResult, compact_history, next_memory};
use crate::workflow::WorkflowRunner;
use notesim_proto::{
    ActionContext, ActionSelection, ActionType, AgentAction, AgentEngine, AgentInstanceId,
    AgentMemory, AgentProfile, CommunityId, ConversationMessage, Error, MemoryCompactor,
    ProgressCache, RequestWithNotes, Result, RunId, SelectionResult, SimulationStore,
    StepJournal, TurnDependencies, UsageLimits, progress_cache_key,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything loaded in step 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnContext {
    pub agent_instance_id: AgentInstanceId,
    pub run_id: RunId,
    pub community_id: CommunityId,
    pub profile: AgentProfile,
    /// Turns the instance has completed before this one.
    pub instance_turn_count: u32,
    pub memory: AgentMemory,
}

impl TurnContext {
    pub fn model_name(&self) -> &str {
        &self.profile.model_name
    }

    pub fn action_context(&self) -> ActionContext {
        ActionContext {
            agent_instance_id: self.agent_instance_id,
            run_id: self.run_id,
            community_id: self.community_id,
            profile: self.profile.clone(),
            turn_number: self.instance_turn_count + 1,
        }
    }
}

/// Result of phase 2, or of a phase-1 pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub action: AgentAction,
    pub reasoning: String,
    pub messages: Vec<ConversationMessage>,
    pub usage_limit_exceeded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistOutcome {
    pub turn_count: u32,
}

/// Summary of a finished turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReport {
    pub agent_instance_id: AgentInstanceId,
    pub action: AgentAction,
    pub reasoning: String,
    pub was_compacted: bool,
    pub usage_limit_exceeded: bool,
    /// Instance turn count after persistence.
    pub turn_count: u32,
    pub replayed_steps: u32,
}

pub struct AgentTurnWorkflow {
    store: Arc<dyn SimulationStore>,
    engine: Arc<dyn AgentEngine>,
    compactor: Arc<dyn MemoryCompactor>,
    cache: Arc<dyn ProgressCache>,
    journal: Arc<dyn StepJournal>,
    config: TurnConfig,
}

impl AgentTurnWorkflow {
    pub fn new(
        store: Arc<dyn SimulationStore>,
        engine: Arc<dyn AgentEngine>,
        compactor: Arc<dyn MemoryCompactor>,
        cache: Arc<dyn ProgressCache>,
        journal: Arc<dyn StepJournal>,
        config: TurnConfig,
    ) -> Self {
        Self {
            store,
            engine,
            compactor,
            cache,
            journal,
            config,
        }
    }

    /// Runs one turn for `agent_instance_id` under `workflow_id`.
    ///
    /// Re-running with the same workflow id resumes after the last journaled step.
    pub async fn run_agent_turn(
        &self,
        agent_instance_id: AgentInstanceId,
        workflow_id: &str,
    ) -> Result<TurnReport> {
        let mut runner = WorkflowRunner::new(workflow_id, Arc::clone(&self.journal));

        let context: TurnContext = runner
            .step("load_context", &agent_instance_id, || {
                self.load_context_step(agent_instance_id)
            })
            .await?;

        let compaction: CompactionResult = runner
            .step(
                "compact_memory",
                &(agent_instance_id, context.memory.turn_count),
                || async {
                    Ok(compact_history(
                        self.compactor.as_ref(),
                        context.memory.message_history.clone(),
                        context.memory.turn_count,
                        self.config.compaction_interval,
                    )
                    .await)
                },
            )
            .await?;

        let deps: TurnDependencies = runner
            .step("build_deps", &context.community_id, || {
                self.build_deps_step(context.community_id)
            })
            .await?;

        let limits = self.usage_limits(&context.profile);
        let turn_number = context.instance_turn_count + 1;

        let selection: SelectionResult = runner
            .step("select_action", &(agent_instance_id, turn_number), || {
                self.select_action_step(&context, &deps, &compaction.messages, limits)
            })
            .await?;

        let chosen = selection.selection.action_type;
        let outcome = if chosen.requires_execution() {
            runner
                .step("execute_action", &(agent_instance_id, chosen), || {
                    self.execute_action_step(&context, &deps, &selection, limits)
                })
                .await?
        } else {
            ExecutionOutcome {
                action: AgentAction::pass(selection.selection.reasoning.clone()),
                reasoning: selection.selection.reasoning.clone(),
                messages: selection.messages.clone(),
                usage_limit_exceeded: false,
            }
        };

        let action_type = outcome.action.action_type();
        let persisted: PersistOutcome = runner
            .step("persist_state", &(agent_instance_id, action_type), || {
                self.persist_state_step(&context, outcome.messages.clone(), action_type)
            })
            .await?;

        info!(
            agent_instance_id = %agent_instance_id,
            workflow_id,
            model = context.model_name(),
            action = %action_type,
            turn_count = persisted.turn_count,
            compacted = compaction.was_compacted,
            "Agent turn completed"
        );

        Ok(TurnReport {
            agent_instance_id,
            action: outcome.action,
            reasoning: outcome.reasoning,
            was_compacted: compaction.was_compacted,
            usage_limit_exceeded: outcome.usage_limit_exceeded,
            turn_count: persisted.turn_count,
            replayed_steps: runner.replayed_steps(),
        })
    }

    /// Budget for this agent: profile overrides, else engine defaults.
    pub fn usage_limits(&self, profile: &AgentProfile) -> UsageLimits {
        let defaults = self.config.default_usage_limits();
        UsageLimits {
            request_limit: profile.request_limit.unwrap_or(defaults.request_limit),
            total_tokens_limit: profile
                .total_tokens_limit
                .unwrap_or(defaults.total_tokens_limit),
        }
    }

    pub async fn load_context_step(&self, agent_instance_id: AgentInstanceId) -> Result<TurnContext> {
        let instance = self
            .store
            .get_agent(agent_instance_id)
            .await?
            .ok_or_else(|| Error::not_found("agent instance", agent_instance_id))?;
        let run = self
            .store
            .get_run(instance.run_id)
            .await?
            .ok_or_else(|| Error::not_found("simulation run", instance.run_id))?;
        let profile = self
            .store
            .get_profile(instance.profile_id)
            .await?
            .ok_or_else(|| Error::not_found("agent profile", instance.profile_id))?;
        let memory = self
            .store
            .get_memory(agent_instance_id)
            .await?
            .unwrap_or_default();

        debug!(
            agent_instance_id = %agent_instance_id,
            model = %profile.model_name,
            history = memory.message_history.len(),
            turn_count = instance.turn_count,
            "Loaded turn context"
        );

        Ok(TurnContext {
            agent_instance_id,
            run_id: instance.run_id,
            community_id: run.community_id,
            profile,
            instance_turn_count: instance.turn_count,
            memory,
        })
    }

    pub async fn build_deps_step(&self, community_id: CommunityId) -> Result<TurnDependencies> {
        let requests = self
            .store
            .open_requests(community_id, self.config.open_requests_limit)
            .await?;

        let mut with_notes = Vec::with_capacity(requests.len());
        for request in requests {
            let notes = self
                .store
                .notes_for_request(request.id, self.config.notes_per_request)
                .await?;
            with_notes.push(RequestWithNotes { request, notes });
        }

        let notes_needing_ratings = self
            .store
            .notes_needing_ratings(community_id, self.config.notes_needing_ratings_limit)
            .await?;

        Ok(TurnDependencies {
            requests: with_notes,
            notes_needing_ratings,
        })
    }

    /// Phase 1. A budget overrun here also degrades to a pass.
    pub async fn select_action_step(
        &self,
        context: &TurnContext,
        deps: &TurnDependencies,
        history: &[ConversationMessage],
        limits: UsageLimits,
    ) -> Result<SelectionResult> {
        let action_context = context.action_context();
        match self
            .engine
            .select_action(
                &action_context,
                deps,
                history,
                &context.memory.recent_actions,
                limits,
            )
            .await
        {
            Ok(selection) => Ok(selection),
            Err(e) if e.is_usage_limit() => {
                warn!(
                    agent_instance_id = %context.agent_instance_id,
                    error = %e,
                    "Usage limit exceeded during action selection; passing turn"
                );
                Ok(SelectionResult {
                    selection: ActionSelection {
                        action_type: ActionType::PassTurn,
                        reasoning: format!(
                            "Passing turn: usage limit exceeded during action selection ({e})"
                        ),
                    },
                    messages: history.to_vec(),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Phase 2, continuing from the phase-1 trace.
    pub async fn execute_action_step(
        &self,
        context: &TurnContext,
        deps: &TurnDependencies,
        selection: &SelectionResult,
        limits: UsageLimits,
    ) -> Result<ExecutionOutcome> {
        let action_context = context.action_context();
        let chosen = selection.selection.action_type;
        match self
            .engine
            .run_turn(&action_context, deps, &selection.messages, limits, chosen)
            .await
        {
            Ok(result) => Ok(ExecutionOutcome {
                action: result.action,
                reasoning: result.reasoning,
                messages: result.messages,
                usage_limit_exceeded: false,
            }),
            Err(e) if e.is_usage_limit() => {
                warn!(
                    agent_instance_id = %context.agent_instance_id,
                    chosen = %chosen,
                    error = %e,
                    "Usage limit exceeded while executing action; passing turn"
                );
                let reasoning =
                    format!("Passing turn: usage limit exceeded while executing {chosen} ({e})");
                Ok(ExecutionOutcome {
                    action: AgentAction::pass(reasoning.clone()),
                    reasoning,
                    messages: selection.messages.clone(),
                    usage_limit_exceeded: true,
                })
            }
            Err(e) => Err(e),
        }
    }

    pub async fn persist_state_step(
        &self,
        context: &TurnContext,
        messages: Vec<ConversationMessage>,
        action_type: ActionType,
    ) -> Result<PersistOutcome> {
        let memory = next_memory(&context.memory, messages, action_type);
        let turn_count = self
            .store
            .persist_turn(context.agent_instance_id, memory)
            .await?;

        let key = progress_cache_key(context.run_id);
        if let Err(e) = self.cache.delete(&key).await {
            warn!(key = %key, error = %e, "Failed to invalidate progress cache");
        }

        Ok(PersistOutcome { turn_count })
    }
}
