//! The per-run control loop.
//!
//! One orchestrator generation owns a run from initialization to
//! finalization. Each iteration reads the run status, gates on content
//! availability, manages the agent population, recovers stuck agents, and
//! dispatches the next turns. Cancellation is observed at the top of the next
//! iteration; turns already in flight finish on their own.
//!
//! Transient storage or substrate errors fail only the iteration they hit;
//! the run fails once they persist for several iterations in a row.
//! Finalization is conditional, so a status another writer stored first
//! always wins.

use crate::circuit_breaker::CircuitBreaker;
use crate::config::{EngineConfig, LoopConfig};
use crate::dispatch::{Dispatcher, ScheduleOutcome};
use crate::population::PopulationManager;
use crate::recovery::StuckAgentRecovery;
use notesim_proto::{
    AgentInstanceId, ConfigId, Error, OrchestratorConfig, Result, RunId, RunMetrics, RunStatus,
    ScoringTrigger, SimulationStore, WorkflowQueue,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Why the loop stopped iterating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    /// The run was cancelled externally.
    Cancelled,
    /// Another writer already moved the run to completed or failed.
    External(RunStatus),
    /// Every agent of a full population played its last turn.
    NaturalCompletion,
    /// The hard iteration cap was hit.
    MaxIterations,
    /// An iteration failed fatally, or transient failures exhausted their budget.
    Error(String),
}

impl LoopExit {
    pub fn final_status(&self) -> RunStatus {
        match self {
            LoopExit::Cancelled => RunStatus::Cancelled,
            LoopExit::External(status) => *status,
            LoopExit::NaturalCompletion | LoopExit::MaxIterations => RunStatus::Completed,
            LoopExit::Error(_) => RunStatus::Failed,
        }
    }

    pub fn error_message(&self) -> Option<String> {
        match self {
            LoopExit::Error(message) => Some(message.clone()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorReport {
    pub run_id: RunId,
    pub final_status: RunStatus,
    pub exit: LoopExit,
    /// Iterations executed by this generation.
    pub iterations: u64,
    pub metrics: RunMetrics,
}

/// Mutable state carried across iterations of one generation.
struct LoopState {
    config_id: ConfigId,
    config: OrchestratorConfig,
    metrics: RunMetrics,
    last_status: RunStatus,
    consecutive_empty: u32,
    breaker: CircuitBreaker,
    breaker_opened_at: Option<Instant>,
}

enum Iteration {
    Continue,
    Exit(LoopExit),
}

pub struct Orchestrator {
    store: Arc<dyn SimulationStore>,
    scoring: Arc<dyn ScoringTrigger>,
    population: PopulationManager,
    dispatcher: Dispatcher,
    recovery: StuckAgentRecovery,
    config: LoopConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn SimulationStore>,
        queue: Arc<dyn WorkflowQueue>,
        scoring: Arc<dyn ScoringTrigger>,
        config: &EngineConfig,
    ) -> Self {
        let threshold = config.dispatch.retry_exhaustion_threshold;
        Self {
            population: PopulationManager::new(Arc::clone(&store), &config.population),
            dispatcher: Dispatcher::new(
                Arc::clone(&queue),
                Arc::clone(&store),
                config.dispatch.clone(),
            ),
            recovery: StuckAgentRecovery::new(Arc::clone(&store), queue, threshold),
            store,
            scoring,
            config: config.orchestrator.clone(),
        }
    }

    /// Drives `run_id` until it is cancelled, completes, fails, or hits the
    /// iteration cap, then finalizes it.
    pub async fn run_orchestrator(&self, run_id: RunId) -> Result<OrchestratorReport> {
        let mut state = self.initialize_run_step(run_id).await?;
        let mut iterations: u64 = 0;
        let mut consecutive_failures: u32 = 0;

        let exit = loop {
            if iterations >= self.config.max_iterations {
                error!(
                    run_id = %run_id,
                    max_iterations = self.config.max_iterations,
                    "Orchestrator hit its iteration cap"
                );
                break LoopExit::MaxIterations;
            }
            iterations += 1;

            match self.run_iteration(run_id, iterations, &mut state).await {
                Ok(Iteration::Continue) => consecutive_failures = 0,
                Ok(Iteration::Exit(exit)) => break exit,
                Err(e) if e.is_transient() => {
                    consecutive_failures += 1;
                    if consecutive_failures >= self.config.max_consecutive_iteration_failures {
                        error!(
                            run_id = %run_id,
                            iteration = iterations,
                            failures = consecutive_failures,
                            error = %e,
                            "Orchestrator iterations keep failing; giving up"
                        );
                        break LoopExit::Error(e.to_string());
                    }
                    warn!(
                        run_id = %run_id,
                        iteration = iterations,
                        failures = consecutive_failures,
                        error = %e,
                        "Orchestrator iteration failed; retrying next iteration"
                    );
                }
                Err(e) => {
                    error!(run_id = %run_id, iteration = iterations, error = %e, "Orchestrator iteration failed");
                    break LoopExit::Error(e.to_string());
                }
            }

            tokio::time::sleep(Duration::from_secs(state.config.turn_cadence_seconds)).await;
        };

        let final_status = match &exit {
            &LoopExit::External(status) => {
                // The external writer owns the row, including its error message.
                let completed = self.store.complete_active_agents(run_id).await?;
                info!(run_id = %run_id, status = %status, agents_completed = completed, "Run was finalized externally");
                status
            }
            _ => match self
                .finalize_run_step(run_id, exit.final_status(), exit.error_message())
                .await
            {
                Ok(status) => status,
                Err(e) => {
                    error!(run_id = %run_id, status = %exit.final_status(), error = %e, "Finalization failed; forcing failed status");
                    self.finalize_run_step(
                        run_id,
                        RunStatus::Failed,
                        Some(format!("finalization failed: {e}")),
                    )
                    .await?
                }
            },
        };

        info!(
            run_id = %run_id,
            status = %final_status,
            exit = ?exit,
            iterations,
            turns_dispatched = state.metrics.turns_dispatched,
            "Orchestrator finished"
        );

        Ok(OrchestratorReport {
            run_id,
            final_status,
            exit,
            iterations,
            metrics: state.metrics,
        })
    }

    async fn initialize_run_step(&self, run_id: RunId) -> Result<LoopState> {
        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| Error::not_found("simulation run", run_id))?;

        if run.status.is_terminal() {
            return Err(Error::InvalidRunState {
                run_id: run_id.to_string(),
                status: run.status,
            });
        }

        let status = match self
            .store
            .transition_run_status(run_id, &[RunStatus::Pending], RunStatus::Running)
            .await?
        {
            Some(_) => RunStatus::Running,
            None => run.status,
        };

        let config = self.load_config(run.config_id).await?;
        info!(
            run_id = %run_id,
            status = %status,
            max_agents = config.max_agents,
            cadence_secs = config.turn_cadence_seconds,
            "Orchestrator initialized"
        );

        Ok(LoopState {
            config_id: run.config_id,
            config,
            metrics: run.metrics,
            last_status: status,
            consecutive_empty: 0,
            breaker: CircuitBreaker::new(
                self.config.circuit_breaker_threshold,
                self.config.circuit_reset_timeout(),
            ),
            breaker_opened_at: None,
        })
    }

    async fn load_config(&self, config_id: ConfigId) -> Result<OrchestratorConfig> {
        let config = self
            .store
            .load_orchestrator_config(config_id)
            .await?
            .ok_or_else(|| Error::not_found("orchestrator config", config_id))?;
        config.validate()?;
        Ok(config)
    }

    /// Reloads the config after a resume. On failure the current config stays.
    async fn refresh_config_step(&self, run_id: RunId, state: &mut LoopState) {
        match self.load_config(state.config_id).await {
            Ok(config) => {
                info!(run_id = %run_id, max_agents = config.max_agents, "Refreshed orchestrator config");
                state.config = config;
            }
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Config refresh failed; keeping previous config");
            }
        }
    }

    /// Returns whether the community has anything for agents to act on.
    ///
    /// A failed check counts as available.
    async fn check_content_availability_step(&self, run_id: RunId, state: &LoopState) -> bool {
        match self.store.content_availability(state.config.community_id).await {
            Ok(availability) => {
                debug!(
                    run_id = %run_id,
                    pending_requests = availability.pending_requests,
                    unrated_notes = availability.unrated_notes,
                    "Checked content availability"
                );
                availability.has_content()
            }
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Content availability check failed; continuing");
                true
            }
        }
    }

    async fn run_iteration(
        &self,
        run_id: RunId,
        iteration: u64,
        state: &mut LoopState,
    ) -> Result<Iteration> {
        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| Error::not_found("simulation run", run_id))?;

        match run.status {
            RunStatus::Cancelled => return Ok(Iteration::Exit(LoopExit::Cancelled)),
            RunStatus::Completed | RunStatus::Failed => {
                return Ok(Iteration::Exit(LoopExit::External(run.status)));
            }
            RunStatus::Paused => {
                if state.last_status != RunStatus::Paused {
                    info!(run_id = %run_id, "Run paused");
                }
                state.last_status = RunStatus::Paused;
                state.metrics.iterations += 1;
                self.store.update_run_metrics(run_id, state.metrics).await?;
                return Ok(Iteration::Continue);
            }
            RunStatus::Pending | RunStatus::Running => {}
        }

        if state.last_status == RunStatus::Paused {
            info!(run_id = %run_id, "Run resumed");
            self.refresh_config_step(run_id, state).await;
        }
        state.last_status = RunStatus::Running;
        state.metrics.iterations += 1;

        if self.check_content_availability_step(run_id, state).await {
            state.consecutive_empty = 0;
        } else {
            state.consecutive_empty += 1;
            debug!(
                run_id = %run_id,
                consecutive_empty = state.consecutive_empty,
                threshold = self.config.empty_iterations_before_pause,
                "No content available"
            );
            if state.consecutive_empty >= self.config.empty_iterations_before_pause {
                state.consecutive_empty = 0;
                if self
                    .store
                    .transition_run_status(run_id, &[RunStatus::Running], RunStatus::Paused)
                    .await?
                    .is_some()
                {
                    info!(run_id = %run_id, "Auto-paused run with no content to act on");
                    state.last_status = RunStatus::Paused;
                }
                self.store.update_run_metrics(run_id, state.metrics).await?;
                return Ok(Iteration::Continue);
            }
        }

        let snapshot = self.population.snapshot(run_id).await?;
        let spawned = self.population.spawn_agents(run_id, &state.config).await?;
        let active_after_spawn = snapshot.active + u32::try_from(spawned.len()).unwrap_or(u32::MAX);
        let removed = self
            .population
            .remove_agents(run_id, &state.config, active_after_spawn)
            .await?;

        let in_flight = match self.recovery.recover(run_id).await {
            Ok(outcome) => {
                if outcome.retried > 0 {
                    info!(run_id = %run_id, retried = outcome.retried, "Recovered stuck agents");
                }
                outcome.in_flight
            }
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Stuck-agent recovery failed");
                Vec::new()
            }
        };

        let scheduled = self.schedule_with_breaker(run_id, state, &in_flight).await;

        state.metrics.agents_spawned += spawned.len() as u64;
        state.metrics.agents_removed += u64::from(removed.is_some());
        if let Some(outcome) = scheduled {
            state.metrics.turns_dispatched += u64::from(outcome.dispatched);
            state.metrics.agents_removed += u64::from(outcome.removed_for_retries);
        }
        state.metrics.turns_completed = self.store.total_turns_completed(run_id).await?;
        self.store.update_run_metrics(run_id, state.metrics).await?;

        if self.config.scoring_interval > 0 && iteration % self.config.scoring_interval == 0 {
            self.trigger_scoring_step(run_id, state).await;
        }

        if let Some(outcome) = scheduled
            && Self::population_exhausted(&outcome, &state.config)
        {
            info!(
                run_id = %run_id,
                agents = outcome.skipped,
                max_turns = state.config.max_turns_per_agent,
                "Every agent played its last turn"
            );
            return Ok(Iteration::Exit(LoopExit::NaturalCompletion));
        }

        Ok(Iteration::Continue)
    }

    /// A full population with nothing left to dispatch.
    fn population_exhausted(outcome: &ScheduleOutcome, config: &OrchestratorConfig) -> bool {
        outcome.dispatched == 0
            && outcome.removed_for_retries == 0
            && outcome.skipped >= config.max_agents
    }

    async fn schedule_with_breaker(
        &self,
        run_id: RunId,
        state: &mut LoopState,
        in_flight: &[AgentInstanceId],
    ) -> Option<ScheduleOutcome> {
        if let Some(opened_at) = state.breaker_opened_at
            && opened_at.elapsed() >= state.breaker.reset_timeout()
        {
            info!(run_id = %run_id, "Circuit breaker reset timeout elapsed; retrying scheduling");
            state.breaker.reset();
            state.breaker_opened_at = None;
        }

        if let Err(e) = state.breaker.check() {
            warn!(run_id = %run_id, error = %e, "Skipping turn scheduling");
            return None;
        }

        match self
            .dispatcher
            .schedule_turns_step(run_id, &state.config, in_flight)
            .await
        {
            Ok(outcome) => {
                state.breaker.reset();
                state.breaker_opened_at = None;
                Some(outcome)
            }
            Err(e) => {
                state.breaker.record_failure();
                if state.breaker.is_open() && state.breaker_opened_at.is_none() {
                    state.breaker_opened_at = Some(Instant::now());
                    error!(
                        run_id = %run_id,
                        failures = state.breaker.failure_count(),
                        error = %e,
                        "Turn scheduling failing repeatedly; circuit breaker opened"
                    );
                } else {
                    warn!(
                        run_id = %run_id,
                        failures = state.breaker.failure_count(),
                        error = %e,
                        "Turn scheduling failed"
                    );
                }
                None
            }
        }
    }

    async fn trigger_scoring_step(&self, run_id: RunId, state: &LoopState) {
        match self.scoring.trigger_scoring(state.config.community_id).await {
            Ok(outcome) => info!(
                run_id = %run_id,
                scores_computed = outcome.scores_computed,
                tier = %outcome.tier,
                scorer = %outcome.scorer,
                "Scoring triggered"
            ),
            Err(e) => warn!(run_id = %run_id, error = %e, "Scoring trigger failed"),
        }
    }

    /// Completes the remaining agents and writes `status` unless another
    /// writer already moved the run to a terminal status. Returns the status
    /// the row ends up holding.
    async fn finalize_run_step(
        &self,
        run_id: RunId,
        status: RunStatus,
        error_message: Option<String>,
    ) -> Result<RunStatus> {
        let completed = self.store.complete_active_agents(run_id).await?;

        // A cancelled exit stamps the row the canceller already moved.
        let mut from = RunStatus::ACTIVE.to_vec();
        if status == RunStatus::Cancelled {
            from.push(RunStatus::Cancelled);
        }

        if self
            .store
            .finalize_run(run_id, &from, status, error_message)
            .await?
            .is_some()
        {
            info!(run_id = %run_id, status = %status, agents_completed = completed, "Run finalized");
            return Ok(status);
        }

        let stored = self
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| Error::not_found("simulation run", run_id))?
            .status;
        warn!(
            run_id = %run_id,
            requested = %status,
            stored = %stored,
            agents_completed = completed,
            "Run already finalized by another writer; keeping its status"
        );
        Ok(stored)
    }
}
