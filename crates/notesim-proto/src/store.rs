//! Storage boundary.
//!
//! Every status or lifecycle change is a single conditional update that
//! reports whether it applied, so concurrent orchestrator generations and
//! recovery passes cannot double-apply a transition. Implementations must
//! make each call atomic (commit or roll back as a unit).

use crate::{
    AgentInstance, AgentInstanceId, AgentMemory, AgentProfile, CommunityId, ConfigId,
    ContentAvailability, Note, OrchestratorConfig, ParticipantId, PopulationSnapshot, ProfileId,
    Request, RequestId, Result, RunId, RunMetrics, RunStatus, SimulationRun,
};
use async_trait::async_trait;

#[async_trait]
pub trait SimulationStore: Send + Sync {
    async fn get_run(&self, run_id: RunId) -> Result<Option<SimulationRun>>;

    /// Moves the run to `to` only if its current status is one of `from`.
    ///
    /// Returns the run id when the update applied and `None` otherwise.
    /// Stamps `started_at` when entering `running` for the first time and
    /// `paused_at` when entering `paused`.
    async fn transition_run_status(
        &self,
        run_id: RunId,
        from: &[RunStatus],
        to: RunStatus,
    ) -> Result<Option<RunId>>;

    async fn update_run_metrics(&self, run_id: RunId, metrics: RunMetrics) -> Result<()>;

    /// Writes the terminal status and `completed_at`, but only if the current
    /// status is one of `from`. A `Some` error message replaces the stored one.
    ///
    /// Returns the run id when the update applied and `None` when another
    /// writer moved the run first.
    async fn finalize_run(
        &self,
        run_id: RunId,
        from: &[RunStatus],
        status: RunStatus,
        error_message: Option<String>,
    ) -> Result<Option<RunId>>;

    async fn load_orchestrator_config(
        &self,
        config_id: ConfigId,
    ) -> Result<Option<OrchestratorConfig>>;

    async fn get_profile(&self, profile_id: ProfileId) -> Result<Option<AgentProfile>>;

    async fn population_snapshot(&self, run_id: RunId) -> Result<PopulationSnapshot>;

    async fn count_active_agents(&self, run_id: RunId) -> Result<u32>;

    /// Active instances ordered oldest first.
    async fn list_active_agents(&self, run_id: RunId) -> Result<Vec<AgentInstance>>;

    async fn get_agent(&self, agent_instance_id: AgentInstanceId) -> Result<Option<AgentInstance>>;

    /// Creates the participant identity an agent instance acts as.
    async fn create_participant(&self, run_id: RunId, profile_id: ProfileId)
    -> Result<ParticipantId>;

    async fn insert_agent(&self, instance: AgentInstance) -> Result<()>;

    /// Soft-deletes the oldest active instance of the run.
    ///
    /// Returns `None` when another process removed it first.
    async fn remove_oldest_active_agent(&self, run_id: RunId) -> Result<Option<AgentInstanceId>>;

    /// Soft-deletes the given instances that are still active; returns how many changed.
    async fn remove_agents(&self, ids: &[AgentInstanceId]) -> Result<u32>;

    /// Increments the retry counter of an active instance; returns the new value.
    async fn increment_retry_count(&self, agent_instance_id: AgentInstanceId)
    -> Result<Option<u32>>;

    /// Marks every still-active instance of the run completed; returns how many changed.
    async fn complete_active_agents(&self, run_id: RunId) -> Result<u32>;

    /// Sum of persisted turns across every instance of the run.
    async fn total_turns_completed(&self, run_id: RunId) -> Result<u64>;

    async fn get_memory(&self, agent_instance_id: AgentInstanceId) -> Result<Option<AgentMemory>>;

    /// Upserts the memory, increments the instance's turn count, and resets its
    /// retry count as one unit. Returns the new instance turn count.
    async fn persist_turn(
        &self,
        agent_instance_id: AgentInstanceId,
        memory: AgentMemory,
    ) -> Result<u32>;

    async fn content_availability(&self, community_id: CommunityId) -> Result<ContentAvailability>;

    async fn open_requests(&self, community_id: CommunityId, limit: usize) -> Result<Vec<Request>>;

    async fn notes_for_request(&self, request_id: RequestId, limit: usize) -> Result<Vec<Note>>;

    async fn notes_needing_ratings(
        &self,
        community_id: CommunityId,
        limit: usize,
    ) -> Result<Vec<Note>>;
}
