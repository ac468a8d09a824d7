//! Collaborators the turn workflow and control loop call out to.

use crate::{
    ActionSelection, ActionType, AgentAction, AgentInstanceId, AgentProfile, CommunityId,
    ConversationMessage, RecentActions, Result, RunId, TurnDependencies,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Per-turn budget for agent engine calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageLimits {
    /// Maximum model requests across one phase.
    pub request_limit: u32,
    /// Maximum total tokens across one phase.
    pub total_tokens_limit: u64,
}

/// Identity and persona of the agent taking a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionContext {
    pub agent_instance_id: AgentInstanceId,
    pub run_id: RunId,
    pub community_id: CommunityId,
    pub profile: AgentProfile,
    /// Turn being played, 1-based.
    pub turn_number: u32,
}

/// Phase-1 output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionResult {
    pub selection: ActionSelection,
    /// Conversation trace including the phase-1 exchange.
    pub messages: Vec<ConversationMessage>,
}

/// Phase-2 output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnResult {
    pub action: AgentAction,
    pub reasoning: String,
    pub messages: Vec<ConversationMessage>,
}

/// LLM-driven action protocol.
///
/// Both calls return [`crate::Error::UsageLimitExceeded`] when the budget in
/// `limits` runs out.
#[async_trait]
pub trait AgentEngine: Send + Sync {
    async fn select_action(
        &self,
        context: &ActionContext,
        deps: &TurnDependencies,
        history: &[ConversationMessage],
        recent_actions: &RecentActions,
        limits: UsageLimits,
    ) -> Result<SelectionResult>;

    async fn run_turn(
        &self,
        context: &ActionContext,
        deps: &TurnDependencies,
        history: &[ConversationMessage],
        limits: UsageLimits,
        chosen_action_type: ActionType,
    ) -> Result<TurnResult>;
}

/// Summarizes long conversation histories.
#[async_trait]
pub trait MemoryCompactor: Send + Sync {
    async fn compact(&self, history: &[ConversationMessage]) -> Result<Vec<ConversationMessage>>;
}

/// Result of one scoring pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringOutcome {
    pub scores_computed: u32,
    /// Opaque scorer tier label.
    pub tier: String,
    pub scorer: String,
}

/// Black-box note scoring.
#[async_trait]
pub trait ScoringTrigger: Send + Sync {
    async fn trigger_scoring(&self, community_id: CommunityId) -> Result<ScoringOutcome>;
}

/// Shared cache holding derived progress views.
#[async_trait]
pub trait ProgressCache: Send + Sync {
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Cache key of a run's progress view.
pub fn progress_cache_key(run_id: RunId) -> String {
    format!("progress:{run_id}")
}
