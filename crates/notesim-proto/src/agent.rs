//! Agent instance, profile, and memory types.

use crate::{ActionType, AgentInstanceId, ParticipantId, ProfileId, RunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Number of recent action types an agent remembers.
pub const RECENT_ACTIONS_CAPACITY: usize = 5;

/// A personality/model pairing agents are spawned from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: ProfileId,
    pub name: String,
    pub personality: String,
    pub model_name: String,
    /// Overrides the engine-wide request budget per turn.
    #[serde(default)]
    pub request_limit: Option<u32>,
    /// Overrides the engine-wide token budget per turn.
    #[serde(default)]
    pub total_tokens_limit: Option<u64>,
}

impl AgentProfile {
    pub fn new(name: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            id: ProfileId::new(),
            name: name.into(),
            personality: String::new(),
            model_name: model_name.into(),
            request_limit: None,
            total_tokens_limit: None,
        }
    }

    #[must_use]
    pub fn with_personality(mut self, personality: impl Into<String>) -> Self {
        self.personality = personality.into();
        self
    }

    #[must_use]
    pub fn with_usage_limits(mut self, request_limit: u32, total_tokens_limit: u64) -> Self {
        self.request_limit = Some(request_limit);
        self.total_tokens_limit = Some(total_tokens_limit);
        self
    }
}

/// One simulated participant in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInstance {
    pub id: AgentInstanceId,
    pub profile_id: ProfileId,
    pub run_id: RunId,
    pub participant_id: ParticipantId,
    pub turn_count: u32,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub removed_at: Option<DateTime<Utc>>,
    /// Set when the run finalizes while the instance is still active.
    pub completed_at: Option<DateTime<Utc>>,
}

impl AgentInstance {
    pub fn new(run_id: RunId, profile_id: ProfileId, participant_id: ParticipantId) -> Self {
        Self {
            id: AgentInstanceId::new(),
            profile_id,
            run_id,
            participant_id,
            turn_count: 0,
            retry_count: 0,
            created_at: Utc::now(),
            removed_at: None,
            completed_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.removed_at.is_none() && self.completed_at.is_none()
    }
}

/// Speaker of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A provider-agnostic conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: MessageRole,
    pub content: String,
    /// Tool name for tool calls and tool results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl ConversationMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_name: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    #[must_use]
    pub fn with_tool(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }
}

/// Bounded, insertion-ordered record of the last action types an agent chose.
///
/// Holds at most [`RECENT_ACTIONS_CAPACITY`] entries; pushing onto a full
/// buffer evicts the oldest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<ActionType>", into = "Vec<ActionType>")]
pub struct RecentActions(VecDeque<ActionType>);

impl RecentActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: ActionType) {
        self.0.push_back(action);
        while self.0.len() > RECENT_ACTIONS_CAPACITY {
            self.0.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActionType> {
        self.0.iter()
    }

    pub fn to_vec(&self) -> Vec<ActionType> {
        self.0.iter().copied().collect()
    }
}

impl From<Vec<ActionType>> for RecentActions {
    fn from(actions: Vec<ActionType>) -> Self {
        let mut recent = Self::new();
        for action in actions {
            recent.push(action);
        }
        recent
    }
}

impl From<RecentActions> for Vec<ActionType> {
    fn from(recent: RecentActions) -> Self {
        recent.0.into_iter().collect()
    }
}

/// Conversation state carried between an agent's turns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMemory {
    pub message_history: Vec<ConversationMessage>,
    /// Turns persisted into this memory; drives the compaction cadence.
    pub turn_count: u32,
    pub recent_actions: RecentActions,
}
