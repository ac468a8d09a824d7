//! Agent action types.

use crate::{NoteId, RequestId};
use serde::{Deserialize, Serialize};

/// The kind of action an agent chooses in phase 1 of its turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    WriteNote,
    RateNote,
    PassTurn,
}

impl ActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::WriteNote => "write_note",
            ActionType::RateNote => "rate_note",
            ActionType::PassTurn => "pass_turn",
        }
    }

    /// Returns true when the action needs a second, executing call.
    pub fn requires_execution(self) -> bool {
        !matches!(self, ActionType::PassTurn)
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a written note classifies the content it annotates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteClassification {
    NotMisleading,
    MisinformedOrPotentiallyMisleading,
}

/// A rater's verdict on a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HelpfulnessLevel {
    Helpful,
    SomewhatHelpful,
    NotHelpful,
}

/// The action an agent performed during a turn, with its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action_type", rename_all = "snake_case")]
pub enum AgentAction {
    WriteNote {
        request_id: RequestId,
        summary: String,
        classification: NoteClassification,
    },
    RateNote {
        note_id: NoteId,
        helpfulness_level: HelpfulnessLevel,
    },
    PassTurn {
        reason: String,
    },
}

impl AgentAction {
    pub fn pass(reason: impl Into<String>) -> Self {
        AgentAction::PassTurn {
            reason: reason.into(),
        }
    }

    pub fn action_type(&self) -> ActionType {
        match self {
            AgentAction::WriteNote { .. } => ActionType::WriteNote,
            AgentAction::RateNote { .. } => ActionType::RateNote,
            AgentAction::PassTurn { .. } => ActionType::PassTurn,
        }
    }
}

/// Phase-1 decision: which action to take and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSelection {
    pub action_type: ActionType,
    pub reasoning: String,
}
