//! Community content an agent reasons over.

use crate::{CommunityId, NoteId, RequestId};
use serde::{Deserialize, Serialize};

/// An open request for a fact-check note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub community_id: CommunityId,
    pub content: String,
}

/// A note written against a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub request_id: RequestId,
    pub summary: String,
    pub rating_count: u32,
}

/// A request together with the notes already written for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestWithNotes {
    pub request: Request,
    pub notes: Vec<Note>,
}

/// Read-only context built for one agent turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnDependencies {
    pub requests: Vec<RequestWithNotes>,
    pub notes_needing_ratings: Vec<Note>,
}

impl TurnDependencies {
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.notes_needing_ratings.is_empty()
    }
}

/// Work available to agents in a community.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentAvailability {
    pub pending_requests: u32,
    pub unrated_notes: u32,
}

impl ContentAvailability {
    pub fn has_content(&self) -> bool {
        self.pending_requests > 0 || self.unrated_notes > 0
    }
}
