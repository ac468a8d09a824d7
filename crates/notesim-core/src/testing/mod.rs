//! In-memory collaborators for tests and local experiments.
//!
//! Everything here implements the `notesim-proto` traits with plain
//! mutex-guarded tables, plus knobs to inject failures and counters to
//! observe calls.

mod agents;
mod queue;
mod store;

pub use agents::{RecordingCache, RecordingScoring, ScriptedAgentEngine, StaticCompactor};
pub use queue::{InMemoryJournal, InMemoryQueue, QueuedWorkflow};
pub use store::{InMemoryStore, RATING_TARGET};

use crate::worker::Collaborators;
use notesim_proto::{AgentProfile, CommunityId, ConfigId, OrchestratorConfig};
use std::sync::Arc;

/// One of each in-memory collaborator, with typed handles kept for assertions.
pub struct TestHarness {
    pub store: Arc<InMemoryStore>,
    pub queue: Arc<InMemoryQueue>,
    pub journal: Arc<InMemoryJournal>,
    pub engine: Arc<ScriptedAgentEngine>,
    pub compactor: Arc<StaticCompactor>,
    pub scoring: Arc<RecordingScoring>,
    pub cache: Arc<RecordingCache>,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    pub fn new() -> Self {
        Self {
            store: Arc::new(InMemoryStore::new()),
            queue: Arc::new(InMemoryQueue::new()),
            journal: Arc::new(InMemoryJournal::new()),
            engine: Arc::new(ScriptedAgentEngine::new()),
            compactor: Arc::new(StaticCompactor::summarizing()),
            scoring: Arc::new(RecordingScoring::new()),
            cache: Arc::new(RecordingCache::new()),
        }
    }

    pub fn with_engine(mut self, engine: ScriptedAgentEngine) -> Self {
        self.engine = Arc::new(engine);
        self
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            store: self.store.clone(),
            queue: self.queue.clone(),
            journal: self.journal.clone(),
            engine: self.engine.clone(),
            compactor: self.compactor.clone(),
            scoring: self.scoring.clone(),
            cache: self.cache.clone(),
        }
    }
}

/// Two profiles with default usage limits.
pub fn sample_profiles() -> Vec<AgentProfile> {
    vec![
        AgentProfile::new("skeptic", "test-model").with_personality("Questions every claim"),
        AgentProfile::new("librarian", "test-model").with_personality("Cites sources"),
    ]
}

/// Config with a zero cadence so loops run back to back.
pub fn sample_config(profiles: &[AgentProfile]) -> OrchestratorConfig {
    OrchestratorConfig {
        id: ConfigId::new(),
        turn_cadence_seconds: 0,
        max_agents: 2,
        removal_rate: 0.0,
        max_turns_per_agent: 3,
        agent_profile_ids: profiles.iter().map(|p| p.id).collect(),
        community_id: CommunityId::new(),
    }
}
