//! Simulation run types.

use crate::{CommunityId, ConfigId, Error, ProfileId, Result, RunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a simulation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Paused,
    Cancelled,
    Completed,
    Failed,
}

impl RunStatus {
    /// Statuses an orchestrator generation may still move the run out of.
    pub const ACTIVE: [RunStatus; 3] = [RunStatus::Pending, RunStatus::Running, RunStatus::Paused];

    /// Returns true once the run can no longer make progress.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Cancelled | RunStatus::Completed | RunStatus::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Paused => "paused",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate counters persisted on the run after every iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub turns_dispatched: u64,
    pub turns_completed: u64,
    pub agents_spawned: u64,
    pub agents_removed: u64,
    pub iterations: u64,
}

/// One orchestration execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationRun {
    pub id: RunId,
    /// Stored orchestrator configuration this run reads at start and on resume.
    pub config_id: ConfigId,
    pub community_id: CommunityId,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub metrics: RunMetrics,
    /// Failure detail surfaced to the API layer.
    pub error_message: Option<String>,
}

impl SimulationRun {
    /// Creates a pending run.
    pub fn new(config_id: ConfigId, community_id: CommunityId) -> Self {
        Self {
            id: RunId::new(),
            config_id,
            community_id,
            status: RunStatus::Pending,
            started_at: None,
            paused_at: None,
            completed_at: None,
            metrics: RunMetrics::default(),
            error_message: None,
        }
    }
}

/// Tuning for one orchestrator generation.
///
/// Immutable while the run is running; reloaded from storage only when the
/// run resumes from `paused`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub id: ConfigId,
    /// Seconds the control loop sleeps between iterations.
    pub turn_cadence_seconds: u64,
    pub max_agents: u32,
    /// Probability (0.0..=1.0) of retiring the oldest agent per iteration.
    pub removal_rate: f64,
    pub max_turns_per_agent: u32,
    pub agent_profile_ids: Vec<ProfileId>,
    pub community_id: CommunityId,
}

impl OrchestratorConfig {
    /// Checks the invariants the population manager relies on.
    pub fn validate(&self) -> Result<()> {
        if self.max_agents == 0 {
            return Err(Error::InvalidConfig("max_agents must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.removal_rate) {
            return Err(Error::InvalidConfig(format!(
                "removal_rate must be within [0, 1], got {}",
                self.removal_rate
            )));
        }
        if self.agent_profile_ids.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one agent profile is required".into(),
            ));
        }
        Ok(())
    }
}

/// Population counts for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopulationSnapshot {
    pub active: u32,
    /// Instances ever created for the run.
    pub spawned: u32,
    /// Instances soft-deleted by removal or retry exhaustion.
    pub removed: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> OrchestratorConfig {
        OrchestratorConfig {
            id: ConfigId::new(),
            turn_cadence_seconds: 0,
            max_agents: 3,
            removal_rate: 0.1,
            max_turns_per_agent: 10,
            agent_profile_ids: vec![ProfileId::new()],
            community_id: CommunityId::new(),
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(!RunStatus::Paused.is_terminal());
        assert!(RunStatus::ACTIVE.iter().all(|status| !status.is_terminal()));
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&RunStatus::Paused).unwrap(),
            "\"paused\""
        );
    }

    #[test]
    fn test_validate_accepts_default_shape() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_removal_rate() {
        let mut cfg = config();
        cfg.removal_rate = 1.5;
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_empty_profiles() {
        let mut cfg = config();
        cfg.agent_profile_ids.clear();
        assert!(cfg.validate().is_err());
    }
}
