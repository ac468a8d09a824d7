//! Engine configuration.
//!
//! `EngineConfig` carries the process-wide tuning the control loop and turn
//! workflow read: thresholds, intervals, fetch caps, default usage limits,
//! and queue names. Per-run tuning lives in
//! [`notesim_proto::OrchestratorConfig`] and is loaded from storage instead.
//!
//! Configuration is YAML; every field is optional and falls back to its
//! default.

use notesim_proto::UsageLimits;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub orchestrator: LoopConfig,
    pub population: PopulationConfig,
    pub turn: TurnConfig,
    pub dispatch: DispatchConfig,
}

/// Control loop tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Consecutive iterations without content before the run auto-pauses.
    pub empty_iterations_before_pause: u32,
    /// Scoring is triggered every this many iterations.
    pub scoring_interval: u64,
    /// Hard cap guarding against a loop that never reaches a terminal status.
    pub max_iterations: u64,
    /// Consecutive scheduling failures before dispatch is suspended.
    pub circuit_breaker_threshold: u32,
    /// Seconds an open breaker stays open before it is reset.
    pub circuit_reset_timeout_secs: u64,
    /// Consecutive iterations failing with transient errors before the run fails.
    pub max_consecutive_iteration_failures: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            empty_iterations_before_pause: 3,
            scoring_interval: 10,
            max_iterations: 10_000,
            circuit_breaker_threshold: 5,
            circuit_reset_timeout_secs: 60,
            max_consecutive_iteration_failures: 5,
        }
    }
}

impl LoopConfig {
    pub fn circuit_reset_timeout(&self) -> Duration {
        Duration::from_secs(self.circuit_reset_timeout_secs)
    }
}

/// Population manager tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationConfig {
    /// Most instances spawned in one iteration.
    pub spawn_batch_size: u32,
    /// Seed for removal trials; entropy-seeded when absent.
    pub rng_seed: Option<u64>,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            spawn_batch_size: 10,
            rng_seed: None,
        }
    }
}

/// Agent turn workflow tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    /// Memory is compacted on turns that are a non-zero multiple of this.
    pub compaction_interval: u32,
    pub open_requests_limit: usize,
    /// Linked notes fetched per open request.
    pub notes_per_request: usize,
    pub notes_needing_ratings_limit: usize,
    pub default_request_limit: u32,
    pub default_total_tokens_limit: u64,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            compaction_interval: 10,
            open_requests_limit: 20,
            notes_per_request: 5,
            notes_needing_ratings_limit: 10,
            default_request_limit: 10,
            default_total_tokens_limit: 50_000,
        }
    }
}

impl TurnConfig {
    pub fn default_usage_limits(&self) -> UsageLimits {
        UsageLimits {
            request_limit: self.default_request_limit,
            total_tokens_limit: self.default_total_tokens_limit,
        }
    }
}

/// Dispatch layer tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub turn_queue: String,
    pub orchestrator_queue: String,
    /// Retry count at which an instance is removed instead of dispatched.
    pub retry_exhaustion_threshold: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            turn_queue: "simulation_turn".to_string(),
            orchestrator_queue: "simulation_orchestrator".to_string(),
            retry_exhaustion_threshold: 3,
        }
    }
}

impl EngineConfig {
    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse_yaml(&content)
    }

    /// Parses configuration from a YAML string.
    pub fn parse_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.turn.compaction_interval == 0 {
            return Err(ConfigError::Invalid(
                "turn.compaction_interval must be at least 1".into(),
            ));
        }
        if self.orchestrator.scoring_interval == 0 {
            return Err(ConfigError::Invalid(
                "orchestrator.scoring_interval must be at least 1".into(),
            ));
        }
        if self.orchestrator.circuit_breaker_threshold == 0 {
            return Err(ConfigError::Invalid(
                "orchestrator.circuit_breaker_threshold must be at least 1".into(),
            ));
        }
        if self.orchestrator.max_consecutive_iteration_failures == 0 {
            return Err(ConfigError::Invalid(
                "orchestrator.max_consecutive_iteration_failures must be at least 1".into(),
            ));
        }
        if self.population.spawn_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "population.spawn_batch_size must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn with_empty_iterations_before_pause(mut self, threshold: u32) -> Self {
        self.orchestrator.empty_iterations_before_pause = threshold;
        self
    }

    pub fn with_scoring_interval(mut self, interval: u64) -> Self {
        self.orchestrator.scoring_interval = interval;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u64) -> Self {
        self.orchestrator.max_iterations = max_iterations;
        self
    }

    pub fn with_circuit_breaker(mut self, threshold: u32, reset_timeout_secs: u64) -> Self {
        self.orchestrator.circuit_breaker_threshold = threshold;
        self.orchestrator.circuit_reset_timeout_secs = reset_timeout_secs;
        self
    }

    pub fn with_max_consecutive_iteration_failures(mut self, failures: u32) -> Self {
        self.orchestrator.max_consecutive_iteration_failures = failures;
        self
    }

    pub fn with_spawn_batch_size(mut self, size: u32) -> Self {
        self.population.spawn_batch_size = size;
        self
    }

    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.population.rng_seed = Some(seed);
        self
    }

    pub fn with_compaction_interval(mut self, interval: u32) -> Self {
        self.turn.compaction_interval = interval;
        self
    }

    pub fn with_retry_exhaustion_threshold(mut self, threshold: u32) -> Self {
        self.dispatch.retry_exhaustion_threshold = threshold;
        self
    }
}
