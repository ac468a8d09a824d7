//! Population lifecycle: spawning up to the cap and retiring the oldest agent.

use crate::config::PopulationConfig;
use notesim_proto::{
    AgentInstance, AgentInstanceId, OrchestratorConfig, PopulationSnapshot, Result, RunId,
    SimulationStore,
};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tracing::{debug, info};

pub struct PopulationManager {
    store: Arc<dyn SimulationStore>,
    spawn_batch_size: u32,
    rng: Mutex<StdRng>,
}

impl PopulationManager {
    pub fn new(store: Arc<dyn SimulationStore>, config: &PopulationConfig) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            store,
            spawn_batch_size: config.spawn_batch_size.max(1),
            rng: Mutex::new(rng),
        }
    }

    pub async fn snapshot(&self, run_id: RunId) -> Result<PopulationSnapshot> {
        self.store.population_snapshot(run_id).await
    }

    /// Spawns instances until the run reaches `max_agents`, at most one batch per call.
    ///
    /// The live count is read again here, so a repeated invocation after a
    /// crash never overshoots the cap. Profiles are assigned round-robin,
    /// continuing from the number of instances spawned so far.
    pub async fn spawn_agents(
        &self,
        run_id: RunId,
        config: &OrchestratorConfig,
    ) -> Result<Vec<AgentInstanceId>> {
        let live = self.store.population_snapshot(run_id).await?;
        if live.active >= config.max_agents || config.agent_profile_ids.is_empty() {
            return Ok(Vec::new());
        }

        let to_spawn = (config.max_agents - live.active).min(self.spawn_batch_size);
        let mut spawned = Vec::with_capacity(to_spawn as usize);
        for offset in 0..to_spawn {
            let slot = (live.spawned + offset) as usize % config.agent_profile_ids.len();
            let profile_id = config.agent_profile_ids[slot];
            let participant_id = self.store.create_participant(run_id, profile_id).await?;
            let instance = AgentInstance::new(run_id, profile_id, participant_id);
            let id = instance.id;
            self.store.insert_agent(instance).await?;
            spawned.push(id);
        }

        info!(
            run_id = %run_id,
            spawned = spawned.len(),
            active = live.active + to_spawn,
            max_agents = config.max_agents,
            "Spawned agents"
        );
        Ok(spawned)
    }

    /// Retires the oldest active instance with probability `removal_rate`.
    ///
    /// Never runs when the rate is zero or the population is at its floor of
    /// one. Returns `None` when the trial fails or another process removed
    /// the instance first.
    pub async fn remove_agents(
        &self,
        run_id: RunId,
        config: &OrchestratorConfig,
        active_count: u32,
    ) -> Result<Option<AgentInstanceId>> {
        if config.removal_rate <= 0.0 || active_count <= 1 {
            return Ok(None);
        }

        let hit = self.rng.lock().gen_bool(config.removal_rate.clamp(0.0, 1.0));
        if !hit {
            return Ok(None);
        }

        let removed = self.store.remove_oldest_active_agent(run_id).await?;
        match removed {
            Some(id) => info!(run_id = %run_id, agent_instance_id = %id, "Removed oldest agent"),
            None => debug!(run_id = %run_id, "Oldest agent already removed elsewhere"),
        }
        Ok(removed)
    }
}
