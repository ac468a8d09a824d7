//! In-memory [`SimulationStore`].

use async_trait::async_trait;
use chrono::Utc;
use notesim_proto::{
    AgentInstance, AgentInstanceId, AgentMemory, AgentProfile, CommunityId, ConfigId,
    ContentAvailability, Error, Note, OrchestratorConfig, ParticipantId, PopulationSnapshot,
    ProfileId, Request, RequestId, Result, RunId, RunMetrics, RunStatus, SimulationRun,
    SimulationStore,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Notes with fewer ratings than this still need ratings.
pub const RATING_TARGET: u32 = 3;

#[derive(Default)]
struct Tables {
    runs: HashMap<RunId, SimulationRun>,
    configs: HashMap<ConfigId, OrchestratorConfig>,
    profiles: HashMap<ProfileId, AgentProfile>,
    // Insertion order doubles as creation order.
    agents: Vec<AgentInstance>,
    participants: HashMap<ParticipantId, (RunId, ProfileId)>,
    memories: HashMap<AgentInstanceId, AgentMemory>,
    requests: Vec<Request>,
    notes: Vec<Note>,
    status_script: HashMap<RunId, VecDeque<RunStatus>>,
}

#[derive(Default)]
struct Faults {
    content_check: bool,
    config_loads_before_failure: Option<u32>,
    finalize_failures: u32,
    list_agents_failures: u32,
    run_reads_before_failure: Option<u32>,
    metrics_update_failures: u32,
}

#[derive(Default)]
struct Counters {
    config_loads: u32,
    content_checks: u32,
    finalize_calls: Vec<(RunStatus, Option<String>)>,
    metrics_updates: u32,
}

/// Tables behind one mutex, so every trait call is atomic.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    faults: Mutex<Faults>,
    counters: Mutex<Counters>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a community with a config, its profiles, and a pending run.
    pub fn seed_run(
        &self,
        config: OrchestratorConfig,
        profiles: Vec<AgentProfile>,
    ) -> RunId {
        let run = SimulationRun::new(config.id, config.community_id);
        let run_id = run.id;
        let mut tables = self.tables.lock();
        for profile in profiles {
            tables.profiles.insert(profile.id, profile);
        }
        tables.configs.insert(config.id, config);
        tables.runs.insert(run_id, run);
        run_id
    }

    pub fn insert_profile(&self, profile: AgentProfile) {
        self.tables.lock().profiles.insert(profile.id, profile);
    }

    pub fn replace_config(&self, config: OrchestratorConfig) {
        self.tables.lock().configs.insert(config.id, config);
    }

    pub fn set_run_status(&self, run_id: RunId, status: RunStatus) {
        self.update_run(run_id, |run| run.status = status);
    }

    /// Edits the run row in place, as another writer would.
    pub fn update_run(&self, run_id: RunId, edit: impl FnOnce(&mut SimulationRun)) {
        if let Some(run) = self.tables.lock().runs.get_mut(&run_id) {
            edit(run);
        }
    }

    /// Each later `get_run` for `run_id` first applies the next scripted
    /// status, as if another writer had just changed it.
    pub fn script_statuses(&self, run_id: RunId, statuses: impl IntoIterator<Item = RunStatus>) {
        self.tables
            .lock()
            .status_script
            .entry(run_id)
            .or_default()
            .extend(statuses);
    }

    pub fn add_request(&self, community_id: CommunityId, content: impl Into<String>) -> RequestId {
        let request = Request {
            id: RequestId::new(),
            community_id,
            content: content.into(),
        };
        let id = request.id;
        self.tables.lock().requests.push(request);
        id
    }

    pub fn add_note(&self, request_id: RequestId, summary: impl Into<String>, rating_count: u32) -> Note {
        let note = Note {
            id: notesim_proto::NoteId::new(),
            request_id,
            summary: summary.into(),
            rating_count,
        };
        self.tables.lock().notes.push(note.clone());
        note
    }

    pub fn clear_content(&self) {
        let mut tables = self.tables.lock();
        tables.requests.clear();
        tables.notes.clear();
    }

    pub fn set_agent(&self, instance: AgentInstance) {
        let mut tables = self.tables.lock();
        match tables.agents.iter_mut().find(|a| a.id == instance.id) {
            Some(existing) => *existing = instance,
            None => tables.agents.push(instance),
        }
    }

    pub fn set_memory(&self, agent_instance_id: AgentInstanceId, memory: AgentMemory) {
        self.tables.lock().memories.insert(agent_instance_id, memory);
    }

    pub fn run(&self, run_id: RunId) -> Option<SimulationRun> {
        self.tables.lock().runs.get(&run_id).cloned()
    }

    pub fn agent(&self, agent_instance_id: AgentInstanceId) -> Option<AgentInstance> {
        self.tables
            .lock()
            .agents
            .iter()
            .find(|a| a.id == agent_instance_id)
            .cloned()
    }

    pub fn agents(&self, run_id: RunId) -> Vec<AgentInstance> {
        self.tables
            .lock()
            .agents
            .iter()
            .filter(|a| a.run_id == run_id)
            .cloned()
            .collect()
    }

    pub fn memory(&self, agent_instance_id: AgentInstanceId) -> Option<AgentMemory> {
        self.tables.lock().memories.get(&agent_instance_id).cloned()
    }

    pub fn participant_count(&self) -> usize {
        self.tables.lock().participants.len()
    }

    pub fn fail_content_checks(&self, fail: bool) {
        self.faults.lock().content_check = fail;
    }

    /// Config loads succeed `successes` more times, then fail.
    pub fn fail_config_loads_after(&self, successes: u32) {
        self.faults.lock().config_loads_before_failure = Some(successes);
    }

    pub fn fail_next_finalizes(&self, count: u32) {
        self.faults.lock().finalize_failures = count;
    }

    /// Run reads succeed `successes` more times, then exactly one fails.
    pub fn fail_one_run_read_after(&self, successes: u32) {
        self.faults.lock().run_reads_before_failure = Some(successes);
    }

    pub fn fail_next_metrics_updates(&self, count: u32) {
        self.faults.lock().metrics_update_failures = count;
    }

    /// Makes the next `count` active-agent listings fail.
    pub fn fail_next_agent_listings(&self, count: u32) {
        self.faults.lock().list_agents_failures = count;
    }

    pub fn config_loads(&self) -> u32 {
        self.counters.lock().config_loads
    }

    pub fn content_checks(&self) -> u32 {
        self.counters.lock().content_checks
    }

    pub fn finalize_calls(&self) -> Vec<(RunStatus, Option<String>)> {
        self.counters.lock().finalize_calls.clone()
    }

    pub fn metrics_updates(&self) -> u32 {
        self.counters.lock().metrics_updates
    }

    fn community_notes<'a>(
        tables: &'a Tables,
        community_id: CommunityId,
    ) -> impl Iterator<Item = &'a Note> + 'a {
        tables.notes.iter().filter(move |note| {
            tables
                .requests
                .iter()
                .any(|r| r.id == note.request_id && r.community_id == community_id)
        })
    }
}

#[async_trait]
impl SimulationStore for InMemoryStore {
    async fn get_run(&self, run_id: RunId) -> Result<Option<SimulationRun>> {
        {
            let mut faults = self.faults.lock();
            if let Some(remaining) = faults.run_reads_before_failure.as_mut() {
                if *remaining == 0 {
                    faults.run_reads_before_failure = None;
                    return Err(Error::storage("connection reset"));
                }
                *remaining -= 1;
            }
        }
        let mut tables = self.tables.lock();
        let scripted = tables
            .status_script
            .get_mut(&run_id)
            .and_then(VecDeque::pop_front);
        let Some(run) = tables.runs.get_mut(&run_id) else {
            return Ok(None);
        };
        if let Some(status) = scripted {
            run.status = status;
        }
        Ok(Some(run.clone()))
    }

    async fn transition_run_status(
        &self,
        run_id: RunId,
        from: &[RunStatus],
        to: RunStatus,
    ) -> Result<Option<RunId>> {
        let mut tables = self.tables.lock();
        let Some(run) = tables.runs.get_mut(&run_id) else {
            return Ok(None);
        };
        if !from.contains(&run.status) {
            return Ok(None);
        }
        run.status = to;
        match to {
            RunStatus::Running if run.started_at.is_none() => run.started_at = Some(Utc::now()),
            RunStatus::Paused => run.paused_at = Some(Utc::now()),
            _ => {}
        }
        Ok(Some(run_id))
    }

    async fn update_run_metrics(&self, run_id: RunId, metrics: RunMetrics) -> Result<()> {
        {
            let mut faults = self.faults.lock();
            if faults.metrics_update_failures > 0 {
                faults.metrics_update_failures -= 1;
                return Err(Error::storage("metrics write timed out"));
            }
        }
        let mut tables = self.tables.lock();
        let run = tables
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| Error::not_found("simulation run", run_id))?;
        run.metrics = metrics;
        self.counters.lock().metrics_updates += 1;
        Ok(())
    }

    async fn finalize_run(
        &self,
        run_id: RunId,
        from: &[RunStatus],
        status: RunStatus,
        error_message: Option<String>,
    ) -> Result<Option<RunId>> {
        self.counters
            .lock()
            .finalize_calls
            .push((status, error_message.clone()));
        {
            let mut faults = self.faults.lock();
            if faults.finalize_failures > 0 {
                faults.finalize_failures -= 1;
                return Err(Error::storage("finalize write rejected"));
            }
        }

        let mut tables = self.tables.lock();
        let run = tables
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| Error::not_found("simulation run", run_id))?;
        if !from.contains(&run.status) {
            return Ok(None);
        }
        run.status = status;
        run.completed_at = Some(Utc::now());
        if error_message.is_some() {
            run.error_message = error_message;
        }
        Ok(Some(run_id))
    }

    async fn load_orchestrator_config(
        &self,
        config_id: ConfigId,
    ) -> Result<Option<OrchestratorConfig>> {
        self.counters.lock().config_loads += 1;
        {
            let mut faults = self.faults.lock();
            if let Some(remaining) = faults.config_loads_before_failure.as_mut() {
                if *remaining == 0 {
                    return Err(Error::storage("config table unavailable"));
                }
                *remaining -= 1;
            }
        }
        Ok(self.tables.lock().configs.get(&config_id).cloned())
    }

    async fn get_profile(&self, profile_id: ProfileId) -> Result<Option<AgentProfile>> {
        Ok(self.tables.lock().profiles.get(&profile_id).cloned())
    }

    async fn population_snapshot(&self, run_id: RunId) -> Result<PopulationSnapshot> {
        let tables = self.tables.lock();
        let mut snapshot = PopulationSnapshot::default();
        for agent in tables.agents.iter().filter(|a| a.run_id == run_id) {
            snapshot.spawned += 1;
            if agent.removed_at.is_some() {
                snapshot.removed += 1;
            } else if agent.is_active() {
                snapshot.active += 1;
            }
        }
        Ok(snapshot)
    }

    async fn count_active_agents(&self, run_id: RunId) -> Result<u32> {
        Ok(self.population_snapshot(run_id).await?.active)
    }

    async fn list_active_agents(&self, run_id: RunId) -> Result<Vec<AgentInstance>> {
        {
            let mut faults = self.faults.lock();
            if faults.list_agents_failures > 0 {
                faults.list_agents_failures -= 1;
                return Err(Error::storage("agent listing timed out"));
            }
        }
        let tables = self.tables.lock();
        let mut active: Vec<AgentInstance> = tables
            .agents
            .iter()
            .filter(|a| a.run_id == run_id && a.is_active())
            .cloned()
            .collect();
        active.sort_by_key(|a| a.created_at);
        Ok(active)
    }

    async fn get_agent(&self, agent_instance_id: AgentInstanceId) -> Result<Option<AgentInstance>> {
        Ok(self.agent(agent_instance_id))
    }

    async fn create_participant(
        &self,
        run_id: RunId,
        profile_id: ProfileId,
    ) -> Result<ParticipantId> {
        let id = ParticipantId::new();
        self.tables
            .lock()
            .participants
            .insert(id, (run_id, profile_id));
        Ok(id)
    }

    async fn insert_agent(&self, instance: AgentInstance) -> Result<()> {
        self.tables.lock().agents.push(instance);
        Ok(())
    }

    async fn remove_oldest_active_agent(&self, run_id: RunId) -> Result<Option<AgentInstanceId>> {
        let mut tables = self.tables.lock();
        let oldest = tables
            .agents
            .iter_mut()
            .filter(|a| a.run_id == run_id && a.is_active())
            .min_by_key(|a| a.created_at);
        Ok(oldest.map(|agent| {
            agent.removed_at = Some(Utc::now());
            agent.id
        }))
    }

    async fn remove_agents(&self, ids: &[AgentInstanceId]) -> Result<u32> {
        let mut tables = self.tables.lock();
        let now = Utc::now();
        let mut removed = 0;
        for agent in tables
            .agents
            .iter_mut()
            .filter(|a| ids.contains(&a.id) && a.is_active())
        {
            agent.removed_at = Some(now);
            removed += 1;
        }
        Ok(removed)
    }

    async fn increment_retry_count(
        &self,
        agent_instance_id: AgentInstanceId,
    ) -> Result<Option<u32>> {
        let mut tables = self.tables.lock();
        Ok(tables
            .agents
            .iter_mut()
            .find(|a| a.id == agent_instance_id && a.is_active())
            .map(|agent| {
                agent.retry_count += 1;
                agent.retry_count
            }))
    }

    async fn complete_active_agents(&self, run_id: RunId) -> Result<u32> {
        let mut tables = self.tables.lock();
        let now = Utc::now();
        let mut completed = 0;
        for agent in tables
            .agents
            .iter_mut()
            .filter(|a| a.run_id == run_id && a.is_active())
        {
            agent.completed_at = Some(now);
            completed += 1;
        }
        Ok(completed)
    }

    async fn total_turns_completed(&self, run_id: RunId) -> Result<u64> {
        Ok(self
            .tables
            .lock()
            .agents
            .iter()
            .filter(|a| a.run_id == run_id)
            .map(|a| u64::from(a.turn_count))
            .sum())
    }

    async fn get_memory(&self, agent_instance_id: AgentInstanceId) -> Result<Option<AgentMemory>> {
        Ok(self.memory(agent_instance_id))
    }

    async fn persist_turn(
        &self,
        agent_instance_id: AgentInstanceId,
        memory: AgentMemory,
    ) -> Result<u32> {
        let mut tables = self.tables.lock();
        let agent = tables
            .agents
            .iter_mut()
            .find(|a| a.id == agent_instance_id)
            .ok_or_else(|| Error::not_found("agent instance", agent_instance_id))?;
        agent.turn_count += 1;
        agent.retry_count = 0;
        let turn_count = agent.turn_count;
        tables.memories.insert(agent_instance_id, memory);
        Ok(turn_count)
    }

    async fn content_availability(&self, community_id: CommunityId) -> Result<ContentAvailability> {
        self.counters.lock().content_checks += 1;
        if self.faults.lock().content_check {
            return Err(Error::storage("content query failed"));
        }
        let tables = self.tables.lock();
        let pending_requests = tables
            .requests
            .iter()
            .filter(|r| r.community_id == community_id)
            .count();
        let unrated_notes = Self::community_notes(&tables, community_id)
            .filter(|n| n.rating_count < RATING_TARGET)
            .count();
        Ok(ContentAvailability {
            pending_requests: u32::try_from(pending_requests).unwrap_or(u32::MAX),
            unrated_notes: u32::try_from(unrated_notes).unwrap_or(u32::MAX),
        })
    }

    async fn open_requests(&self, community_id: CommunityId, limit: usize) -> Result<Vec<Request>> {
        Ok(self
            .tables
            .lock()
            .requests
            .iter()
            .filter(|r| r.community_id == community_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn notes_for_request(&self, request_id: RequestId, limit: usize) -> Result<Vec<Note>> {
        Ok(self
            .tables
            .lock()
            .notes
            .iter()
            .filter(|n| n.request_id == request_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn notes_needing_ratings(
        &self,
        community_id: CommunityId,
        limit: usize,
    ) -> Result<Vec<Note>> {
        let tables = self.tables.lock();
        Ok(Self::community_notes(&tables, community_id)
            .filter(|n| n.rating_count < RATING_TARGET)
            .take(limit)
            .cloned()
            .collect())
    }
}
