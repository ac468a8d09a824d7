//! Integration tests for dispatch, population management, and stuck-agent recovery.

use notesim_core::testing::{TestHarness, sample_config, sample_profiles};
use notesim_core::{
    DispatchConfig, Dispatcher, EngineConfig, PopulationManager, StuckAgentRecovery,
    turn_workflow_id,
};
use notesim_proto::{
    AgentInstance, DispatchArgs, OrchestratorConfig, ParticipantId, RunId, WorkflowStatus,
};

fn seeded(max_agents: u32) -> (TestHarness, RunId, OrchestratorConfig) {
    let harness = TestHarness::new();
    let profiles = sample_profiles();
    let mut config = sample_config(&profiles);
    config.max_agents = max_agents;
    let run_id = harness.store.seed_run(config.clone(), profiles);
    (harness, run_id, config)
}

fn dispatcher(harness: &TestHarness) -> Dispatcher {
    Dispatcher::new(
        harness.queue.clone(),
        harness.store.clone(),
        DispatchConfig::default(),
    )
}

fn add_agent(
    harness: &TestHarness,
    run_id: RunId,
    config: &OrchestratorConfig,
    turn_count: u32,
    retry_count: u32,
) -> AgentInstance {
    let mut agent = AgentInstance::new(run_id, config.agent_profile_ids[0], ParticipantId::new());
    agent.turn_count = turn_count;
    agent.retry_count = retry_count;
    harness.store.set_agent(agent.clone());
    agent
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatch
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_dispatching_same_turn_twice_enqueues_once() {
    let (harness, run_id, config) = seeded(2);
    let agent = add_agent(&harness, run_id, &config, 0, 0);
    let dispatcher = dispatcher(&harness);

    let first = dispatcher.dispatch_agent_turn(agent.id, 1, 0).await.unwrap();
    let second = dispatcher.dispatch_agent_turn(agent.id, 1, 0).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(harness.queue.enqueue_calls(), 2);
    assert_eq!(harness.queue.enqueued().len(), 1, "Duplicate dispatch should collapse");

    let queued = &harness.queue.enqueued()[0];
    assert_eq!(queued.options.queue_name, "simulation_turn");
    assert_eq!(queued.options.workflow_name, "agent_turn");
    assert_eq!(queued.options.workflow_id, format!("turn-{}-1-retry0", agent.id));
    assert_eq!(queued.options.deduplication_id, queued.options.workflow_id);
    assert_eq!(
        queued.args,
        DispatchArgs::AgentTurn {
            agent_instance_id: agent.id
        }
    );
}

#[tokio::test]
async fn test_retry_dispatch_gets_fresh_workflow_id() {
    let (harness, run_id, config) = seeded(2);
    let agent = add_agent(&harness, run_id, &config, 0, 0);
    let dispatcher = dispatcher(&harness);

    dispatcher.dispatch_agent_turn(agent.id, 1, 0).await.unwrap();
    dispatcher.dispatch_agent_turn(agent.id, 1, 1).await.unwrap();

    assert_eq!(
        harness.queue.enqueued_ids(),
        vec![
            format!("turn-{}-1-retry0", agent.id),
            format!("turn-{}-1-retry1", agent.id),
        ]
    );
}

#[tokio::test]
async fn test_orchestrator_dispatch_uses_generation_id() {
    let (harness, run_id, _) = seeded(2);
    let dispatcher = dispatcher(&harness);

    dispatcher.dispatch_orchestrator(run_id, 0).await.unwrap();
    dispatcher.dispatch_orchestrator(run_id, 0).await.unwrap();
    dispatcher.dispatch_orchestrator(run_id, 1).await.unwrap();

    let enqueued = harness.queue.enqueued();
    assert_eq!(enqueued.len(), 2);
    assert_eq!(enqueued[0].options.queue_name, "simulation_orchestrator");
    assert_eq!(enqueued[0].options.workflow_name, "orchestrator");
    assert_eq!(
        enqueued[1].options.workflow_id,
        format!("orchestrator-{run_id}-gen1")
    );
}

#[tokio::test]
async fn test_schedule_skips_agents_at_max_turns() {
    let (harness, run_id, config) = seeded(2);
    let done = add_agent(&harness, run_id, &config, config.max_turns_per_agent, 0);
    let fresh = add_agent(&harness, run_id, &config, 1, 0);

    let outcome = dispatcher(&harness)
        .schedule_turns_step(run_id, &config, &[])
        .await
        .unwrap();

    assert_eq!(outcome.dispatched, 1);
    assert_eq!(outcome.skipped, 1);
    assert_eq!(outcome.removed_for_retries, 0);
    let ids = harness.queue.enqueued_ids();
    assert_eq!(ids, vec![turn_workflow_id(fresh.id, 2, 0)]);
    assert!(!ids.iter().any(|id| id.contains(&done.id.to_string())));
}

#[tokio::test]
async fn test_schedule_removes_agent_at_retry_threshold() {
    let (harness, run_id, config) = seeded(2);
    let exhausted = add_agent(&harness, run_id, &config, 1, 3);
    let retrying = add_agent(&harness, run_id, &config, 1, 2);

    let outcome = dispatcher(&harness)
        .schedule_turns_step(run_id, &config, &[])
        .await
        .unwrap();

    assert_eq!(outcome.removed_for_retries, 1);
    assert_eq!(outcome.dispatched, 1);
    assert_eq!(
        harness.queue.enqueued_ids(),
        vec![turn_workflow_id(retrying.id, 2, 2)]
    );
    let removed = harness.store.agent(exhausted.id).unwrap();
    assert!(removed.removed_at.is_some());
}

#[tokio::test]
async fn test_schedule_leaves_in_flight_turns_alone() {
    let (harness, run_id, config) = seeded(2);
    let busy = add_agent(&harness, run_id, &config, 1, 0);
    let idle = add_agent(&harness, run_id, &config, 1, 0);
    let dispatcher = dispatcher(&harness);

    let outcome = dispatcher
        .schedule_turns_step(run_id, &config, &[busy.id])
        .await
        .unwrap();

    assert_eq!(outcome.dispatched, 1);
    assert_eq!(outcome.in_flight, 1);
    assert_eq!(outcome.skipped, 0);
    assert_eq!(harness.queue.enqueue_calls(), 1);
    assert_eq!(
        harness.queue.enqueued_ids(),
        vec![turn_workflow_id(idle.id, 2, 0)]
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Population
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_spawn_fills_population_to_cap() {
    let (harness, run_id, config) = seeded(5);
    let population = PopulationManager::new(harness.store.clone(), &EngineConfig::default().population);

    let spawned = population.spawn_agents(run_id, &config).await.unwrap();
    assert_eq!(spawned.len(), 5);
    assert_eq!(harness.store.participant_count(), 5);

    let again = population.spawn_agents(run_id, &config).await.unwrap();
    assert!(again.is_empty(), "Population at cap must not grow");
    assert_eq!(population.snapshot(run_id).await.unwrap().active, 5);
}

#[tokio::test]
async fn test_spawn_respects_batch_size() {
    let (harness, run_id, config) = seeded(5);
    let engine_config = EngineConfig::default().with_spawn_batch_size(2);
    let population = PopulationManager::new(harness.store.clone(), &engine_config.population);

    let mut sizes = Vec::new();
    for _ in 0..4 {
        sizes.push(population.spawn_agents(run_id, &config).await.unwrap().len());
    }

    assert_eq!(sizes, vec![2, 2, 1, 0]);
}

#[tokio::test]
async fn test_profiles_assigned_round_robin_across_batches() {
    let (harness, run_id, config) = seeded(4);
    let engine_config = EngineConfig::default().with_spawn_batch_size(3);
    let population = PopulationManager::new(harness.store.clone(), &engine_config.population);

    population.spawn_agents(run_id, &config).await.unwrap();
    population.spawn_agents(run_id, &config).await.unwrap();

    let assigned: Vec<_> = harness
        .store
        .agents(run_id)
        .iter()
        .map(|a| a.profile_id)
        .collect();
    let p = &config.agent_profile_ids;
    assert_eq!(assigned, vec![p[0], p[1], p[0], p[1]]);
}

#[tokio::test]
async fn test_removal_keeps_at_least_one_agent() {
    let (harness, run_id, mut config) = seeded(3);
    config.removal_rate = 1.0;
    let population = PopulationManager::new(
        harness.store.clone(),
        &EngineConfig::default().with_rng_seed(7).population,
    );
    add_agent(&harness, run_id, &config, 0, 0);

    let removed = population.remove_agents(run_id, &config, 1).await.unwrap();

    assert!(removed.is_none());
    assert_eq!(population.snapshot(run_id).await.unwrap().active, 1);
}

#[tokio::test]
async fn test_removal_retires_oldest_agent() {
    let (harness, run_id, mut config) = seeded(3);
    config.removal_rate = 1.0;
    let population = PopulationManager::new(
        harness.store.clone(),
        &EngineConfig::default().with_rng_seed(7).population,
    );
    let oldest = add_agent(&harness, run_id, &config, 0, 0);
    add_agent(&harness, run_id, &config, 0, 0);

    let removed = population.remove_agents(run_id, &config, 2).await.unwrap();

    assert_eq!(removed, Some(oldest.id));
    let snapshot = population.snapshot(run_id).await.unwrap();
    assert_eq!(snapshot.active, 1);
    assert_eq!(snapshot.removed, 1);
}

#[tokio::test]
async fn test_zero_removal_rate_never_removes() {
    let (harness, run_id, config) = seeded(3);
    let population = PopulationManager::new(harness.store.clone(), &EngineConfig::default().population);
    for _ in 0..3 {
        add_agent(&harness, run_id, &config, 0, 0);
    }

    for _ in 0..20 {
        assert!(population.remove_agents(run_id, &config, 3).await.unwrap().is_none());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stuck-agent recovery
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_recovery_only_bumps_failed_turns() {
    let (harness, run_id, config) = seeded(8);
    let statuses = [
        Some(WorkflowStatus::Error),
        Some(WorkflowStatus::MaxRecoveryAttemptsExceeded),
        Some(WorkflowStatus::Cancelled),
        Some(WorkflowStatus::Success),
        Some(WorkflowStatus::Pending),
        Some(WorkflowStatus::Enqueued),
        None,
    ];
    let mut agents = Vec::new();
    for status in statuses {
        let agent = add_agent(&harness, run_id, &config, 2, 0);
        if let Some(status) = status {
            harness
                .queue
                .set_status(turn_workflow_id(agent.id, 3, 0), status);
        }
        agents.push(agent);
    }

    let recovery = StuckAgentRecovery::new(harness.store.clone(), harness.queue.clone(), 3);
    let outcome = recovery.recover(run_id).await.unwrap();

    assert_eq!(outcome.retried, 3);
    assert_eq!(outcome.agent_ids, vec![agents[0].id, agents[1].id, agents[2].id]);
    assert_eq!(outcome.in_flight, vec![agents[4].id, agents[5].id]);
    for (index, agent) in agents.iter().enumerate() {
        let expected = u32::from(index < 3);
        assert_eq!(harness.store.agent(agent.id).unwrap().retry_count, expected);
    }
}

#[tokio::test]
async fn test_recovery_ignores_exhausted_agents_and_status_errors() {
    let (harness, run_id, config) = seeded(3);
    let exhausted = add_agent(&harness, run_id, &config, 0, 3);
    harness
        .queue
        .set_status(turn_workflow_id(exhausted.id, 1, 3), WorkflowStatus::Error);
    let unreadable = add_agent(&harness, run_id, &config, 0, 0);
    harness
        .queue
        .fail_status_queries_for(turn_workflow_id(unreadable.id, 1, 0));
    let failed = add_agent(&harness, run_id, &config, 0, 1);
    harness
        .queue
        .set_status(turn_workflow_id(failed.id, 1, 1), WorkflowStatus::Error);

    let recovery = StuckAgentRecovery::new(harness.store.clone(), harness.queue.clone(), 3);
    let outcome = recovery.recover(run_id).await.unwrap();

    assert_eq!(outcome.agent_ids, vec![failed.id]);
    assert_eq!(harness.store.agent(exhausted.id).unwrap().retry_count, 3);
    assert_eq!(harness.store.agent(unreadable.id).unwrap().retry_count, 0);
    assert_eq!(harness.store.agent(failed.id).unwrap().retry_count, 2);
}
