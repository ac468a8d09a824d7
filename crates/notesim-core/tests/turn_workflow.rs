//! Integration tests for the agent turn workflow.

use notesim_core::testing::{
    RecordingCache, ScriptedAgentEngine, TestHarness, sample_config, sample_profiles,
};
use notesim_core::{EngineConfig, WorkflowWorker, turn_workflow_id};
use notesim_proto::{
    ActionType, AgentAction, AgentInstance, AgentMemory, AgentProfile, ConversationMessage, Error,
    MessageRole, OrchestratorConfig, ParticipantId, RunId, UsageLimits,
};
use std::sync::Arc;

const ALL_STEPS: [&str; 6] = [
    "load_context",
    "compact_memory",
    "build_deps",
    "select_action",
    "execute_action",
    "persist_state",
];

struct Fixture {
    harness: TestHarness,
    run_id: RunId,
    config: OrchestratorConfig,
}

impl Fixture {
    fn new(harness: TestHarness) -> Self {
        let profiles = sample_profiles();
        let config = sample_config(&profiles);
        let run_id = harness.store.seed_run(config.clone(), profiles);
        Self {
            harness,
            run_id,
            config,
        }
    }

    fn worker(&self) -> WorkflowWorker {
        WorkflowWorker::new(self.harness.collaborators(), &EngineConfig::default())
    }

    fn agent_with_profile(&self, profile: &AgentProfile) -> AgentInstance {
        self.harness.store.insert_profile(profile.clone());
        let agent = AgentInstance::new(self.run_id, profile.id, ParticipantId::new());
        self.harness.store.set_agent(agent.clone());
        agent
    }

    fn agent(&self) -> AgentInstance {
        let agent = AgentInstance::new(
            self.run_id,
            self.config.agent_profile_ids[0],
            ParticipantId::new(),
        );
        self.harness.store.set_agent(agent.clone());
        agent
    }

    fn open_request(&self) {
        self.harness
            .store
            .add_request(self.config.community_id, "Viral claim about tides");
    }
}

fn workflow_id(agent: &AgentInstance) -> String {
    turn_workflow_id(agent.id, agent.turn_count + 1, agent.retry_count)
}

#[tokio::test]
async fn test_turn_writes_note_and_persists_state() {
    let fixture = Fixture::new(TestHarness::new());
    fixture.open_request();
    let mut agent = fixture.agent();
    agent.retry_count = 2;
    fixture.harness.store.set_agent(agent.clone());
    let wf = workflow_id(&agent);

    let report = fixture
        .worker()
        .turns()
        .run_agent_turn(agent.id, &wf)
        .await
        .unwrap();

    assert!(matches!(report.action, AgentAction::WriteNote { .. }));
    assert_eq!(report.turn_count, 1);
    assert!(!report.was_compacted);

    let stored = fixture.harness.store.agent(agent.id).unwrap();
    assert_eq!(stored.turn_count, 1);
    assert_eq!(stored.retry_count, 0, "A persisted turn resets the retry count");

    let memory = fixture.harness.store.memory(agent.id).unwrap();
    assert_eq!(memory.turn_count, 1);
    assert_eq!(memory.recent_actions.to_vec(), vec![ActionType::WriteNote]);
    assert_eq!(memory.message_history.len(), 3);

    assert_eq!(fixture.harness.journal.step_names(&wf), ALL_STEPS);
    assert_eq!(
        fixture.harness.cache.deleted(),
        vec![format!("progress:{}", fixture.run_id)]
    );
}

#[tokio::test]
async fn test_pass_turn_skips_execution() {
    let fixture = Fixture::new(
        TestHarness::new().with_engine(ScriptedAgentEngine::with_script([ActionType::PassTurn])),
    );
    fixture.open_request();
    let agent = fixture.agent();
    let wf = workflow_id(&agent);

    let report = fixture
        .worker()
        .turns()
        .run_agent_turn(agent.id, &wf)
        .await
        .unwrap();

    assert_eq!(report.action.action_type(), ActionType::PassTurn);
    assert_eq!(fixture.harness.engine.execution_calls(), 0);
    assert_eq!(
        fixture.harness.journal.step_names(&wf),
        vec![
            "load_context",
            "compact_memory",
            "build_deps",
            "select_action",
            "persist_state"
        ]
    );
    let memory = fixture.harness.store.memory(agent.id).unwrap();
    assert_eq!(memory.recent_actions.to_vec(), vec![ActionType::PassTurn]);
    assert_eq!(memory.message_history.len(), 2);
}

#[tokio::test]
async fn test_usage_limit_during_execution_becomes_pass_turn() {
    let fixture = Fixture::new(TestHarness::new());
    fixture.open_request();
    fixture.harness.engine.exceed_usage_limit_on_execute(true);
    let agent = fixture.agent();
    let wf = workflow_id(&agent);

    let report = fixture
        .worker()
        .turns()
        .run_agent_turn(agent.id, &wf)
        .await
        .unwrap();

    assert_eq!(report.action.action_type(), ActionType::PassTurn);
    assert!(report.usage_limit_exceeded);
    assert!(
        report.reasoning.contains("usage limit exceeded"),
        "Unexpected reasoning: {}",
        report.reasoning
    );

    let memory = fixture.harness.store.memory(agent.id).unwrap();
    assert_eq!(memory.recent_actions.to_vec(), vec![ActionType::PassTurn]);
    assert_eq!(
        memory.message_history,
        vec![
            ConversationMessage::user("Turn 1: pick an action"),
            ConversationMessage::assistant("turn 1: choosing write_note"),
        ],
        "Phase-1 trace should be kept"
    );
    assert_eq!(fixture.harness.store.agent(agent.id).unwrap().turn_count, 1);
}

#[tokio::test]
async fn test_usage_limit_during_selection_becomes_pass_turn() {
    let fixture = Fixture::new(TestHarness::new());
    fixture.open_request();
    fixture.harness.engine.exceed_usage_limit_on_select(true);
    let agent = fixture.agent();

    let report = fixture
        .worker()
        .turns()
        .run_agent_turn(agent.id, &workflow_id(&agent))
        .await
        .unwrap();

    assert_eq!(report.action.action_type(), ActionType::PassTurn);
    assert!(report.reasoning.contains("usage limit exceeded"));
    assert_eq!(fixture.harness.engine.execution_calls(), 0);
}

#[tokio::test]
async fn test_profile_usage_limits_override_defaults() {
    let fixture = Fixture::new(TestHarness::new());
    fixture.open_request();
    let capped = AgentProfile::new("terse", "test-model").with_usage_limits(2, 1_000);
    let agent = fixture.agent_with_profile(&capped);

    fixture
        .worker()
        .turns()
        .run_agent_turn(agent.id, &workflow_id(&agent))
        .await
        .unwrap();

    assert_eq!(
        fixture.harness.engine.last_limits(),
        Some(UsageLimits {
            request_limit: 2,
            total_tokens_limit: 1_000
        })
    );
}

#[tokio::test]
async fn test_default_usage_limits_apply_without_override() {
    let fixture = Fixture::new(TestHarness::new());
    fixture.open_request();
    let agent = fixture.agent();

    fixture
        .worker()
        .turns()
        .run_agent_turn(agent.id, &workflow_id(&agent))
        .await
        .unwrap();

    assert_eq!(
        fixture.harness.engine.last_limits(),
        Some(UsageLimits {
            request_limit: 10,
            total_tokens_limit: 50_000
        })
    );
}

#[tokio::test]
async fn test_memory_compacted_on_interval() {
    let fixture = Fixture::new(TestHarness::new());
    fixture.open_request();
    let agent = fixture.agent();
    let history: Vec<_> = (0..12)
        .map(|i| ConversationMessage::user(format!("old message {i}")))
        .collect();
    fixture.harness.store.set_memory(
        agent.id,
        AgentMemory {
            message_history: history,
            turn_count: 10,
            ..AgentMemory::default()
        },
    );

    let report = fixture
        .worker()
        .turns()
        .run_agent_turn(agent.id, &workflow_id(&agent))
        .await
        .unwrap();

    assert!(report.was_compacted);
    assert_eq!(fixture.harness.compactor.calls(), 1);
    let phase_two_history = fixture.harness.engine.last_execution_history();
    assert_eq!(phase_two_history[0].role, MessageRole::System);
    assert_eq!(phase_two_history.len(), 3);

    let memory = fixture.harness.store.memory(agent.id).unwrap();
    assert_eq!(memory.turn_count, 11);
    assert_eq!(memory.message_history.len(), 4);
}

#[tokio::test]
async fn test_rerun_of_finished_turn_replays_every_step() {
    let fixture = Fixture::new(TestHarness::new());
    fixture.open_request();
    let agent = fixture.agent();
    let wf = workflow_id(&agent);
    let worker = fixture.worker();

    let first = worker.turns().run_agent_turn(agent.id, &wf).await.unwrap();
    let second = worker.turns().run_agent_turn(agent.id, &wf).await.unwrap();

    assert_eq!(second.replayed_steps, 6);
    assert_eq!(second.action, first.action);
    assert_eq!(fixture.harness.engine.selection_calls(), 1);
    assert_eq!(fixture.harness.engine.execution_calls(), 1);
    assert_eq!(fixture.harness.store.agent(agent.id).unwrap().turn_count, 1);
}

#[tokio::test]
async fn test_resumed_turn_skips_completed_llm_calls() {
    let fixture = Fixture::new(TestHarness::new());
    fixture.open_request();
    let agent = fixture.agent();
    let wf = workflow_id(&agent);
    let worker = fixture.worker();

    worker.turns().run_agent_turn(agent.id, &wf).await.unwrap();
    // Lose everything from execute_action on.
    fixture.harness.journal.truncate(&wf, 4);
    let resumed = worker.turns().run_agent_turn(agent.id, &wf).await.unwrap();

    assert_eq!(resumed.replayed_steps, 4);
    assert_eq!(fixture.harness.engine.selection_calls(), 1);
    assert_eq!(fixture.harness.engine.execution_calls(), 2);
}

#[tokio::test]
async fn test_recent_actions_keep_last_five_turns() {
    let script = [
        ActionType::WriteNote,
        ActionType::RateNote,
        ActionType::PassTurn,
        ActionType::WriteNote,
        ActionType::PassTurn,
        ActionType::RateNote,
        ActionType::PassTurn,
    ];
    let fixture = Fixture::new(TestHarness::new().with_engine(ScriptedAgentEngine::with_script(script)));
    let request_id = fixture
        .harness
        .store
        .add_request(fixture.config.community_id, "Doctored photo");
    fixture.harness.store.add_note(request_id, "Photo is from 2009", 0);
    let agent = fixture.agent();
    let worker = fixture.worker();

    for turn in 0..script.len() {
        let current = fixture.harness.store.agent(agent.id).unwrap();
        worker
            .turns()
            .run_agent_turn(agent.id, &workflow_id(&current))
            .await
            .unwrap();
        let memory = fixture.harness.store.memory(agent.id).unwrap();
        assert_eq!(memory.recent_actions.len(), (turn + 1).min(5));
    }

    let memory = fixture.harness.store.memory(agent.id).unwrap();
    assert_eq!(memory.recent_actions.to_vec(), script[2..].to_vec());
    assert_eq!(memory.turn_count, 7);
}

#[tokio::test]
async fn test_missing_agent_fails_with_not_found() {
    let fixture = Fixture::new(TestHarness::new());
    let ghost = AgentInstance::new(
        fixture.run_id,
        fixture.config.agent_profile_ids[0],
        ParticipantId::new(),
    );

    let err = fixture
        .worker()
        .turns()
        .run_agent_turn(ghost.id, &workflow_id(&ghost))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NotFound { .. }));
    assert!(fixture.harness.journal.is_empty(), "Failed steps are not journaled");
}

#[tokio::test]
async fn test_cache_failure_does_not_fail_turn() {
    let mut harness = TestHarness::new();
    harness.cache = Arc::new(RecordingCache::failing());
    let fixture = Fixture::new(harness);
    fixture.open_request();
    let agent = fixture.agent();

    let report = fixture
        .worker()
        .turns()
        .run_agent_turn(agent.id, &workflow_id(&agent))
        .await
        .unwrap();

    assert_eq!(report.turn_count, 1);
}
