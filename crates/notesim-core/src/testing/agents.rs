//! Scripted LLM-side collaborators.

use async_trait::async_trait;
use notesim_proto::{
    ActionContext, ActionSelection, ActionType, AgentAction, AgentEngine, CommunityId,
    ConversationMessage, Error, HelpfulnessLevel, MemoryCompactor, NoteClassification,
    ProgressCache, RecentActions, Result, ScoringOutcome, ScoringTrigger, SelectionResult,
    TurnDependencies, TurnResult, UsageLimits,
};
use parking_lot::Mutex;
use std::collections::VecDeque;

#[derive(Default)]
struct EngineState {
    script: VecDeque<ActionType>,
    selection_calls: u32,
    execution_calls: u32,
    usage_limit_on_select: bool,
    usage_limit_on_execute: bool,
    last_limits: Option<UsageLimits>,
    last_hint: Option<ActionType>,
    last_execution_history: Vec<ConversationMessage>,
}

/// Agent engine that plays scripted action types.
///
/// Without a script entry it writes a note when a request is open, rates
/// one when a note needs ratings, and passes otherwise. Each phase appends
/// one exchange to the history it was given.
#[derive(Default)]
pub struct ScriptedAgentEngine {
    state: Mutex<EngineState>,
}

impl ScriptedAgentEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(actions: impl IntoIterator<Item = ActionType>) -> Self {
        let engine = Self::default();
        engine.state.lock().script.extend(actions);
        engine
    }

    pub fn exceed_usage_limit_on_select(&self, exceed: bool) {
        self.state.lock().usage_limit_on_select = exceed;
    }

    pub fn exceed_usage_limit_on_execute(&self, exceed: bool) {
        self.state.lock().usage_limit_on_execute = exceed;
    }

    pub fn selection_calls(&self) -> u32 {
        self.state.lock().selection_calls
    }

    pub fn execution_calls(&self) -> u32 {
        self.state.lock().execution_calls
    }

    pub fn last_limits(&self) -> Option<UsageLimits> {
        self.state.lock().last_limits
    }

    pub fn last_hint(&self) -> Option<ActionType> {
        self.state.lock().last_hint
    }

    /// History phase 2 last continued from.
    pub fn last_execution_history(&self) -> Vec<ConversationMessage> {
        self.state.lock().last_execution_history.clone()
    }

    fn default_choice(deps: &TurnDependencies) -> ActionType {
        if !deps.requests.is_empty() {
            ActionType::WriteNote
        } else if !deps.notes_needing_ratings.is_empty() {
            ActionType::RateNote
        } else {
            ActionType::PassTurn
        }
    }
}

#[async_trait]
impl AgentEngine for ScriptedAgentEngine {
    async fn select_action(
        &self,
        context: &ActionContext,
        deps: &TurnDependencies,
        history: &[ConversationMessage],
        _recent_actions: &RecentActions,
        limits: UsageLimits,
    ) -> Result<SelectionResult> {
        let mut state = self.state.lock();
        state.selection_calls += 1;
        state.last_limits = Some(limits);
        if state.usage_limit_on_select {
            return Err(Error::UsageLimitExceeded(format!(
                "request_limit of {} reached",
                limits.request_limit
            )));
        }

        let action_type = state
            .script
            .pop_front()
            .unwrap_or_else(|| Self::default_choice(deps));
        let reasoning = format!("turn {}: choosing {action_type}", context.turn_number);

        let mut messages = history.to_vec();
        messages.push(ConversationMessage::user(format!(
            "Turn {}: pick an action",
            context.turn_number
        )));
        messages.push(ConversationMessage::assistant(reasoning.clone()));

        Ok(SelectionResult {
            selection: ActionSelection {
                action_type,
                reasoning,
            },
            messages,
        })
    }

    async fn run_turn(
        &self,
        _context: &ActionContext,
        deps: &TurnDependencies,
        history: &[ConversationMessage],
        limits: UsageLimits,
        hint: ActionType,
    ) -> Result<TurnResult> {
        let mut state = self.state.lock();
        state.execution_calls += 1;
        state.last_limits = Some(limits);
        state.last_hint = Some(hint);
        state.last_execution_history = history.to_vec();
        if state.usage_limit_on_execute {
            return Err(Error::UsageLimitExceeded(format!(
                "total_tokens_limit of {} reached",
                limits.total_tokens_limit
            )));
        }

        let action = match hint {
            ActionType::WriteNote => match deps.requests.first() {
                Some(entry) => AgentAction::WriteNote {
                    request_id: entry.request.id,
                    summary: format!("Context for: {}", entry.request.content),
                    classification: NoteClassification::MisinformedOrPotentiallyMisleading,
                },
                None => AgentAction::pass("no open request to write about"),
            },
            ActionType::RateNote => match deps.notes_needing_ratings.first() {
                Some(note) => AgentAction::RateNote {
                    note_id: note.id,
                    helpfulness_level: HelpfulnessLevel::SomewhatHelpful,
                },
                None => AgentAction::pass("no note needs a rating"),
            },
            ActionType::PassTurn => AgentAction::pass("nothing to do"),
        };

        let reasoning = format!("executed {}", action.action_type());
        let mut messages = history.to_vec();
        messages.push(
            ConversationMessage::assistant(reasoning.clone()).with_tool(hint.as_str()),
        );

        Ok(TurnResult {
            action,
            reasoning,
            messages,
        })
    }
}

#[derive(Default)]
struct CompactorState {
    fail: bool,
    calls: u32,
}

/// Compactor that folds any history into a single system summary.
#[derive(Default)]
pub struct StaticCompactor {
    state: Mutex<CompactorState>,
}

impl StaticCompactor {
    pub fn summarizing() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let compactor = Self::default();
        compactor.state.lock().fail = true;
        compactor
    }

    pub fn calls(&self) -> u32 {
        self.state.lock().calls
    }
}

#[async_trait]
impl MemoryCompactor for StaticCompactor {
    async fn compact(&self, history: &[ConversationMessage]) -> Result<Vec<ConversationMessage>> {
        let mut state = self.state.lock();
        state.calls += 1;
        if state.fail {
            return Err(Error::Compaction("summarizer unavailable".into()));
        }
        Ok(vec![ConversationMessage::system(format!(
            "Summary of {} earlier messages",
            history.len()
        ))])
    }
}

type ScoringHook = Box<dyn Fn(usize) + Send + Sync>;

/// Scoring trigger that records the communities it was asked to score.
#[derive(Default)]
pub struct RecordingScoring {
    calls: Mutex<Vec<CommunityId>>,
    fail: Mutex<bool>,
    hook: Mutex<Option<ScoringHook>>,
}

impl RecordingScoring {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let scoring = Self::default();
        *scoring.fail.lock() = true;
        scoring
    }

    /// Runs `hook` with the 1-based call number on every trigger, letting a
    /// test change the world mid-iteration.
    pub fn on_call(&self, hook: impl Fn(usize) + Send + Sync + 'static) {
        *self.hook.lock() = Some(Box::new(hook));
    }

    pub fn calls(&self) -> Vec<CommunityId> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ScoringTrigger for RecordingScoring {
    async fn trigger_scoring(&self, community_id: CommunityId) -> Result<ScoringOutcome> {
        let call = {
            let mut calls = self.calls.lock();
            calls.push(community_id);
            calls.len()
        };
        if let Some(hook) = self.hook.lock().as_ref() {
            hook(call);
        }
        if *self.fail.lock() {
            return Err(Error::Scoring("scorer crashed".into()));
        }
        Ok(ScoringOutcome {
            scores_computed: 1,
            tier: "minimal".into(),
            scorer: "bayesian_average".into(),
        })
    }
}

/// Progress cache that records deleted keys.
#[derive(Default)]
pub struct RecordingCache {
    deleted: Mutex<Vec<String>>,
    fail: Mutex<bool>,
}

impl RecordingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let cache = Self::default();
        *cache.fail.lock() = true;
        cache
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }
}

#[async_trait]
impl ProgressCache for RecordingCache {
    async fn delete(&self, key: &str) -> Result<()> {
        if *self.fail.lock() {
            return Err(Error::Cache("cache unreachable".into()));
        }
        self.deleted.lock().push(key.to_string());
        Ok(())
    }
}
