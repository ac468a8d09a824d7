//! Agent memory compaction and turn-to-turn carry-over.

use notesim_proto::{ActionType, AgentMemory, ConversationMessage, MemoryCompactor, RecentActions};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// History handed to the action calls of a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactionResult {
    pub messages: Vec<ConversationMessage>,
    pub was_compacted: bool,
}

/// Compaction runs on non-zero multiples of the interval.
pub fn should_compact(turn_count: u32, interval: u32) -> bool {
    interval > 0 && turn_count > 0 && turn_count % interval == 0
}

/// Compacts `history` when the cadence says so.
///
/// A compactor failure keeps the original history: compaction only trims
/// context and is never required for a correct turn.
pub async fn compact_history(
    compactor: &dyn MemoryCompactor,
    history: Vec<ConversationMessage>,
    turn_count: u32,
    interval: u32,
) -> CompactionResult {
    if !should_compact(turn_count, interval) {
        return CompactionResult {
            messages: history,
            was_compacted: false,
        };
    }

    match compactor.compact(&history).await {
        Ok(compacted) => {
            debug!(
                turn_count,
                before = history.len(),
                after = compacted.len(),
                "Compacted agent memory"
            );
            CompactionResult {
                messages: compacted,
                was_compacted: true,
            }
        }
        Err(e) => {
            warn!(turn_count, error = %e, "Memory compaction failed; keeping full history");
            CompactionResult {
                messages: history,
                was_compacted: false,
            }
        }
    }
}

/// Builds the memory row persisted at the end of a turn.
pub fn next_memory(
    previous: &AgentMemory,
    messages: Vec<ConversationMessage>,
    action_type: ActionType,
) -> AgentMemory {
    let mut recent_actions: RecentActions = previous.recent_actions.clone();
    recent_actions.push(action_type);
    AgentMemory {
        message_history: messages,
        turn_count: previous.turn_count + 1,
        recent_actions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticCompactor;
    use notesim_proto::RECENT_ACTIONS_CAPACITY;

    fn history(n: usize) -> Vec<ConversationMessage> {
        (0..n)
            .map(|i| ConversationMessage::user(format!("message {i}")))
            .collect()
    }

    #[test]
    fn test_should_compact_cadence() {
        assert!(!should_compact(0, 10));
        assert!(!should_compact(9, 10));
        assert!(should_compact(10, 10));
        assert!(should_compact(20, 10));
        assert!(!should_compact(5, 0));
    }

    #[tokio::test]
    async fn test_pass_through_off_cadence() {
        let compactor = StaticCompactor::summarizing();
        let result = compact_history(&compactor, history(4), 3, 10).await;
        assert!(!result.was_compacted);
        assert_eq!(result.messages.len(), 4);
        assert_eq!(compactor.calls(), 0);
    }

    #[tokio::test]
    async fn test_turn_zero_never_compacts() {
        let compactor = StaticCompactor::summarizing();
        let result = compact_history(&compactor, history(4), 0, 10).await;
        assert!(!result.was_compacted);
        assert_eq!(compactor.calls(), 0);
    }

    #[tokio::test]
    async fn test_compacts_on_cadence() {
        let compactor = StaticCompactor::summarizing();
        let result = compact_history(&compactor, history(12), 10, 10).await;
        assert!(result.was_compacted);
        assert_eq!(result.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_compactor_failure_keeps_history() {
        let compactor = StaticCompactor::failing();
        let original = history(6);
        let result = compact_history(&compactor, original.clone(), 10, 10).await;
        assert!(!result.was_compacted);
        assert_eq!(result.messages, original);
    }

    #[test]
    fn test_recent_actions_track_last_five_turns() {
        let actions = [
            ActionType::WriteNote,
            ActionType::RateNote,
            ActionType::PassTurn,
            ActionType::RateNote,
            ActionType::RateNote,
            ActionType::WriteNote,
            ActionType::PassTurn,
        ];
        let mut memory = AgentMemory::default();
        for (n, action) in actions.iter().enumerate() {
            memory = next_memory(&memory, history(1), *action);
            let persisted = n + 1;
            assert_eq!(
                memory.recent_actions.len(),
                persisted.min(RECENT_ACTIONS_CAPACITY)
            );
        }

        assert_eq!(memory.turn_count, 7);
        assert_eq!(memory.recent_actions.to_vec(), actions[2..].to_vec());
    }
}
