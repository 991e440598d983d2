use std::fmt;
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, warn};

/// Lifecycle of the active conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversationState {
    Idle,
    Streaming,
    Error,
    Cancelling,
}

impl ConversationState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Streaming => "streaming",
            Self::Error => "error",
            Self::Cancelling => "cancelling",
        }
    }

    /// Edges of the lifecycle table. Self-transitions count as expected.
    #[must_use]
    pub fn is_expected_transition(self, next: Self) -> bool {
        use ConversationState::{Cancelling, Error, Idle, Streaming};

        self == next
            || matches!(
                (self, next),
                (Idle, Streaming)
                    | (Streaming, Idle)
                    | (Streaming, Error)
                    | (Streaming, Cancelling)
                    | (Cancelling, Idle)
                    | (Error, Idle)
            )
    }
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single-writer state machine over [`ConversationState`].
///
/// Every operation holds the mutex only for its read/compare/write and never
/// across an await. Transitions outside the lifecycle table are still applied
/// but logged at `warn`.
#[derive(Debug)]
pub struct StateManager {
    state: Mutex<ConversationState>,
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StateManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ConversationState::Idle),
        }
    }

    #[must_use]
    pub fn get_state(&self) -> ConversationState {
        *self.lock_state()
    }

    /// Unconditional transition. Returns the new state.
    pub fn transition_to(&self, next: ConversationState) -> ConversationState {
        let previous = {
            let mut state = self.lock_state();
            let previous = *state;
            *state = next;
            previous
        };
        log_transition(previous, next);
        next
    }

    /// Compare-and-swap: moves to `next` only when the current state is `expected`.
    ///
    /// This is the only safe way to start a send, since it closes the gap between
    /// "is the conversation idle" and "mark it streaming".
    pub fn transition_if(&self, expected: ConversationState, next: ConversationState) -> bool {
        {
            let mut state = self.lock_state();
            if *state != expected {
                return false;
            }
            *state = next;
        }
        log_transition(expected, next);
        true
    }

    #[must_use]
    pub fn can_send(&self) -> bool {
        self.get_state() == ConversationState::Idle
    }

    fn lock_state(&self) -> MutexGuard<'_, ConversationState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn log_transition(previous: ConversationState, next: ConversationState) {
    if previous.is_expected_transition(next) {
        debug!(event = "state.transition", from = %previous, to = %next);
    } else {
        warn!(
            event = "state.transition.unexpected",
            from = %previous,
            to = %next,
            "conversation state moved along an edge outside the lifecycle table"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_idle_and_allows_send() {
        let manager = StateManager::new();
        assert_eq!(manager.get_state(), ConversationState::Idle);
        assert!(manager.can_send());
    }

    #[test]
    fn transition_if_only_moves_from_expected_state() {
        let manager = StateManager::new();
        assert!(manager.transition_if(ConversationState::Idle, ConversationState::Streaming));
        assert!(!manager.transition_if(ConversationState::Idle, ConversationState::Streaming));
        assert_eq!(manager.get_state(), ConversationState::Streaming);
        assert!(!manager.can_send());
    }

    #[test]
    fn unexpected_edges_are_still_applied() {
        let manager = StateManager::new();
        assert!(!ConversationState::Idle.is_expected_transition(ConversationState::Cancelling));

        let state = manager.transition_to(ConversationState::Cancelling);

        assert_eq!(state, ConversationState::Cancelling);
        assert_eq!(manager.get_state(), ConversationState::Cancelling);
    }

    #[test]
    fn lifecycle_table_matches_documented_edges() {
        use ConversationState::*;

        assert!(Idle.is_expected_transition(Streaming));
        assert!(Streaming.is_expected_transition(Cancelling));
        assert!(Cancelling.is_expected_transition(Idle));
        assert!(Error.is_expected_transition(Idle));
        assert!(!Error.is_expected_transition(Streaming));
        assert!(!Cancelling.is_expected_transition(Streaming));
    }
}
