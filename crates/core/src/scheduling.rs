//! Execution scheduling constants and state machine.
//!
//! This module lives in `core` (zero internal deps) so it can be used by
//! both the orchestrator and any future worker or CLI tooling.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Priority constants
// ---------------------------------------------------------------------------

/// Priority value for urgent executions. Dispatched before all others.
pub const PRIORITY_URGENT: i32 = 10;

/// Priority value for normal executions. Default when the caller omits one.
pub const PRIORITY_NORMAL: i32 = 5;

/// Priority value for background executions. Dispatched last.
pub const PRIORITY_BACKGROUND: i32 = 1;

// ---------------------------------------------------------------------------
// Timeout defaults
// ---------------------------------------------------------------------------

/// Default overall wall-clock budget per execution (5 minutes).
pub const DEFAULT_TIMEOUT_MS: u64 = 300_000;

/// Default per-attempt timeout inside one execution (60 seconds).
pub const DEFAULT_ATTEMPT_TIMEOUT_MS: u64 = 60_000;

// ---------------------------------------------------------------------------
// Execution states
// ---------------------------------------------------------------------------

/// Lifecycle state of one execution.
///
/// `Completed`, `Failed`, `TimedOut`, and `Cancelled` are terminal: no
/// transition leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// Accepted and queued, not yet dispatched.
    Pending,
    /// Dispatched to a runner and currently executing.
    Running,
    /// The runner reported success.
    Completed,
    /// The runner reported failure, or retries were exhausted.
    Failed,
    /// The overall deadline elapsed before the runner finished.
    TimedOut,
    /// Cancelled by an explicit caller request.
    Cancelled,
}

impl ExecutionState {
    /// Whether this state permits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::TimedOut | Self::Cancelled
        )
    }

    /// Stable lowercase name, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

pub mod state_machine {
    use super::ExecutionState::{self, *};
    use crate::error::CoreError;

    /// Returns the set of valid target states reachable from `from`.
    ///
    /// Terminal states return an empty slice because no further
    /// transitions are allowed.
    pub fn valid_transitions(from: ExecutionState) -> &'static [ExecutionState] {
        match from {
            Pending => &[Running, Cancelled],
            Running => &[Completed, Failed, TimedOut, Cancelled],
            Completed | Failed | TimedOut | Cancelled => &[],
        }
    }

    /// Check whether a transition from `from` to `to` is valid.
    pub fn can_transition(from: ExecutionState, to: ExecutionState) -> bool {
        valid_transitions(from).contains(&to)
    }

    /// Validate a state transition, returning an error for invalid ones.
    pub fn validate_transition(from: ExecutionState, to: ExecutionState) -> Result<(), CoreError> {
        if can_transition(from, to) {
            Ok(())
        } else {
            Err(CoreError::Conflict(format!(
                "Invalid transition: {from} -> {to}"
            )))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::state_machine::*;
    use super::ExecutionState::*;

    // -- valid transitions ----------------------------------------------------

    #[test]
    fn pending_to_running() {
        assert!(can_transition(Pending, Running));
    }

    #[test]
    fn pending_to_cancelled() {
        assert!(can_transition(Pending, Cancelled));
    }

    #[test]
    fn running_to_completed() {
        assert!(can_transition(Running, Completed));
    }

    #[test]
    fn running_to_failed() {
        assert!(can_transition(Running, Failed));
    }

    #[test]
    fn running_to_timed_out() {
        assert!(can_transition(Running, TimedOut));
    }

    #[test]
    fn running_to_cancelled() {
        assert!(can_transition(Running, Cancelled));
    }

    // -- invalid transitions --------------------------------------------------

    #[test]
    fn pending_cannot_complete_directly() {
        assert!(!can_transition(Pending, Completed));
    }

    #[test]
    fn running_cannot_return_to_pending() {
        assert!(!can_transition(Running, Pending));
    }

    #[test]
    fn terminal_states_allow_nothing() {
        for terminal in [Completed, Failed, TimedOut, Cancelled] {
            assert!(valid_transitions(terminal).is_empty());
            assert!(!can_transition(terminal, Running));
            assert!(!can_transition(terminal, Cancelled));
        }
    }

    #[test]
    fn validate_reports_invalid_transition() {
        let err = validate_transition(Completed, Cancelled).unwrap_err();
        assert!(err.to_string().contains("completed -> cancelled"));
    }

    // -- terminal predicate ---------------------------------------------------

    #[test]
    fn terminal_predicate_matches_state_machine() {
        for state in [Pending, Running, Completed, Failed, TimedOut, Cancelled] {
            assert_eq!(state.is_terminal(), valid_transitions(state).is_empty());
        }
    }
}
