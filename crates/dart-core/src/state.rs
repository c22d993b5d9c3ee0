//! Mission state machine

use crate::error::StateMachineError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a mission currently is in its loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MissionState {
    /// Alert ingested
    Init,
    /// Long-term memory lookup (attempt 1 only)
    Recall,
    /// Investigator and vendor probe running
    Investigate,
    /// Choosing a branch from the joined evidence
    Decide,
    /// Drafting a remediation
    Plan,
    /// Waiting on the safety verdict
    SafetyReview,
    /// Applying the plan (or vendor DR)
    Execute,
    /// Checking the post-condition
    Verify,
    /// Mission resolved
    Success,
    /// Mission gave up
    Abort,
}

impl MissionState {
    /// Every state, in loop order
    pub const ALL: [MissionState; 10] = [
        MissionState::Init,
        MissionState::Recall,
        MissionState::Investigate,
        MissionState::Decide,
        MissionState::Plan,
        MissionState::SafetyReview,
        MissionState::Execute,
        MissionState::Verify,
        MissionState::Success,
        MissionState::Abort,
    ];

    /// Check for a terminal state
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Abort)
    }
}

impl fmt::Display for MissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Init => "INIT",
            Self::Recall => "RECALL",
            Self::Investigate => "INVESTIGATE",
            Self::Decide => "DECIDE",
            Self::Plan => "PLAN",
            Self::SafetyReview => "SAFETY_REVIEW",
            Self::Execute => "EXECUTE",
            Self::Verify => "VERIFY",
            Self::Success => "SUCCESS",
            Self::Abort => "ABORT",
        };
        f.write_str(s)
    }
}

/// Validates a state transition.
pub fn validate_transition(from: MissionState, to: MissionState) -> Result<(), StateMachineError> {
    if allowed(from, to) {
        Ok(())
    } else {
        Err(StateMachineError::IllegalTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// States reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: MissionState) -> Vec<MissionState> {
    use MissionState::*;
    match from {
        Init => vec![Recall, Investigate],
        Recall => vec![Investigate],
        Investigate => vec![Decide],
        // DR on the final attempt jumps straight to Execute
        Decide => vec![Plan, Execute, Success, Investigate, Abort],
        Plan => vec![SafetyReview, Investigate, Abort],
        SafetyReview => vec![Execute, Investigate, Abort],
        Execute => vec![Verify, Investigate, Abort],
        Verify => vec![Success, Investigate, Abort],
        Success => vec![],
        Abort => vec![],
    }
}

fn allowed(from: MissionState, to: MissionState) -> bool {
    allowed_transitions(from).into_iter().any(|s| s == to)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_sinks() {
        for state in MissionState::ALL {
            assert!(validate_transition(MissionState::Success, state).is_err());
            assert!(validate_transition(MissionState::Abort, state).is_err());
        }
    }

    #[test]
    fn execution_needs_review_or_dr() {
        assert!(validate_transition(MissionState::Plan, MissionState::Execute).is_err());
        assert!(validate_transition(MissionState::SafetyReview, MissionState::Execute).is_ok());
        assert!(validate_transition(MissionState::Decide, MissionState::Execute).is_ok());
    }

    #[test]
    fn illegal_transition_names_states() {
        let err = validate_transition(MissionState::Init, MissionState::Success).unwrap_err();
        assert_eq!(err.to_string(), "illegal mission transition INIT -> SUCCESS");
    }
}
