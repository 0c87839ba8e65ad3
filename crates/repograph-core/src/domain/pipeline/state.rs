//! Pass state machine
//!
//! `Idle -> Diffing -> Extracting -> Embedding -> Merging -> Committing -> Idle`,
//! with `Failed` reachable from every non-idle state. A pass that finds
//! nothing to do returns from `Diffing` straight to `Idle`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassState {
    Idle,
    Diffing,
    Extracting,
    Embedding,
    Merging,
    /// The only state allowed to write the store
    Committing,
    Failed,
}

impl PassState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Diffing => "diffing",
            Self::Extracting => "extracting",
            Self::Embedding => "embedding",
            Self::Merging => "merging",
            Self::Committing => "committing",
            Self::Failed => "failed",
        }
    }

    pub fn can_transition_to(&self, next: PassState) -> bool {
        use PassState::*;
        matches!(
            (self, next),
            (Idle, Diffing)
                | (Diffing, Extracting)
                | (Diffing, Idle)
                | (Extracting, Embedding)
                | (Embedding, Merging)
                | (Merging, Committing)
                | (Committing, Idle)
                | (Diffing | Extracting | Embedding | Merging | Committing, Failed)
        )
    }

    /// Validated transition
    pub fn transition(self, next: PassState) -> Result<PassState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(Error::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Idle | Self::Failed)
    }
}

impl fmt::Display for PassState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_pass_sequence() {
        let mut state = PassState::Idle;
        for next in [
            PassState::Diffing,
            PassState::Extracting,
            PassState::Embedding,
            PassState::Merging,
            PassState::Committing,
            PassState::Idle,
        ] {
            state = state.transition(next).unwrap();
        }
        assert_eq!(state, PassState::Idle);
    }

    #[test]
    fn test_no_skipping_phases() {
        assert!(PassState::Diffing.transition(PassState::Merging).is_err());
        assert!(PassState::Extracting.transition(PassState::Committing).is_err());
        assert!(PassState::Committing.transition(PassState::Diffing).is_err());
    }

    #[test]
    fn test_failed_reachable_from_active_states_only() {
        for state in [
            PassState::Diffing,
            PassState::Extracting,
            PassState::Embedding,
            PassState::Merging,
            PassState::Committing,
        ] {
            assert!(state.can_transition_to(PassState::Failed), "{state}");
        }
        assert!(!PassState::Idle.can_transition_to(PassState::Failed));
        assert!(!PassState::Failed.can_transition_to(PassState::Idle));
    }

    #[test]
    fn test_invalid_transition_error() {
        let err = PassState::Idle.transition(PassState::Committing).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition { ref from, ref to } if from == "idle" && to == "committing"
        ));
    }
}
