//! Per-service run state.

use serde::{Deserialize, Serialize};

/// Run state of one service during a deployment.
///
/// Transitions only move forward. `Ready -> Stopped` is an intentional
/// teardown, `Failed -> Starting` a retry, and `Pending -> Stopped` marks a
/// service the run decided it does not need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// Not yet started (or never will be because a dependency failed)
    Pending,

    /// Start issued, waiting for readiness
    Starting,

    /// Readiness confirmed
    Ready,

    /// Start or readiness failed
    Failed,

    /// Intentionally stopped
    Stopped,
}

impl RunState {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Pending, Starting)
                | (Starting, Ready)
                | (Starting, Failed)
                | (Failed, Starting)
                | (Ready, Stopped)
                | (Pending, Stopped)
        )
    }

    /// Whether the state is a terminal outcome of a run.
    pub fn is_settled(self) -> bool {
        matches!(self, RunState::Ready | RunState::Failed | RunState::Stopped)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Starting => write!(f, "starting"),
            Self::Ready => write!(f, "ready"),
            Self::Failed => write!(f, "failed"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        assert!(RunState::Pending.can_transition_to(RunState::Starting));
        assert!(RunState::Starting.can_transition_to(RunState::Ready));
        assert!(RunState::Starting.can_transition_to(RunState::Failed));
    }

    #[test]
    fn test_exceptional_transitions() {
        assert!(RunState::Failed.can_transition_to(RunState::Starting));
        assert!(RunState::Ready.can_transition_to(RunState::Stopped));
        assert!(RunState::Pending.can_transition_to(RunState::Stopped));
    }

    #[test]
    fn test_backward_transitions_rejected() {
        assert!(!RunState::Ready.can_transition_to(RunState::Starting));
        assert!(!RunState::Ready.can_transition_to(RunState::Pending));
        assert!(!RunState::Stopped.can_transition_to(RunState::Starting));
        assert!(!RunState::Pending.can_transition_to(RunState::Ready));
        assert!(!RunState::Failed.can_transition_to(RunState::Ready));
    }
}
