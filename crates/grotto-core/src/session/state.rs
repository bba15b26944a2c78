use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a session attempt.
///
/// `Idle → Resolving → Connecting → Open → HalfClosed` followed by exactly
/// one of the terminal states. A retry starts a new attempt from `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Resolving,
    Connecting,
    Open,
    HalfClosed,
    Completed,
    Cancelled,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Cancelled | SessionState::Failed
        )
    }

    pub fn is_retryable(self) -> bool {
        matches!(self, SessionState::Failed | SessionState::Cancelled)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "Idle",
            SessionState::Resolving => "Resolving",
            SessionState::Connecting => "Connecting",
            SessionState::Open => "Open",
            SessionState::HalfClosed => "HalfClosed",
            SessionState::Completed => "Completed",
            SessionState::Cancelled => "Cancelled",
            SessionState::Failed => "Failed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_and_retryable() {
        assert!(SessionState::Completed.is_terminal());
        assert!(!SessionState::HalfClosed.is_terminal());
        assert!(SessionState::Cancelled.is_retryable());
        assert!(!SessionState::Completed.is_retryable());
        assert_eq!(
            serde_json::to_string(&SessionState::HalfClosed).unwrap(),
            "\"HalfClosed\""
        );
    }
}
