//! Events delivered to a session's consumer.

use super::state::SessionState;
use crate::workspace::Header;
use crate::GrottoError;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged {
        state: SessionState,
    },
    Headers {
        metadata: Vec<Header>,
    },
    /// A response message rendered as JSON text.
    Message {
        payload: String,
    },
    Trailers {
        metadata: Vec<Header>,
    },
    /// The server reported a final status.
    Ended {
        code: i32,
        status: String,
        message: String,
        duration_ms: u64,
    },
    Error {
        kind: String,
        message: String,
    },
}

impl SessionEvent {
    pub fn error(err: &GrottoError) -> Self {
        SessionEvent::Error {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }

    /// `true` for the state change that closes an attempt's channel.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionEvent::StateChanged { state } if state.is_terminal())
    }
}

/// Receiving half of one attempt's event channel. Yields `None` once the
/// attempt has reached a terminal state and every event was read.
pub type SessionEvents = mpsc::UnboundedReceiver<SessionEvent>;
