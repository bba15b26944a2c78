//! Concurrent RPC sessions.

mod engine;
mod events;
mod state;

pub use engine::{ConnectRequest, SessionEngine, SessionInfo};
pub use events::{SessionEvent, SessionEvents};
pub use state::SessionState;
