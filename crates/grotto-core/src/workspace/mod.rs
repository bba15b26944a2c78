//! Named connection configurations and their saved commands.

mod store;
mod types;

pub use store::{WorkspaceLease, WorkspaceStore};
pub use types::{non_empty_headers, Command, Header, SchemaSource, Workspace, WorkspaceOptions};
