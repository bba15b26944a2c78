//! API implementation submodules.
//!
//! Each submodule contains `impl GrottoApi` blocks for one concern. The
//! struct itself lives in `lib.rs`.

mod builder;
mod commands;
mod schema;
mod sessions;
mod state;
mod system;
mod workspaces;

pub use builder::GrottoApiBuilder;
pub use commands::{ExportParams, ImportParams};
pub use schema::{MethodInput, SelectMethodParams};
pub use sessions::{ConnectParams, SendParams};
pub(crate) use state::EngineState;
pub use system::WindowInfo;
