//! Grotto Core - headless engine for interactive RPC sessions.
//!
//! The crate resolves service and method schemas (local `.proto` files or
//! server reflection), keeps named connection configurations ("workspaces")
//! with their saved commands, and drives unary and streaming calls through
//! connect, send, half-close, cancel and retry. It has no UI; `grotto-rpc`
//! exposes the same surface over JSON-RPC.
//!
//! # Example
//!
//! ```rust,ignore
//! use grotto_core::{ConnectParams, GrottoApi, WorkspaceOptions};
//!
//! #[tokio::main]
//! async fn main() -> grotto_core::Result<()> {
//!     let api = GrottoApi::builder("/tmp/grotto").auto_create_dirs(true).build().await?;
//!
//!     api.create_workspace(WorkspaceOptions::new("staging", "localhost:50051")).await?;
//!     api.select_workspace("staging").await?;
//!
//!     let id = api
//!         .connect(ConnectParams::new("/helloworld.Greeter/SayHello").with_payload(r#"{"name":"world"}"#))
//!         .await?;
//!     let mut events = api.take_events(id)?;
//!     while let Some(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod command_codec;
pub mod config;
pub mod error;
pub mod persist;
pub mod schema;
pub mod session;
pub mod transport;
pub mod workspace;

mod api;

// Re-export commonly used types
pub use api::{
    ConnectParams, ExportParams, GrottoApiBuilder, ImportParams, MethodInput, SelectMethodParams,
    SendParams, WindowInfo,
};
pub use command_codec::CommandFormat;
pub use config::EngineConfig;
pub use error::{GrottoError, Result};
pub use schema::{Catalogue, MethodDescriptor, MethodRef, SchemaResolver, StreamingMode};
pub use session::{SessionEngine, SessionEvent, SessionEvents, SessionInfo, SessionState};
pub use transport::{GrpcReflectionClient, GrpcTransport, ReflectionClient, Target, Transport};
pub use workspace::{Command, Header, SchemaSource, WorkspaceOptions, WorkspaceStore};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use api::EngineState;

/// Main entry point for the session engine.
///
/// Every operation of the shell surface is an async method here.
/// Operations taking an optional session id act on the *current session*
/// (the most recently connected one) when it is omitted; operations taking
/// an optional workspace name act on the active workspace.
pub struct GrottoApi {
    data_dir: PathBuf,
    state: Arc<EngineState>,
}

impl GrottoApi {
    /// Create a builder for the given data directory.
    pub fn builder(data_dir: impl Into<PathBuf>) -> GrottoApiBuilder {
        GrottoApiBuilder::new(data_dir)
    }

    /// Open an engine with default transport and settings. The data
    /// directory is created if missing.
    pub async fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        GrottoApiBuilder::new(data_dir)
            .auto_create_dirs(true)
            .build()
            .await
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config(&self) -> &EngineConfig {
        &self.state.config
    }

    fn state(&self) -> &EngineState {
        &self.state
    }
}
