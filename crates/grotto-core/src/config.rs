//! Centralized configuration for the Grotto session engine.
//!
//! Compile-time defaults live on the `*Config` unit structs; the runtime
//! knobs a host can change are collected in [`EngineConfig`].

use std::path::PathBuf;
use std::time::Duration;

/// Application-level configuration.
pub struct AppConfig;

impl AppConfig {
    pub const APP_NAME: &'static str = "Grotto";
    pub const DATA_DIR_NAME: &'static str = "grotto";
    pub const USER_AGENT: &'static str = concat!("grotto/", env!("CARGO_PKG_VERSION"));
}

/// Session and transport timing.
pub struct SessionConfig;

impl SessionConfig {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    /// Capacity of the outbound request queue between `send` and the transport.
    pub const OUTBOUND_QUEUE: usize = 16;
    /// Capacity of the inbound frame queue between the transport and the engine.
    pub const INBOUND_QUEUE: usize = 64;
    /// Finished sessions kept for inspection and retry before the oldest go.
    pub const RETAINED_SESSIONS: usize = 256;
}

/// Schema discovery and descriptor caching.
pub struct SchemaConfig;

impl SchemaConfig {
    pub const PROTO_EXTENSION: &'static str = "proto";
    pub const DESCRIPTOR_CACHE_CAPACITY: u64 = 1024;
    pub const DESCRIPTOR_CACHE_TTL: Duration = Duration::from_secs(3600);
    /// Maximum nesting depth when rendering a message input view.
    pub const MAX_VIEW_DEPTH: usize = 32;
}

/// Directory and file names under the data directory.
pub struct PathsConfig;

impl PathsConfig {
    pub const WORKSPACES_DIR_NAME: &'static str = "workspaces";
    pub const STATE_FILE_NAME: &'static str = "state.json";
}

/// Runtime configuration for a [`crate::GrottoApi`] instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root directory for persisted workspaces and state.
    pub data_dir: PathBuf,
    /// Directories scanned for `*.proto` files by `find_proto_files`.
    pub search_roots: Vec<PathBuf>,
    /// Deadline for channel establishment (including the TLS handshake).
    pub connect_timeout: Duration,
    /// Finished sessions kept in the session table.
    pub retained_sessions: usize,
    pub descriptor_cache_capacity: u64,
    pub descriptor_cache_ttl: Duration,
}

impl EngineConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            search_roots: Vec::new(),
            connect_timeout: SessionConfig::CONNECT_TIMEOUT,
            retained_sessions: SessionConfig::RETAINED_SESSIONS,
            descriptor_cache_capacity: SchemaConfig::DESCRIPTOR_CACHE_CAPACITY,
            descriptor_cache_ttl: SchemaConfig::DESCRIPTOR_CACHE_TTL,
        }
    }

    /// Platform default data directory (`$XDG_DATA_HOME/grotto` and friends).
    pub fn default_data_dir() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join(AppConfig::DATA_DIR_NAME))
    }

    pub fn workspaces_dir(&self) -> PathBuf {
        self.data_dir.join(PathsConfig::WORKSPACES_DIR_NAME)
    }

    pub fn state_file(&self) -> PathBuf {
        self.data_dir.join(PathsConfig::STATE_FILE_NAME)
    }
}
