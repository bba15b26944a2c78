//! Builder for configuring GrottoApi initialization.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::api::EngineState;
use crate::config::{AppConfig, EngineConfig};
use crate::error::{GrottoError, Result};
use crate::schema::SchemaResolver;
use crate::session::SessionEngine;
use crate::transport::{GrpcReflectionClient, GrpcTransport, ReflectionClient, Transport};
use crate::workspace::WorkspaceStore;
use crate::GrottoApi;

/// Builder for configuring GrottoApi initialization.
///
/// # Example
///
/// ```rust,ignore
/// use grotto_core::GrottoApi;
///
/// let api = GrottoApi::builder("./grotto-data")
///     .auto_create_dirs(true)
///     .with_search_roots(vec!["./protos".into()])
///     .build()
///     .await?;
/// ```
pub struct GrottoApiBuilder {
    config: EngineConfig,
    auto_create_dirs: bool,
    transport: Option<Arc<dyn Transport>>,
    reflection: Option<Arc<dyn ReflectionClient>>,
}

impl GrottoApiBuilder {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            config: EngineConfig::new(data_dir),
            auto_create_dirs: false,
            transport: None,
            reflection: None,
        }
    }

    /// Create the data directory and its `workspaces/` folder if missing.
    ///
    /// Default: `false` (the data directory must exist)
    pub fn auto_create_dirs(mut self, enable: bool) -> Self {
        self.auto_create_dirs = enable;
        self
    }

    /// Directories scanned for `.proto` files.
    pub fn with_search_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.config.search_roots = roots;
        self
    }

    /// Deadline for establishing a channel, TLS handshake included.
    ///
    /// Default: 10 seconds
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn with_retained_sessions(mut self, retained: usize) -> Self {
        self.config.retained_sessions = retained;
        self
    }

    pub fn with_descriptor_cache(mut self, capacity: u64, ttl: Duration) -> Self {
        self.config.descriptor_cache_capacity = capacity;
        self.config.descriptor_cache_ttl = ttl;
        self
    }

    /// Replace the gRPC transport (tests use in-memory transports).
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replace the server reflection client.
    pub fn with_reflection(mut self, reflection: Arc<dyn ReflectionClient>) -> Self {
        self.reflection = Some(reflection);
        self
    }

    fn create_directory_structure(config: &EngineConfig) -> Result<()> {
        for dir in [config.data_dir.clone(), config.workspaces_dir()] {
            if !dir.exists() {
                std::fs::create_dir_all(&dir).map_err(|e| GrottoError::Io {
                    message: format!("Failed to create directory: {}", dir.display()),
                    path: Some(dir.clone()),
                    source: Some(e),
                })?;
            }
        }
        Ok(())
    }

    pub async fn build(self) -> Result<GrottoApi> {
        let config = self.config;
        if self.auto_create_dirs {
            Self::create_directory_structure(&config)?;
        } else if !config.data_dir.exists() {
            return Err(GrottoError::Config {
                message: format!("Data directory does not exist: {}", config.data_dir.display()),
            });
        }

        let store = Arc::new(WorkspaceStore::open(
            config.workspaces_dir(),
            config.state_file(),
        )?);

        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(GrpcTransport::new(config.connect_timeout)));
        let reflection = self.reflection.unwrap_or_else(|| {
            Arc::new(GrpcReflectionClient::new(GrpcTransport::new(
                config.connect_timeout,
            )))
        });

        let resolver = SchemaResolver::new(
            config.search_roots.clone(),
            reflection,
            config.descriptor_cache_capacity,
            config.descriptor_cache_ttl,
        );
        let engine = SessionEngine::new(transport, Arc::clone(&store), config.connect_timeout)
            .with_retained_sessions(config.retained_sessions);

        tracing::info!(
            "{} engine ready (data: {}, {} search root(s))",
            AppConfig::APP_NAME,
            config.data_dir.display(),
            config.search_roots.len()
        );

        Ok(GrottoApi {
            data_dir: config.data_dir.clone(),
            state: Arc::new(EngineState {
                config,
                store,
                resolver,
                engine,
                current_session: Mutex::new(None),
            }),
        })
    }
}
