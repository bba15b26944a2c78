//! Session methods on GrottoApi.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::codec;
use crate::error::{GrottoError, Result};
use crate::schema::MethodRef;
use crate::session::{ConnectRequest, SessionEvents, SessionInfo, SessionState};
use crate::transport::Target;
use crate::workspace::{non_empty_headers, Header};
use crate::GrottoApi;

/// Parameters of [`GrottoApi::connect`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectParams {
    /// Workspace to connect with; the active one when absent.
    #[serde(default)]
    pub workspace: Option<String>,
    /// Method reference, e.g. `/helloworld.Greeter/SayHello`.
    pub method: String,
    /// Sent as the first message once the channel is open.
    #[serde(default)]
    pub payload: Option<String>,
    /// Overrides and persists the workspace's TLS flag.
    #[serde(default)]
    pub use_tls: Option<bool>,
    /// Added after the workspace's default metadata.
    #[serde(default)]
    pub metadata: Vec<Header>,
}

impl ConnectParams {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            ..Default::default()
        }
    }

    pub fn with_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = Some(use_tls);
        self
    }
}

/// Parameters of [`GrottoApi::send`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendParams {
    #[serde(default)]
    pub session: Option<u64>,
    /// When given, must name the session's method.
    #[serde(default)]
    pub method: Option<String>,
    pub payload: String,
}

impl GrottoApi {
    // ========================================
    // Session lifecycle
    // ========================================

    /// Resolve the method, open a session and, when a payload is given,
    /// send it once the channel is open.
    ///
    /// Schema and workspace problems fail here; transport problems move the
    /// session to `Failed` and show up in its events.
    pub async fn connect(&self, params: ConnectParams) -> Result<u64> {
        let state = self.state();
        let mut options = state.workspace(params.workspace.as_deref())?;

        if let Some(use_tls) = params.use_tls {
            if use_tls != options.use_tls {
                options.use_tls = use_tls;
                state.store.update_options(&options.name.clone(), options.clone())?;
            }
        }

        let method_ref = MethodRef::parse(&params.method)?;
        let method = state
            .resolver
            .resolve_method(&options, &method_ref.service, &method_ref.method)
            .await?;

        let first = params.payload.filter(|p| !p.trim().is_empty());
        if let Some(payload) = &first {
            codec::encode_json(&method.schema, &method.input, payload)?;
        }

        let mut metadata = non_empty_headers(&options.metadata);
        metadata.extend(non_empty_headers(&params.metadata));

        // Current before dialing, so a bare cancel reaches a hanging connect.
        let id = state.engine.open(ConnectRequest {
            target: Target::from_options(&options),
            method,
            metadata,
        })?;
        state.set_current_session(id);
        state.engine.dial(id).await?;

        if let Some(payload) = first {
            if state.engine.state(id)? == SessionState::Open {
                if let Err(e) = self.send_to(id, &payload).await {
                    warn!("Initial send on session {} failed: {}", id, e);
                }
            }
        }
        Ok(id)
    }

    /// Send one message on a session.
    pub async fn send(&self, params: SendParams) -> Result<()> {
        let id = self.state().session_id(params.session)?;
        if let Some(method) = &params.method {
            let expected = self.state().engine.info(id)?.method;
            if MethodRef::parse(method)?.path() != expected {
                return Err(GrottoError::InvalidParams {
                    message: format!("session {} is bound to {}, not {}", id, expected, method),
                });
            }
        }
        self.send_to(id, &params.payload).await
    }

    async fn send_to(&self, id: u64, payload: &str) -> Result<()> {
        let state = self.state();
        state.engine.send(id, payload).await?;

        let info = state.engine.info(id)?;
        if let Err(e) = state
            .store
            .save_last_message(&info.workspace, &info.method, payload)
        {
            error!("Failed to remember payload for {}: {}", info.method, e);
        }
        Ok(())
    }

    pub async fn close_send(&self, session: Option<u64>) -> Result<()> {
        let id = self.state().session_id(session)?;
        self.state().engine.close_send(id).await
    }

    pub async fn cancel(&self, session: Option<u64>) -> Result<()> {
        let id = self.state().session_id(session)?;
        self.state().engine.cancel(id)
    }

    pub async fn retry_connection(&self, session: Option<u64>) -> Result<()> {
        let id = self.state().session_id(session)?;
        self.state().engine.retry(id).await
    }

    pub async fn get_raw_message_state(&self, session: Option<u64>) -> Result<String> {
        let id = self.state().session_id(session)?;
        self.state().engine.raw_message_state(id)
    }

    // ========================================
    // Inspection
    // ========================================

    /// Event receiver of the session's current attempt.
    pub fn take_events(&self, session: u64) -> Result<SessionEvents> {
        self.state().engine.take_events(session)
    }

    pub fn session_info(&self, session: Option<u64>) -> Result<SessionInfo> {
        let id = self.state().session_id(session)?;
        self.state().engine.info(id)
    }

    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        self.state().engine.list()
    }

    /// Forget a finished session.
    pub fn remove_session(&self, session: u64) -> Result<()> {
        self.state().engine.remove(session)?;
        if let Ok(mut current) = self.state().current_session.lock() {
            if *current == Some(session) {
                *current = None;
            }
        }
        debug!("Removed session {}", session);
        Ok(())
    }
}
