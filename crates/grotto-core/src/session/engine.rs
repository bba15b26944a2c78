//! Session engine: the table of live sessions and each one's state machine.
//!
//! Two locks guard a session:
//! - `ops`, an async mutex serializing connect, send, close and retry
//! - `outbox`, a short synchronous lock over state, events and raw payload
//!
//! Every state change and every event goes through the outbox, and a
//! terminal transition closes the attempt's channel while holding it. The
//! outbox also owns the attempt's connection and request sender, so entering
//! a terminal state drops both. Cancel only takes the outbox lock, so it never
//! waits behind a pending send or dial.

use super::events::{SessionEvent, SessionEvents};
use super::state::SessionState;
use crate::codec;
use crate::config::SessionConfig;
use crate::schema::{MethodDescriptor, StreamingMode};
use crate::transport::{
    CallFrame, Connection, RpcStatus, Target, Transport, CODE_CANCELLED, CODE_UNAVAILABLE,
};
use crate::workspace::{Header, WorkspaceLease, WorkspaceStore};
use crate::{GrottoError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Everything a session captures at connect time.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub target: Target,
    pub method: MethodDescriptor,
    /// Request metadata sent with every call of the session.
    pub metadata: Vec<Header>,
}

/// Snapshot of a session for listing and inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: u64,
    pub workspace: String,
    pub method: String,
    pub mode: StreamingMode,
    pub state: SessionState,
    pub attempt: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Default)]
struct Ops {
    call_started: bool,
}

struct Outbox {
    attempt: u64,
    state: SessionState,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
    receiver: Option<SessionEvents>,
    cancel: CancellationToken,
    lease: Option<WorkspaceLease>,
    connection: Option<Arc<dyn Connection>>,
    /// Dropping the sender half-closes the call.
    requests: Option<mpsc::Sender<Bytes>>,
    started: Instant,
    raw: String,
    failure: Option<(String, String)>,
}

impl Outbox {
    fn new(lease: WorkspaceLease) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            attempt: 1,
            state: SessionState::Idle,
            events: Some(tx),
            receiver: Some(rx),
            cancel: CancellationToken::new(),
            lease: Some(lease),
            connection: None,
            requests: None,
            started: Instant::now(),
            raw: String::new(),
            failure: None,
        }
    }

    /// Start a new attempt; raw payload is kept.
    fn restart(&mut self, lease: WorkspaceLease) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.attempt += 1;
        self.state = SessionState::Idle;
        self.events = Some(tx);
        self.receiver = Some(rx);
        self.cancel = CancellationToken::new();
        self.lease = Some(lease);
        self.connection = None;
        self.requests = None;
        self.started = Instant::now();
        self.failure = None;
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn transition(&mut self, to: SessionState) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = to;
        self.emit(SessionEvent::StateChanged { state: to });
        true
    }

    /// Enter a terminal state: detail events, the state change, then close
    /// the channel, drop the call and connection, and release the workspace.
    fn finish(
        &mut self,
        to: SessionState,
        detail: Option<SessionEvent>,
        error: Option<&GrottoError>,
    ) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        if let Some(event) = detail {
            self.emit(event);
        }
        if let Some(err) = error {
            self.failure = Some((err.kind().to_string(), err.to_string()));
            self.emit(SessionEvent::error(err));
        }
        self.state = to;
        self.emit(SessionEvent::StateChanged { state: to });
        self.events = None;
        self.requests = None;
        self.connection = None;
        self.lease = None;
        self.cancel.cancel();
        true
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

struct Session {
    id: u64,
    method: MethodDescriptor,
    target: Target,
    metadata: Vec<Header>,
    ops: tokio::sync::Mutex<Ops>,
    outbox: Mutex<Outbox>,
}

impl Session {
    fn outbox(&self) -> MutexGuard<'_, Outbox> {
        self.outbox.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` only if `attempt` is still the current one.
    fn with_attempt<R>(&self, attempt: u64, f: impl FnOnce(&mut Outbox) -> R) -> Option<R> {
        let mut outbox = self.outbox();
        if outbox.attempt != attempt {
            return None;
        }
        Some(f(&mut outbox))
    }

    fn snapshot(&self) -> (u64, SessionState, CancellationToken) {
        let outbox = self.outbox();
        (outbox.attempt, outbox.state, outbox.cancel.clone())
    }

    fn state(&self) -> SessionState {
        self.outbox().state
    }

    fn advance(&self, attempt: u64, to: SessionState) -> bool {
        let moved = self
            .with_attempt(attempt, |o| o.transition(to))
            .unwrap_or(false);
        if moved {
            debug!("Session {} -> {}", self.id, to);
        }
        moved
    }

    fn emit(&self, attempt: u64, event: SessionEvent) {
        self.with_attempt(attempt, |o| o.emit(event));
    }

    fn fail(&self, attempt: u64, err: &GrottoError) {
        let failed = self
            .with_attempt(attempt, |o| o.finish(SessionState::Failed, None, Some(err)))
            .unwrap_or(false);
        if failed {
            warn!("Session {} failed: {}", self.id, err);
        }
    }

    fn complete(&self, attempt: u64, status: RpcStatus) {
        self.with_attempt(attempt, |o| {
            let ended = SessionEvent::Ended {
                code: status.code,
                status: status.name().to_string(),
                message: status.message.clone(),
                duration_ms: o.elapsed_ms(),
            };
            if status.code == CODE_UNAVAILABLE {
                let err = GrottoError::ConnectionError {
                    addr: self.target.addr.clone(),
                    message: status.message.clone(),
                };
                warn!("Session {} lost its connection: {}", self.id, status.message);
                o.finish(SessionState::Failed, Some(ended), Some(&err));
            } else {
                debug!("Session {} ended with {}", self.id, status.name());
                o.finish(SessionState::Completed, Some(ended), None);
            }
        });
    }

    fn info(&self) -> SessionInfo {
        let outbox = self.outbox();
        SessionInfo {
            id: self.id,
            workspace: self.target.workspace.clone(),
            method: self.method.path(),
            mode: self.method.mode,
            state: outbox.state,
            attempt: outbox.attempt,
            error_kind: outbox.failure.as_ref().map(|(kind, _)| kind.clone()),
            error: outbox.failure.as_ref().map(|(_, message)| message.clone()),
        }
    }
}

/// Owns every session and drives their lifecycles.
pub struct SessionEngine {
    transport: Arc<dyn Transport>,
    store: Arc<WorkspaceStore>,
    connect_timeout: Duration,
    retained: usize,
    next_id: AtomicU64,
    sessions: RwLock<HashMap<u64, Arc<Session>>>,
}

impl SessionEngine {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<WorkspaceStore>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            store,
            connect_timeout,
            retained: SessionConfig::RETAINED_SESSIONS,
            next_id: AtomicU64::new(1),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// How many finished sessions stay inspectable before the oldest are
    /// dropped.
    pub fn with_retained_sessions(mut self, retained: usize) -> Self {
        self.retained = retained;
        self
    }

    /// Create a session and dial its target.
    ///
    /// Returns once the channel is open or the attempt has failed; dial
    /// failures are reported through the session's events, not here.
    pub async fn connect(&self, request: ConnectRequest) -> Result<u64> {
        let id = self.open(request)?;
        self.dial(id).await?;
        Ok(id)
    }

    /// Register an `Idle` session without dialing. The id can be cancelled
    /// from here on, so callers publish it before [`Self::dial`].
    pub fn open(&self, request: ConnectRequest) -> Result<u64> {
        let lease = self.store.acquire(&request.target.workspace)?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let session = Arc::new(Session {
            id,
            method: request.method,
            target: request.target,
            metadata: request.metadata,
            ops: tokio::sync::Mutex::new(Ops::default()),
            outbox: Mutex::new(Outbox::new(lease)),
        });
        {
            let mut sessions = self
                .sessions
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            sessions.insert(id, Arc::clone(&session));
            evict_finished(&mut sessions, self.retained);
        }
        info!(
            "Session {} opened for {} on {}",
            id,
            session.method.path(),
            session.target.addr
        );
        Ok(id)
    }

    /// Dial an `Idle` session. Does nothing if it was cancelled first.
    pub async fn dial(&self, id: u64) -> Result<()> {
        let session = self.session(id)?;
        let _ops = session.ops.lock().await;
        let state = session.state();
        if state.is_terminal() {
            debug!("Session {} is {} before dialing", id, state);
            return Ok(());
        }
        if state != SessionState::Idle {
            return Err(GrottoError::invalid_state("dial", state));
        }
        self.establish(&session).await;
        Ok(())
    }

    async fn establish(&self, session: &Session) {
        let (attempt, _, cancel) = session.snapshot();
        if !session.advance(attempt, SessionState::Resolving) {
            return;
        }
        if let Err(err) = session.target.uri() {
            session.fail(attempt, &err);
            return;
        }
        if !session.advance(attempt, SessionState::Connecting) {
            return;
        }

        let dial = tokio::time::timeout(self.connect_timeout, self.transport.connect(&session.target));
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return,
            outcome = dial => outcome,
        };
        match outcome {
            Ok(Ok(connection)) => {
                // A cancel that won the race drops the fresh connection here.
                let opened = session
                    .with_attempt(attempt, |o| {
                        let moved = o.transition(SessionState::Open);
                        if moved {
                            o.connection = Some(connection);
                        }
                        moved
                    })
                    .unwrap_or(false);
                if opened {
                    debug!("Session {} -> {}", session.id, SessionState::Open);
                }
            }
            Ok(Err(err)) => session.fail(attempt, &connection_error(err, &session.target)),
            Err(_) => {
                cancel.cancel();
                session.fail(attempt, &GrottoError::TimeoutError(self.connect_timeout));
            }
        }
    }

    /// Encode `text` against the input shape and hand it to the transport.
    ///
    /// The first send starts the call. Unary and server-streaming sessions
    /// half-close after it.
    pub async fn send(&self, id: u64, text: &str) -> Result<()> {
        let session = self.session(id)?;
        let mut ops = session.ops.lock().await;
        let (attempt, state, cancel) = session.snapshot();
        if state != SessionState::Open {
            return Err(GrottoError::invalid_state("send", state));
        }

        let bytes = codec::encode_json(&session.method.schema, &session.method.input, text)?;
        if !ops.call_started {
            self.start_call(&session, &mut ops, attempt, &cancel).await?;
        }
        let requests = session
            .with_attempt(attempt, |o| o.requests.clone())
            .flatten()
            .ok_or_else(|| GrottoError::invalid_state("send", session.state()))?;

        let sent = tokio::select! {
            _ = cancel.cancelled() => return Err(GrottoError::Cancelled),
            sent = requests.send(bytes) => sent,
        };
        drop(requests);
        if sent.is_err() {
            session.with_attempt(attempt, |o| o.requests = None);
            return Err(GrottoError::invalid_state("send", session.state()));
        }
        session.with_attempt(attempt, |o| o.raw = text.to_string());

        if !session.method.mode.client_streams() {
            session.with_attempt(attempt, |o| o.requests = None);
            session.advance(attempt, SessionState::HalfClosed);
        }
        Ok(())
    }

    /// Half-close a client- or bidi-streaming session.
    pub async fn close_send(&self, id: u64) -> Result<()> {
        let session = self.session(id)?;
        let mut ops = session.ops.lock().await;
        let (attempt, state, cancel) = session.snapshot();
        if !session.method.mode.client_streams() {
            return Err(GrottoError::invalid_state(
                "close_send",
                format!("{} ({})", state, session.method.mode),
            ));
        }
        if state != SessionState::Open {
            return Err(GrottoError::invalid_state("close_send", state));
        }

        if !ops.call_started {
            self.start_call(&session, &mut ops, attempt, &cancel).await?;
        }
        session.with_attempt(attempt, |o| o.requests = None);
        session.advance(attempt, SessionState::HalfClosed);
        Ok(())
    }

    /// Cancel a session. Terminal sessions are left as they are.
    pub fn cancel(&self, id: u64) -> Result<()> {
        let session = self.session(id)?;
        let mut outbox = session.outbox();
        if outbox.state.is_terminal() {
            return Ok(());
        }
        outbox.cancel.cancel();
        let ended = SessionEvent::Ended {
            code: CODE_CANCELLED,
            status: "CANCELLED".to_string(),
            message: "cancelled by client".to_string(),
            duration_ms: outbox.elapsed_ms(),
        };
        outbox.finish(SessionState::Cancelled, Some(ended), None);
        info!("Session {} cancelled", id);
        Ok(())
    }

    /// Re-dial a failed or cancelled session with its captured target and
    /// method. The id and the raw payload are kept.
    pub async fn retry(&self, id: u64) -> Result<()> {
        let session = self.session(id)?;
        let mut ops = session.ops.lock().await;
        let state = session.state();
        if !state.is_retryable() {
            return Err(GrottoError::invalid_state("retry_connection", state));
        }

        let lease = self.store.acquire(&session.target.workspace)?;
        *ops = Ops::default();
        session.outbox().restart(lease);
        info!("Session {} retrying", id);
        self.establish(&session).await;
        Ok(())
    }

    /// Take the current attempt's event receiver. Each attempt's receiver
    /// can be taken once.
    pub fn take_events(&self, id: u64) -> Result<SessionEvents> {
        let session = self.session(id)?;
        let mut outbox = session.outbox();
        outbox
            .receiver
            .take()
            .ok_or_else(|| GrottoError::invalid_state("take_events", "already subscribed"))
    }

    /// Last payload successfully handed to the transport, empty if none.
    pub fn raw_message_state(&self, id: u64) -> Result<String> {
        Ok(self.session(id)?.outbox().raw.clone())
    }

    pub fn state(&self, id: u64) -> Result<SessionState> {
        Ok(self.session(id)?.state())
    }

    pub fn info(&self, id: u64) -> Result<SessionInfo> {
        Ok(self.session(id)?.info())
    }

    /// Every known session, ordered by id.
    pub fn list(&self) -> Vec<SessionInfo> {
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();
        let mut infos: Vec<SessionInfo> = sessions.iter().map(|s| s.info()).collect();
        infos.sort_by_key(|i| i.id);
        infos
    }

    /// Drop a terminal session from the table.
    pub fn remove(&self, id: u64) -> Result<()> {
        let state = self.state(id)?;
        if !state.is_terminal() {
            return Err(GrottoError::invalid_state("remove", state));
        }
        self.sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&id);
        Ok(())
    }

    /// Cancel every non-terminal session.
    pub fn shutdown(&self) {
        let ids: Vec<u64> = self.list().iter().map(|i| i.id).collect();
        let mut cancelled = 0;
        for id in ids {
            if let Ok(state) = self.state(id) {
                if !state.is_terminal() && self.cancel(id).is_ok() {
                    cancelled += 1;
                }
            }
        }
        info!("Session engine shut down, {} session(s) cancelled", cancelled);
    }

    async fn start_call(
        &self,
        session: &Arc<Session>,
        ops: &mut Ops,
        attempt: u64,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(GrottoError::Cancelled);
        }
        let connection = session
            .with_attempt(attempt, |o| o.connection.clone())
            .flatten()
            .ok_or_else(|| GrottoError::invalid_state("start_call", session.state()))?;
        let path = session.method.path();
        let started = tokio::select! {
            _ = cancel.cancelled() => return Err(GrottoError::Cancelled),
            started = connection.start_call(&path, &session.metadata) => started,
        };
        let call = match started {
            Ok(call) => call,
            Err(err) => {
                let err = connection_error(err, &session.target);
                session.fail(attempt, &err);
                return Err(err);
            }
        };

        let requests = call.requests;
        let stored = session
            .with_attempt(attempt, |o| {
                if o.state.is_terminal() {
                    return false;
                }
                o.requests = Some(requests);
                true
            })
            .unwrap_or(false);
        if !stored {
            return Err(GrottoError::Cancelled);
        }

        ops.call_started = true;
        debug!("Session {} started call {}", session.id, path);
        tokio::spawn(pump(
            Arc::clone(session),
            call.responses,
            attempt,
            cancel.clone(),
        ));
        Ok(())
    }

    fn session(&self, id: u64) -> Result<Arc<Session>> {
        self.sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&id)
            .cloned()
            .ok_or(GrottoError::SessionNotFound { id })
    }
}

/// Forward response frames to the session until the call ends.
async fn pump(
    session: Arc<Session>,
    mut responses: mpsc::Receiver<CallFrame>,
    attempt: u64,
    cancel: CancellationToken,
) {
    let schema = Arc::clone(&session.method.schema);
    let output = Arc::clone(&session.method.output);
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return,
            frame = responses.recv() => frame,
        };
        let Some(frame) = frame else {
            let err = GrottoError::ConnectionError {
                addr: session.target.addr.clone(),
                message: "call ended without a status".to_string(),
            };
            session.fail(attempt, &err);
            return;
        };
        match frame {
            CallFrame::Headers(metadata) => {
                session.emit(attempt, SessionEvent::Headers { metadata })
            }
            CallFrame::Message(bytes) => {
                let event = match codec::decode_to_text(&schema, &output, &bytes) {
                    Ok(payload) => SessionEvent::Message { payload },
                    Err(err) => SessionEvent::error(&err),
                };
                session.emit(attempt, event);
            }
            CallFrame::Trailers(metadata) => {
                session.emit(attempt, SessionEvent::Trailers { metadata })
            }
            CallFrame::Status(status) => {
                session.complete(attempt, status);
                return;
            }
        }
    }
}

/// Attribute untyped transport failures to the target. Typed errors such as
/// a rejected header or a bad method path keep their kind.
fn connection_error(err: GrottoError, target: &Target) -> GrottoError {
    match err {
        GrottoError::Io { .. } | GrottoError::Other(_) => GrottoError::ConnectionError {
            addr: target.addr.clone(),
            message: err.to_string(),
        },
        other => other,
    }
}

/// Drop the oldest terminal sessions beyond `keep`.
fn evict_finished(sessions: &mut HashMap<u64, Arc<Session>>, keep: usize) {
    let mut finished: Vec<u64> = sessions
        .values()
        .filter(|s| s.state().is_terminal())
        .map(|s| s.id)
        .collect();
    if finished.len() <= keep {
        return;
    }
    finished.sort_unstable();
    let excess = finished.len() - keep;
    for id in &finished[..excess] {
        sessions.remove(id);
    }
    debug!("Evicted {} finished session(s)", excess);
}
