//! Shared fixtures: an in-memory transport and a Greeter schema on disk.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use grotto_core::transport::{Call, CallFrame, Connection, RpcStatus, CODE_UNAVAILABLE};
use grotto_core::{
    GrottoApi, GrottoError, Header, ReflectionClient, Result, SchemaSource, SessionEvent,
    SessionEvents, SessionState, Target, Transport, WorkspaceOptions,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

pub const GREETER_PROTO: &str = r#"
syntax = "proto3";

package helloworld;

service Greeter {
  rpc SayHello (HelloRequest) returns (HelloReply);
  rpc Chat (stream HelloRequest) returns (stream HelloReply);
  rpc Collect (stream HelloRequest) returns (HelloReply);
  rpc Countdown (HelloRequest) returns (stream HelloReply);
}

message HelloRequest {
  string name = 1;
  int32 times = 2;
}

message HelloReply {
  string message = 1;
}
"#;

pub const SAY_HELLO: &str = "/helloworld.Greeter/SayHello";
pub const CHAT: &str = "/helloworld.Greeter/Chat";
pub const COLLECT: &str = "/helloworld.Greeter/Collect";
pub const COUNTDOWN: &str = "/helloworld.Greeter/Countdown";

/// How the scripted server behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    /// Echo each request; `OK` once the client half-closes.
    Echo,
    /// Dial fails outright.
    Refuse,
    /// Dial never completes.
    Hang,
    /// Accept the call, then report `UNAVAILABLE` after the first request.
    DropAfterFirst,
    /// First dial behaves like `Echo`; every later dial hangs.
    HangAfterFirst,
    /// Answer each request this many times.
    Repeat(usize),
}

pub struct ScriptedTransport {
    script: Script,
    pub dials: AtomicUsize,
    /// Every target dialed, in order.
    pub targets: Mutex<Vec<Target>>,
    connections: Mutex<Vec<Weak<ScriptedConnection>>>,
}

impl ScriptedTransport {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            dials: AtomicUsize::new(0),
            targets: Mutex::new(Vec::new()),
            connections: Mutex::new(Vec::new()),
        })
    }

    /// Connections handed out that somebody still holds.
    pub fn live_connections(&self) -> usize {
        self.connections
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.strong_count() > 0)
            .count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&self, target: &Target) -> Result<Arc<dyn Connection>> {
        let earlier = self.dials.fetch_add(1, Ordering::SeqCst);
        self.targets.lock().unwrap().push(target.clone());
        let replies = match self.script {
            Script::Refuse => {
                return Err(GrottoError::ConnectionError {
                    addr: target.addr.clone(),
                    message: "connection refused".into(),
                })
            }
            Script::Hang => futures::future::pending().await,
            Script::HangAfterFirst if earlier > 0 => futures::future::pending().await,
            Script::Repeat(n) => n,
            _ => 1,
        };
        let connection = Arc::new(ScriptedConnection {
            drop_after_first: self.script == Script::DropAfterFirst,
            replies,
        });
        self.connections
            .lock()
            .unwrap()
            .push(Arc::downgrade(&connection));
        Ok(connection)
    }
}

struct ScriptedConnection {
    drop_after_first: bool,
    replies: usize,
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn start_call(&self, path: &str, metadata: &[Header]) -> Result<Call> {
        if let Some(bad) = metadata.iter().find(|h| h.val.contains('\n')) {
            return Err(GrottoError::Validation {
                field: "metadata".into(),
                message: format!("invalid header {}: value is not visible ASCII", bad.key),
            });
        }

        let (request_tx, mut request_rx) = mpsc::channel::<Bytes>(16);
        let (response_tx, response_rx) = mpsc::channel(16);
        let drop_after_first = self.drop_after_first;
        let replies = self.replies;
        // Client streaming answers once, with the last request.
        let answer_last = path == COLLECT;
        let echoed = metadata.to_vec();

        tokio::spawn(async move {
            let _ = response_tx.send(CallFrame::Headers(echoed)).await;
            let mut last = None;
            while let Some(request) = request_rx.recv().await {
                if drop_after_first {
                    let status = RpcStatus::new(CODE_UNAVAILABLE, "server went away");
                    let _ = response_tx.send(CallFrame::Status(status)).await;
                    return;
                }
                if answer_last {
                    last = Some(request);
                    continue;
                }
                for _ in 0..replies {
                    let _ = response_tx.send(CallFrame::Message(request.clone())).await;
                }
            }
            if let Some(request) = last {
                let _ = response_tx.send(CallFrame::Message(request)).await;
            }
            let trailers = vec![Header::new("x-served-by", "scripted")];
            let _ = response_tx.send(CallFrame::Trailers(trailers)).await;
            let _ = response_tx.send(CallFrame::Status(RpcStatus::ok())).await;
        });

        Ok(Call {
            requests: request_tx,
            responses: response_rx,
        })
    }
}

/// Reflection that no server offers.
pub struct NoReflection;

#[async_trait]
impl ReflectionClient for NoReflection {
    async fn file_descriptors(&self, target: &Target, _headers: &[Header]) -> Result<Vec<Vec<u8>>> {
        Err(GrottoError::ReflectionUnavailable {
            addr: target.addr.clone(),
            message: "reflection is not served".into(),
        })
    }
}

pub struct TestEnv {
    pub dir: TempDir,
    pub api: GrottoApi,
    pub transport: Arc<ScriptedTransport>,
}

/// Engine with a `greeter` workspace selected, reading `greeter.proto`
/// from a temporary directory.
pub async fn create_test_env(script: Script) -> TestEnv {
    create_test_env_with_timeout(script, Duration::from_secs(5)).await
}

pub async fn create_test_env_with_timeout(script: Script, timeout: Duration) -> TestEnv {
    build_test_env(script, timeout, 256).await
}

/// Like [`create_test_env`], keeping at most `retained` finished sessions.
pub async fn create_test_env_retaining(script: Script, retained: usize) -> TestEnv {
    build_test_env(script, Duration::from_secs(5), retained).await
}

async fn build_test_env(script: Script, timeout: Duration, retained: usize) -> TestEnv {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let protos = dir.path().join("protos");
    std::fs::create_dir_all(&protos).unwrap();
    std::fs::write(protos.join("greeter.proto"), GREETER_PROTO).unwrap();

    let transport = ScriptedTransport::new(script);
    let api = GrottoApi::builder(dir.path().join("data"))
        .auto_create_dirs(true)
        .with_search_roots(vec![protos.clone()])
        .with_connect_timeout(timeout)
        .with_retained_sessions(retained)
        .with_descriptor_cache(16, Duration::from_secs(60))
        .with_transport(transport.clone())
        .with_reflection(Arc::new(NoReflection))
        .build()
        .await
        .unwrap();

    api.create_workspace(greeter_options("greeter", &protos))
        .await
        .unwrap();
    api.select_workspace("greeter").await.unwrap();

    TestEnv {
        dir,
        api,
        transport,
    }
}

pub fn greeter_options(name: &str, protos: &std::path::Path) -> WorkspaceOptions {
    let mut options = WorkspaceOptions::new(name, "localhost:50051");
    options.schema_source = SchemaSource::LocalFiles {
        roots: vec![protos.to_path_buf()],
        files: Vec::new(),
    };
    options
}

/// Drain events until the attempt's channel closes.
pub async fn collect_events(mut events: SessionEvents) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    let drain = async {
        while let Some(event) = events.recv().await {
            out.push(event);
        }
    };
    tokio::time::timeout(Duration::from_secs(5), drain)
        .await
        .expect("event channel did not close");
    out
}

pub fn states(events: &[SessionEvent]) -> Vec<SessionState> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::StateChanged { state } => Some(*state),
            _ => None,
        })
        .collect()
}

pub fn messages(events: &[SessionEvent]) -> Vec<serde_json::Value> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Message { payload } => Some(serde_json::from_str(payload).unwrap()),
            _ => None,
        })
        .collect()
}

/// Wait until a session exists and reaches `state`.
pub async fn wait_for_state(api: &GrottoApi, id: u64, state: SessionState) {
    let wait = async {
        loop {
            let reached = api.session_info(Some(id)).map(|i| i.state == state);
            if reached.unwrap_or(false) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("session never reached the expected state");
}
