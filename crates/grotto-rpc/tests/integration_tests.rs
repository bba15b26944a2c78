//! Integration tests for the grotto-rpc JSON-RPC server.
//!
//! These tests start the real binary and talk to it over HTTP, the way the
//! desktop shell does.

use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncBufReadExt;

const GREETER_PROTO: &str = r#"
syntax = "proto3";
package helloworld;
service Greeter {
  rpc SayHello (HelloRequest) returns (HelloReply);
}
message HelloRequest { string name = 1; }
message HelloReply { string message = 1; }
"#;

/// Create a temporary directory with a data dir and a proto root.
fn create_test_env() -> TempDir {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    std::fs::create_dir_all(temp_dir.path().join("data")).unwrap();
    std::fs::create_dir_all(temp_dir.path().join("protos")).unwrap();
    std::fs::write(temp_dir.path().join("protos/greeter.proto"), GREETER_PROTO).unwrap();
    temp_dir
}

/// Make an RPC call to the server.
async fn rpc_call(port: u16, method: &str, params: Value) -> Result<Value, String> {
    let json = rpc_call_raw(port, method, params).await?;
    if let Some(error) = json.get("error") {
        return Err(error.to_string());
    }
    Ok(json.get("result").cloned().unwrap_or(Value::Null))
}

/// Make an RPC call and return the full JSON-RPC payload.
async fn rpc_call_raw(port: u16, method: &str, params: Value) -> Result<Value, String> {
    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://127.0.0.1:{}/rpc", port))
        .json(&json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .map_err(|e| e.to_string())?;

    response.json::<Value>().await.map_err(|e| e.to_string())
}

/// Check health endpoint.
async fn check_health(port: u16) -> bool {
    let client = reqwest::Client::new();
    if let Ok(response) = client
        .get(format!("http://127.0.0.1:{}/health", port))
        .timeout(Duration::from_secs(5))
        .send()
        .await
    {
        if let Ok(json) = response.json::<Value>().await {
            return json.get("status").and_then(|v| v.as_str()) == Some("ok");
        }
    }
    false
}

/// Wait for server to be ready.
async fn wait_for_server(port: u16, timeout_secs: u64) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < Duration::from_secs(timeout_secs) {
        if check_health(port).await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

struct RpcServerHandle {
    child: tokio::process::Child,
    port: u16,
    stdout_drain: Option<tokio::task::JoinHandle<()>>,
}

impl RpcServerHandle {
    async fn stop(mut self) {
        if let Some(drain) = self.stdout_drain.take() {
            drain.abort();
        }
        let _ = self.child.kill().await;
        let _ = self.child.wait().await;
    }
}

impl Drop for RpcServerHandle {
    fn drop(&mut self) {
        if let Some(drain) = self.stdout_drain.take() {
            drain.abort();
        }
        let _ = self.child.start_kill();
    }
}

/// Start the RPC binary and wait until `/health` is ready.
async fn start_rpc_server(root: &std::path::Path) -> Result<RpcServerHandle, String> {
    let binary = PathBuf::from(env!("CARGO_BIN_EXE_grotto-rpc"));

    let mut child = tokio::process::Command::new(&binary)
        .arg("--host")
        .arg("127.0.0.1")
        .arg("--port")
        .arg("0")
        .arg("--data-dir")
        .arg(root.join("data"))
        .arg("--proto-root")
        .arg(root.join("protos"))
        .arg("--connect-timeout-secs")
        .arg("5")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| format!("failed to spawn grotto-rpc: {e}"))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| "failed to capture stdout".to_string())?;
    let mut lines = tokio::io::BufReader::new(stdout).lines();

    let mut discovered_port: Option<u16> = None;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(250), lines.next_line()).await {
            Ok(Ok(Some(line))) => {
                if let Some(value) = line.strip_prefix("RPC_PORT=") {
                    let parsed = value
                        .trim()
                        .parse::<u16>()
                        .map_err(|e| format!("invalid RPC_PORT value '{value}': {e}"))?;
                    discovered_port = Some(parsed);
                    break;
                }
            }
            Ok(Ok(None)) => break,
            Ok(Err(err)) => return Err(format!("failed to read grotto-rpc stdout: {err}")),
            Err(_) => continue,
        }
    }

    let port =
        discovered_port.ok_or_else(|| "RPC_PORT line not emitted by grotto-rpc".to_string())?;
    if !wait_for_server(port, 15).await {
        return Err(format!("grotto-rpc failed health check on port {port}"));
    }

    let stdout_drain =
        tokio::spawn(async move { while let Ok(Some(_)) = lines.next_line().await {} });

    Ok(RpcServerHandle {
        child,
        port,
        stdout_drain: Some(stdout_drain),
    })
}

#[tokio::test]
async fn test_health_and_window_info() {
    let temp_dir = create_test_env();
    let server = start_rpc_server(temp_dir.path()).await.unwrap();

    let health = rpc_call(server.port, "health_check", json!({})).await.unwrap();
    assert_eq!(health["status"], json!("ok"));

    let info = rpc_call(server.port, "get_window_info", json!({})).await.unwrap();
    assert!(info["os"].as_str().is_some());
    assert!(info["isWindows"].as_bool().is_some());

    let dir = rpc_call(server.port, "select_directory", json!({})).await.unwrap();
    assert!(dir["path"].as_str().unwrap().ends_with("protos"));

    server.stop().await;
}

#[tokio::test]
async fn test_workspace_and_schema_flow() {
    let temp_dir = create_test_env();
    let server = start_rpc_server(temp_dir.path()).await.unwrap();
    let port = server.port;

    rpc_call(
        port,
        "create_workspace",
        json!({"options": {
            "name": "staging",
            "addr": "localhost:50051",
            "schema_source": {"type": "local_files"}
        }}),
    )
    .await
    .unwrap();
    rpc_call(port, "select_workspace", json!({"name": "staging"}))
        .await
        .unwrap();

    let files = rpc_call(port, "find_proto_files", json!({})).await.unwrap();
    assert_eq!(files["files"].as_array().unwrap().len(), 1);

    let catalogue = rpc_call(port, "get_metadata", json!({})).await.unwrap();
    assert_eq!(
        catalogue["services"][0]["methods"][0]["name"],
        json!("SayHello")
    );

    let input = rpc_call(
        port,
        "select_method",
        json!({"method": "/helloworld.Greeter/SayHello"}),
    )
    .await
    .unwrap();
    assert_eq!(input["mode"], json!("unary"));

    let err = rpc_call_raw(port, "delete_workspace", json!({"name": "missing"}))
        .await
        .unwrap();
    assert_eq!(err["error"]["code"], json!(-32002));
    assert_eq!(err["error"]["data"]["kind"], json!("WorkspaceNotFound"));

    server.stop().await;
}

#[tokio::test]
async fn test_unreachable_target_fails_session() {
    let temp_dir = create_test_env();
    let server = start_rpc_server(temp_dir.path()).await.unwrap();
    let port = server.port;

    rpc_call(
        port,
        "create_workspace",
        json!({"options": {
            "name": "dead",
            "addr": "127.0.0.1:1",
            "schema_source": {"type": "local_files"}
        }}),
    )
    .await
    .unwrap();
    rpc_call(port, "select_workspace", json!({"name": "dead"}))
        .await
        .unwrap();

    let connected = rpc_call(
        port,
        "connect",
        json!({"method": "/helloworld.Greeter/SayHello", "payload": "{\"name\":\"x\"}"}),
    )
    .await
    .unwrap();
    let id = connected["session_id"].as_u64().unwrap();

    let info = rpc_call(port, "session_info", json!({"session_id": id}))
        .await
        .unwrap();
    assert_eq!(info["state"], json!("Failed"));
    assert_eq!(info["errorKind"], json!("ConnectionError"));

    // The attempt is over, so the event stream replays and ends.
    let body = reqwest::Client::new()
        .get(format!("http://127.0.0.1:{}/sessions/{}/events", port, id))
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("\"type\":\"error\""));
    assert!(body.contains("\"state\":\"Failed\""));

    server.stop().await;
}
