//! JSON-RPC request handlers, split by domain.

mod commands;
mod schema;
mod sessions;
mod shared;
mod system;
mod workspaces;

pub(crate) use shared::{
    get_bool_param, get_str_param, get_u64_param, parse_param, require_str_param,
};

use crate::server::AppState;
use crate::wrapper::wrap_response;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::stream::{self, Stream};
use grotto_core::{GrottoError, SessionEvents};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, error, warn};

// ============================================================================
// JSON-RPC types
// ============================================================================

/// JSON-RPC 2.0 request structure.
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 response structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 error structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

const METHOD_NOT_FOUND: i32 = -32601;

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: String, data: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message,
                data,
            }),
            id,
        }
    }
}

/// Why a dispatched call produced no result.
enum RpcFailure {
    MethodNotFound,
    Api(GrottoError),
}

impl From<GrottoError> for RpcFailure {
    fn from(err: GrottoError) -> Self {
        RpcFailure::Api(err)
    }
}

// ============================================================================
// HTTP endpoints
// ============================================================================

/// Health check endpoint.
pub async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Main JSON-RPC handler.
pub async fn handle_rpc(
    State(state): State<Arc<AppState>>,
    Json(request): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    let method = &request.method;
    let params = request.params.unwrap_or(Value::Object(Default::default()));
    let id = request.id.clone();

    debug!("RPC call: {}({:?})", method, params);

    // Handle built-in methods
    if method == "health_check" {
        return (
            StatusCode::OK,
            Json(JsonRpcResponse::success(id, json!({"status": "ok"}))),
        );
    }

    if method == "shutdown" {
        state.api.shutdown().await;
        state.shutdown.notify_one();
        return (
            StatusCode::OK,
            Json(JsonRpcResponse::success(
                id,
                json!({"status": "shutting_down"}),
            )),
        );
    }

    match dispatch_method(&state, method, &params).await {
        Ok(value) => {
            let wrapped = wrap_response(method, value);
            (StatusCode::OK, Json(JsonRpcResponse::success(id, wrapped)))
        }
        Err(RpcFailure::MethodNotFound) => {
            warn!("Method not found: {}", method);
            (
                StatusCode::OK,
                Json(JsonRpcResponse::error(
                    id,
                    METHOD_NOT_FOUND,
                    format!("Method not found: {}", method),
                    None,
                )),
            )
        }
        Err(RpcFailure::Api(e)) => {
            error!("RPC error for {}: {}", method, e);
            let data = json!({"kind": e.kind(), "retryable": e.is_retryable()});
            (
                StatusCode::OK,
                Json(JsonRpcResponse::error(
                    id,
                    e.to_rpc_error_code(),
                    e.to_string(),
                    Some(data),
                )),
            )
        }
    }
}

/// Server-sent events for a session's current attempt, one JSON event per
/// message. The stream ends when the attempt reaches a terminal state.
pub async fn handle_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Response {
    match state.api.take_events(id) {
        Ok(events) => {
            debug!("Streaming events of session {}", id);
            Sse::new(event_stream(events))
                .keep_alive(KeepAlive::default())
                .into_response()
        }
        Err(e) => {
            let status = match e {
                GrottoError::SessionNotFound { .. } => StatusCode::NOT_FOUND,
                _ => StatusCode::CONFLICT,
            };
            (
                status,
                Json(json!({"error": e.to_string(), "kind": e.kind()})),
            )
                .into_response()
        }
    }
}

fn event_stream(events: SessionEvents) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(events, |mut events| async move {
        let event = events.recv().await?;
        let sse = match Event::default().json_data(&event) {
            Ok(sse) => sse,
            Err(e) => {
                error!("Failed to serialize session event: {}", e);
                Event::default().comment("unserializable event")
            }
        };
        Some((Ok(sse), events))
    })
}

// ============================================================================
// Method dispatcher
// ============================================================================

/// Dispatch a method call to the appropriate domain handler.
async fn dispatch_method(
    state: &AppState,
    method: &str,
    params: &Value,
) -> Result<Value, RpcFailure> {
    let value = match method {
        // Sessions
        "connect" => sessions::connect(state, params).await?,
        "send" => sessions::send(state, params).await?,
        "close_send" => sessions::close_send(state, params).await?,
        "cancel" => sessions::cancel(state, params).await?,
        "retry_connection" => sessions::retry_connection(state, params).await?,
        "get_raw_message_state" => sessions::get_raw_message_state(state, params).await?,
        "session_info" => sessions::session_info(state, params).await?,
        "list_sessions" => sessions::list_sessions(state, params).await?,
        "remove_session" => sessions::remove_session(state, params).await?,

        // Schemas
        "select_method" => schema::select_method(state, params).await?,
        "get_metadata" => schema::get_metadata(state, params).await?,
        "get_reflect_metadata" => schema::get_reflect_metadata(state, params).await?,
        "find_proto_files" => schema::find_proto_files(state, params).await?,
        "invalidate_schema" => schema::invalidate_schema(state, params).await?,

        // Workspaces
        "list_workspaces" => workspaces::list_workspaces(state, params).await?,
        "get_workspace_options" => workspaces::get_workspace_options(state, params).await?,
        "get_workspace" => workspaces::get_workspace(state, params).await?,
        "select_workspace" => workspaces::select_workspace(state, params).await?,
        "delete_workspace" => workspaces::delete_workspace(state, params).await?,
        "create_workspace" => workspaces::create_workspace(state, params).await?,
        "update_workspace" => workspaces::update_workspace(state, params).await?,

        // Saved commands
        "export_command" => commands::export_command(state, params).await?,
        "import_command" => commands::import_command(state, params).await?,
        "save_command" => commands::save_command(state, params).await?,
        "remove_command" => commands::remove_command(state, params).await?,

        // Host environment
        "select_directory" => system::select_directory(state, params).await?,
        "get_window_info" => system::get_window_info(state, params).await?,

        _ => return Err(RpcFailure::MethodNotFound),
    };
    Ok(value)
}

// ============================================================================
// Tests
// ============================================================================
