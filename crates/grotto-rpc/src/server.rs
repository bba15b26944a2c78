//! HTTP server implementation using Axum.

use crate::handlers::{handle_events, handle_health, handle_rpc};
use axum::{
    routing::{get, post},
    Router,
};
use grotto_core::GrottoApi;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Notify;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// Requests handled at once; event streams count only while being opened.
const MAX_CONCURRENT_REQUESTS: usize = 64;

/// Application state shared across handlers.
pub struct AppState {
    /// Session engine facade
    pub api: Arc<GrottoApi>,
    /// Signalled by the `shutdown` RPC method
    pub shutdown: Arc<Notify>,
}

/// Build the router without binding a socket.
pub fn router(state: Arc<AppState>) -> Router {
    // Configure CORS for development
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/rpc", post(handle_rpc))
        .route("/sessions/:id/events", get(handle_events))
        .layer(ConcurrencyLimitLayer::new(MAX_CONCURRENT_REQUESTS))
        .layer(cors)
        .with_state(state)
}

/// Start the JSON-RPC HTTP server.
///
/// Returns the actual address the server is bound to (useful when port=0)
/// and the notifier fired by the `shutdown` method.
pub async fn start_server(
    api: Arc<GrottoApi>,
    host: &str,
    port: u16,
) -> anyhow::Result<(SocketAddr, Arc<Notify>)> {
    let shutdown = Arc::new(Notify::new());
    let state = Arc::new(AppState {
        api,
        shutdown: Arc::clone(&shutdown),
    });
    let app = router(state);

    // Parse the address
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    // Bind to the address
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Server listening on {}", actual_addr);

    // Spawn the server in the background
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn test_state(temp_dir: &TempDir) -> Arc<AppState> {
        let api = GrottoApi::new(temp_dir.path()).await.unwrap();
        Arc::new(AppState {
            api: Arc::new(api),
            shutdown: Arc::new(Notify::new()),
        })
    }

    async fn rpc(app: Router, method: &str, params: Value) -> Value {
        let body = json!({"jsonrpc": "2.0", "method": method, "params": params, "id": 1});
        let response = app
            .oneshot(
                Request::post("/rpc")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_server_starts() {
        let temp_dir = TempDir::new().unwrap();
        let api = GrottoApi::new(temp_dir.path()).await.unwrap();
        let (addr, _shutdown) = start_server(Arc::new(api), "127.0.0.1", 0).await.unwrap();
        assert!(addr.port() > 0);
    }

    #[tokio::test]
    async fn test_health_route() {
        let temp_dir = TempDir::new().unwrap();
        let app = router(test_state(&temp_dir).await);
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_workspace_round_trip_over_rpc() {
        let temp_dir = TempDir::new().unwrap();
        let state = test_state(&temp_dir).await;

        let created = rpc(
            router(Arc::clone(&state)),
            "create_workspace",
            json!({"options": {"name": "staging", "addr": "localhost:50051"}}),
        )
        .await;
        assert_eq!(created["result"]["success"], json!(true));

        rpc(router(Arc::clone(&state)), "select_workspace", json!({"name": "staging"})).await;
        let listed = rpc(router(Arc::clone(&state)), "list_workspaces", json!({})).await;
        assert_eq!(listed["result"]["workspaces"][0]["name"], json!("staging"));

        let options = rpc(router(state), "get_workspace_options", json!({})).await;
        assert_eq!(options["result"]["options"]["addr"], json!("localhost:50051"));
    }

    #[tokio::test]
    async fn test_errors_carry_application_codes() {
        let temp_dir = TempDir::new().unwrap();
        let state = test_state(&temp_dir).await;

        let missing = rpc(
            router(Arc::clone(&state)),
            "select_workspace",
            json!({"name": "nope"}),
        )
        .await;
        assert_eq!(missing["error"]["code"], json!(-32002));

        let no_session = rpc(router(Arc::clone(&state)), "cancel", json!({})).await;
        assert_eq!(no_session["error"]["code"], json!(-32602));

        let unknown = rpc(router(state), "frobnicate", json!({})).await;
        assert_eq!(unknown["error"]["code"], json!(-32601));
    }

    #[tokio::test]
    async fn test_events_for_unknown_session() {
        let temp_dir = TempDir::new().unwrap();
        let app = router(test_state(&temp_dir).await);
        let response = app
            .oneshot(Request::get("/sessions/42/events").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_shutdown_method_notifies() {
        let temp_dir = TempDir::new().unwrap();
        let state = test_state(&temp_dir).await;
        let notified = Arc::clone(&state.shutdown);
        let waiter = tokio::spawn(async move { notified.notified().await });
        tokio::task::yield_now().await;

        let response = rpc(router(state), "shutdown", json!({})).await;
        assert_eq!(response["result"]["status"], json!("shutting_down"));
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
