//! Session handlers.

use super::{get_bool_param, get_str_param, get_u64_param, parse_param, require_str_param};
use crate::server::AppState;
use grotto_core::{ConnectParams, GrottoError, SendParams};
use serde_json::{json, Value};

fn session_param(params: &Value) -> Option<u64> {
    get_u64_param(params, "session_id", "sessionId")
}

pub async fn connect(state: &AppState, params: &Value) -> grotto_core::Result<Value> {
    let connect = ConnectParams {
        workspace: get_str_param(params, "workspace", "workspace").map(String::from),
        method: require_str_param(params, "method", "method")?,
        payload: get_str_param(params, "payload", "payload").map(String::from),
        use_tls: get_bool_param(params, "use_tls", "useTls"),
        metadata: parse_param(params, "metadata", "metadata")?.unwrap_or_default(),
    };
    let id = state.api.connect(connect).await?;
    Ok(json!(id))
}

pub async fn send(state: &AppState, params: &Value) -> grotto_core::Result<Value> {
    state
        .api
        .send(SendParams {
            session: session_param(params),
            method: get_str_param(params, "method", "method").map(String::from),
            payload: require_str_param(params, "payload", "payload")?,
        })
        .await?;
    Ok(Value::Null)
}

pub async fn close_send(state: &AppState, params: &Value) -> grotto_core::Result<Value> {
    state.api.close_send(session_param(params)).await?;
    Ok(Value::Null)
}

pub async fn cancel(state: &AppState, params: &Value) -> grotto_core::Result<Value> {
    state.api.cancel(session_param(params)).await?;
    Ok(Value::Null)
}

pub async fn retry_connection(state: &AppState, params: &Value) -> grotto_core::Result<Value> {
    state.api.retry_connection(session_param(params)).await?;
    Ok(Value::Null)
}

pub async fn get_raw_message_state(
    state: &AppState,
    params: &Value,
) -> grotto_core::Result<Value> {
    let raw = state.api.get_raw_message_state(session_param(params)).await?;
    Ok(json!(raw))
}

pub async fn session_info(state: &AppState, params: &Value) -> grotto_core::Result<Value> {
    let info = state.api.session_info(session_param(params))?;
    Ok(serde_json::to_value(info)?)
}

pub async fn list_sessions(state: &AppState, _params: &Value) -> grotto_core::Result<Value> {
    Ok(serde_json::to_value(state.api.list_sessions())?)
}

pub async fn remove_session(state: &AppState, params: &Value) -> grotto_core::Result<Value> {
    let id = session_param(params).ok_or_else(|| GrottoError::InvalidParams {
        message: "Missing required parameter: session_id".into(),
    })?;
    state.api.remove_session(id)?;
    Ok(Value::Null)
}
