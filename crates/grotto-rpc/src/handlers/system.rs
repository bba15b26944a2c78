//! Host environment handlers.

use crate::server::AppState;
use serde_json::{json, Value};

pub async fn select_directory(state: &AppState, _params: &Value) -> grotto_core::Result<Value> {
    let path = state.api.select_directory().await?;
    Ok(json!(path))
}

pub async fn get_window_info(state: &AppState, _params: &Value) -> grotto_core::Result<Value> {
    Ok(serde_json::to_value(state.api.get_window_info())?)
}
