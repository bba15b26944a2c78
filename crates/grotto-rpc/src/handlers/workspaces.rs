//! Workspace handlers.

use super::{parse_param, require_str_param};
use crate::server::AppState;
use grotto_core::{GrottoError, WorkspaceOptions};
use serde_json::Value;

fn require_options(params: &Value) -> grotto_core::Result<WorkspaceOptions> {
    parse_param(params, "options", "options")?.ok_or_else(|| GrottoError::InvalidParams {
        message: "Missing required parameter: options".into(),
    })
}

pub async fn list_workspaces(state: &AppState, _params: &Value) -> grotto_core::Result<Value> {
    Ok(serde_json::to_value(state.api.list_workspaces().await?)?)
}

pub async fn get_workspace_options(
    state: &AppState,
    _params: &Value,
) -> grotto_core::Result<Value> {
    Ok(serde_json::to_value(state.api.get_workspace_options().await?)?)
}

pub async fn get_workspace(state: &AppState, params: &Value) -> grotto_core::Result<Value> {
    let name = require_str_param(params, "name", "name")?;
    Ok(serde_json::to_value(state.api.get_workspace(&name).await?)?)
}

pub async fn select_workspace(state: &AppState, params: &Value) -> grotto_core::Result<Value> {
    let name = require_str_param(params, "name", "name")?;
    state.api.select_workspace(&name).await?;
    Ok(Value::Null)
}

pub async fn delete_workspace(state: &AppState, params: &Value) -> grotto_core::Result<Value> {
    let name = require_str_param(params, "name", "name")?;
    state.api.delete_workspace(&name).await?;
    Ok(Value::Null)
}

pub async fn create_workspace(state: &AppState, params: &Value) -> grotto_core::Result<Value> {
    state.api.create_workspace(require_options(params)?).await?;
    Ok(Value::Null)
}

pub async fn update_workspace(state: &AppState, params: &Value) -> grotto_core::Result<Value> {
    state.api.update_workspace(require_options(params)?).await?;
    Ok(Value::Null)
}
