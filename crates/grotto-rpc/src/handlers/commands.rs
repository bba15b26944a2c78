//! Saved command handlers.

use super::{get_str_param, parse_param, require_str_param};
use crate::server::AppState;
use grotto_core::{Command, CommandFormat, ExportParams, GrottoError, ImportParams};
use serde_json::{json, Value};

fn format_param(params: &Value) -> grotto_core::Result<Option<CommandFormat>> {
    get_str_param(params, "format", "format")
        .map(str::parse)
        .transpose()
}

pub async fn export_command(state: &AppState, params: &Value) -> grotto_core::Result<Value> {
    let encoding = state
        .api
        .export_command(ExportParams {
            workspace: get_str_param(params, "workspace", "workspace").map(String::from),
            command: require_str_param(params, "command", "command")?,
            format: format_param(params)?.unwrap_or_default(),
        })
        .await?;
    Ok(json!(encoding))
}

pub async fn import_command(state: &AppState, params: &Value) -> grotto_core::Result<Value> {
    let command = state
        .api
        .import_command(ImportParams {
            workspace: get_str_param(params, "workspace", "workspace").map(String::from),
            encoding: require_str_param(params, "encoding", "encoding")?,
            format: format_param(params)?,
        })
        .await?;
    Ok(serde_json::to_value(command)?)
}

pub async fn save_command(state: &AppState, params: &Value) -> grotto_core::Result<Value> {
    let command: Command =
        parse_param(params, "command", "command")?.ok_or_else(|| GrottoError::InvalidParams {
            message: "Missing required parameter: command".into(),
        })?;
    let workspace = get_str_param(params, "workspace", "workspace");
    state.api.save_command(workspace, command).await?;
    Ok(Value::Null)
}

pub async fn remove_command(state: &AppState, params: &Value) -> grotto_core::Result<Value> {
    let command = require_str_param(params, "command", "command")?;
    let workspace = get_str_param(params, "workspace", "workspace");
    state.api.remove_command(workspace, &command).await?;
    Ok(Value::Null)
}
