//! Schema handlers.

use super::{get_str_param, require_str_param};
use crate::server::AppState;
use grotto_core::SelectMethodParams;
use serde_json::{json, Value};

pub async fn select_method(state: &AppState, params: &Value) -> grotto_core::Result<Value> {
    let input = state
        .api
        .select_method(SelectMethodParams {
            workspace: get_str_param(params, "workspace", "workspace").map(String::from),
            method: require_str_param(params, "method", "method")?,
            payload: get_str_param(params, "payload", "payload").map(String::from),
        })
        .await?;
    Ok(serde_json::to_value(input)?)
}

pub async fn get_metadata(state: &AppState, params: &Value) -> grotto_core::Result<Value> {
    let workspace = get_str_param(params, "workspace", "workspace");
    let catalogue = state.api.get_metadata(workspace).await?;
    Ok(serde_json::to_value(catalogue)?)
}

pub async fn get_reflect_metadata(
    state: &AppState,
    params: &Value,
) -> grotto_core::Result<Value> {
    let workspace = get_str_param(params, "workspace", "workspace");
    let catalogue = state.api.get_reflect_metadata(workspace).await?;
    Ok(serde_json::to_value(catalogue)?)
}

pub async fn find_proto_files(state: &AppState, _params: &Value) -> grotto_core::Result<Value> {
    let files = state.api.find_proto_files().await?;
    Ok(json!(files))
}

pub async fn invalidate_schema(state: &AppState, params: &Value) -> grotto_core::Result<Value> {
    let workspace = get_str_param(params, "workspace", "workspace");
    state.api.invalidate_schema(workspace).await?;
    Ok(Value::Null)
}
