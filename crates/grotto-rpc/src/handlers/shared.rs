//! Parameter extraction shared across RPC domains.

use grotto_core::GrottoError;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Extract an optional string parameter, supporting both snake_case and camelCase.
pub(crate) fn get_str_param<'a>(params: &'a Value, snake: &str, camel: &str) -> Option<&'a str> {
    params
        .get(snake)
        .or_else(|| params.get(camel))
        .and_then(|v| v.as_str())
}

/// Extract a required string parameter or return an error.
pub(crate) fn require_str_param(
    params: &Value,
    snake: &str,
    camel: &str,
) -> grotto_core::Result<String> {
    get_str_param(params, snake, camel)
        .map(String::from)
        .ok_or_else(|| GrottoError::InvalidParams {
            message: format!("Missing required parameter: {}", snake),
        })
}

/// Extract an optional bool parameter, supporting both snake_case and camelCase.
pub(crate) fn get_bool_param(params: &Value, snake: &str, camel: &str) -> Option<bool> {
    params
        .get(snake)
        .or_else(|| params.get(camel))
        .and_then(|v| v.as_bool())
}

/// Extract an optional u64 parameter, supporting both snake_case and camelCase.
pub(crate) fn get_u64_param(params: &Value, snake: &str, camel: &str) -> Option<u64> {
    params
        .get(snake)
        .or_else(|| params.get(camel))
        .and_then(|v| v.as_u64())
}

/// Deserialize a structured parameter. Absent or null yields `None`.
pub(crate) fn parse_param<T: DeserializeOwned>(
    params: &Value,
    snake: &str,
    camel: &str,
) -> grotto_core::Result<Option<T>> {
    match params.get(snake).or_else(|| params.get(camel)) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| GrottoError::InvalidParams {
                message: format!("Invalid parameter {}: {}", snake, e),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_params_accept_both_cases() {
        let params = json!({"useTls": true, "session_id": 7});
        assert_eq!(get_bool_param(&params, "use_tls", "useTls"), Some(true));
        assert_eq!(get_u64_param(&params, "session_id", "sessionId"), Some(7));
        assert!(require_str_param(&params, "method", "method").is_err());
    }

    #[test]
    fn test_parse_param_reports_bad_shape() {
        let params = json!({"metadata": "not a list"});
        let err = parse_param::<Vec<grotto_core::Header>>(&params, "metadata", "metadata")
            .unwrap_err();
        assert!(matches!(err, GrottoError::InvalidParams { .. }));
        let none: Option<Vec<grotto_core::Header>> =
            parse_param(&json!({}), "metadata", "metadata").unwrap();
        assert!(none.is_none());
    }
}
