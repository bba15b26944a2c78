//! Response wrapping for the shell.
//!
//! The shell expects `{success: bool, ...data}` objects. The core API returns
//! raw values; this module puts them under the field the shell reads.

use serde_json::{json, Value};

/// Methods whose only outcome is success or an error.
const UNIT_METHODS: &[&str] = &[
    "send",
    "close_send",
    "cancel",
    "retry_connection",
    "remove_session",
    "invalidate_schema",
    "select_workspace",
    "delete_workspace",
    "create_workspace",
    "update_workspace",
    "save_command",
    "remove_command",
];

/// Wrap API responses to match the shell's expected format.
pub fn wrap_response(method: &str, result: Value) -> Value {
    match method {
        // List wrappers
        "list_workspaces" => {
            json!({
                "success": true,
                "workspaces": if result.is_null() { json!([]) } else { result }
            })
        }

        "list_sessions" => {
            json!({
                "success": true,
                "sessions": if result.is_null() { json!([]) } else { result }
            })
        }

        "find_proto_files" => {
            json!({
                "success": true,
                "files": if result.is_null() { json!([]) } else { result }
            })
        }

        // Scalar wrappers
        "connect" => {
            json!({
                "success": true,
                "session_id": result
            })
        }

        "get_raw_message_state" => {
            json!({
                "success": true,
                "payload": if result.is_null() { json!("") } else { result }
            })
        }

        "export_command" => {
            json!({
                "success": true,
                "encoding": result
            })
        }

        "select_directory" => {
            json!({
                "success": true,
                "path": result
            })
        }

        // Dict wrappers; null means no workspace is selected
        "get_workspace_options" => {
            json!({
                "success": true,
                "options": result
            })
        }

        "import_command" => {
            json!({
                "success": true,
                "command": result
            })
        }

        m if UNIT_METHODS.contains(&m) => json!({"success": true}),

        // Default: return as-is (for methods not explicitly handled)
        _ => result,
    }
}
