//! Error types for the Grotto session engine.
//!
//! One enum carries the engine taxonomy (schema, workspace, session and
//! transport failures) alongside the ambient IO/serialization variants, and
//! knows how to present itself to the JSON-RPC shell.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the Grotto library.
#[derive(Debug, Error)]
pub enum GrottoError {
    // Schema errors
    #[error("Schema not found: {name}")]
    SchemaNotFound { name: String },

    #[error("Schema parse error in {file}: {message}")]
    SchemaParseError { file: String, message: String },

    #[error("Reflection unavailable for {addr}: {message}")]
    ReflectionUnavailable { addr: String, message: String },

    // Transport errors
    #[error("Connection error for {addr}: {message}")]
    ConnectionError { addr: String, message: String },

    #[error("Timed out after {0:?}")]
    TimeoutError(std::time::Duration),

    // Session errors
    #[error("Encoding error: {message}")]
    EncodingError { message: String },

    #[error("Invalid state for {operation}: session is {state}")]
    InvalidState { operation: String, state: String },

    #[error("Session not found: {id}")]
    SessionNotFound { id: u64 },

    #[error("Session was cancelled")]
    Cancelled,

    // Workspace errors
    #[error("Workspace not found: {name}")]
    WorkspaceNotFound { name: String },

    #[error("Workspace {name} is in use by {sessions} active session(s)")]
    WorkspaceInUse { name: String, sessions: usize },

    #[error("Command {command} does not match the current schema: {message}")]
    CommandSchemaMismatch { command: String, message: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Validation errors
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Invalid params: {message}")]
    InvalidParams { message: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for Grotto operations.
pub type Result<T> = std::result::Result<T, GrottoError>;

impl From<std::io::Error> for GrottoError {
    fn from(err: std::io::Error) -> Self {
        GrottoError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for GrottoError {
    fn from(err: serde_json::Error) -> Self {
        GrottoError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl GrottoError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        GrottoError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Shorthand for an `InvalidState` error.
    pub fn invalid_state(operation: &str, state: impl std::fmt::Display) -> Self {
        GrottoError::InvalidState {
            operation: operation.to_string(),
            state: state.to_string(),
        }
    }

    /// Shorthand for an `EncodingError`.
    pub fn encoding(message: impl Into<String>) -> Self {
        GrottoError::EncodingError {
            message: message.into(),
        }
    }

    /// Stable machine-readable name of the error kind.
    ///
    /// Used in session events so the shell can branch without parsing
    /// display strings.
    pub fn kind(&self) -> &'static str {
        match self {
            GrottoError::SchemaNotFound { .. } => "SchemaNotFound",
            GrottoError::SchemaParseError { .. } => "SchemaParseError",
            GrottoError::ReflectionUnavailable { .. } => "ReflectionUnavailable",
            GrottoError::ConnectionError { .. } => "ConnectionError",
            GrottoError::TimeoutError(_) => "TimeoutError",
            GrottoError::EncodingError { .. } => "EncodingError",
            GrottoError::InvalidState { .. } => "InvalidState",
            GrottoError::SessionNotFound { .. } => "SessionNotFound",
            GrottoError::Cancelled => "Cancelled",
            GrottoError::WorkspaceNotFound { .. } => "WorkspaceNotFound",
            GrottoError::WorkspaceInUse { .. } => "WorkspaceInUse",
            GrottoError::CommandSchemaMismatch { .. } => "CommandSchemaMismatch",
            GrottoError::Io { .. } => "Io",
            GrottoError::Json { .. } => "Json",
            GrottoError::Config { .. } => "Config",
            GrottoError::Validation { .. } => "Validation",
            GrottoError::InvalidParams { .. } => "InvalidParams",
            GrottoError::Other(_) => "Other",
        }
    }

    /// Convert to a JSON-RPC error code.
    ///
    /// Custom error codes (application-defined, -32000 to -32099):
    /// - -32000: Connection/timeout (recoverable by retry)
    /// - -32001: Schema resolution failure
    /// - -32002: Workspace failure
    /// - -32003: Invalid session state or unknown session
    /// - -32004: Cancelled
    /// - -32005: Validation or payload encoding failure
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            GrottoError::ConnectionError { .. } | GrottoError::TimeoutError(_) => -32000,

            GrottoError::SchemaNotFound { .. }
            | GrottoError::SchemaParseError { .. }
            | GrottoError::ReflectionUnavailable { .. } => -32001,

            GrottoError::WorkspaceNotFound { .. }
            | GrottoError::WorkspaceInUse { .. }
            | GrottoError::CommandSchemaMismatch { .. } => -32002,

            GrottoError::InvalidState { .. } | GrottoError::SessionNotFound { .. } => -32003,

            GrottoError::Cancelled => -32004,

            GrottoError::EncodingError { .. } | GrottoError::Validation { .. } => -32005,

            GrottoError::InvalidParams { .. } => -32602,

            _ => -32603,
        }
    }

    /// Environment errors that a caller may recover from with `retry_connection`.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GrottoError::ConnectionError { .. } | GrottoError::TimeoutError(_)
        )
    }
}
