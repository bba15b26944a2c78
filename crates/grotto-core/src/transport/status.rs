use serde::{Deserialize, Serialize};

pub const CODE_OK: i32 = 0;
pub const CODE_CANCELLED: i32 = 1;
pub const CODE_UNAVAILABLE: i32 = 14;

/// Final status of a call as reported by the server (or synthesized by the
/// transport).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcStatus {
    pub code: i32,
    pub message: String,
}

impl RpcStatus {
    pub fn ok() -> Self {
        Self {
            code: CODE_OK,
            message: String::new(),
        }
    }

    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        code_name(self.code)
    }

    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }
}

impl From<tonic::Status> for RpcStatus {
    fn from(status: tonic::Status) -> Self {
        Self {
            code: status.code() as i32,
            message: status.message().to_string(),
        }
    }
}

/// Canonical upper-case gRPC status name.
pub fn code_name(code: i32) -> &'static str {
    match code {
        0 => "OK",
        1 => "CANCELLED",
        2 => "UNKNOWN",
        3 => "INVALID_ARGUMENT",
        4 => "DEADLINE_EXCEEDED",
        5 => "NOT_FOUND",
        6 => "ALREADY_EXISTS",
        7 => "PERMISSION_DENIED",
        8 => "RESOURCE_EXHAUSTED",
        9 => "FAILED_PRECONDITION",
        10 => "ABORTED",
        11 => "OUT_OF_RANGE",
        12 => "UNIMPLEMENTED",
        13 => "INTERNAL",
        14 => "UNAVAILABLE",
        15 => "DATA_LOSS",
        16 => "UNAUTHENTICATED",
        _ => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_tonic_status() {
        let status: RpcStatus = tonic::Status::unavailable("connection refused").into();
        assert_eq!(status.code, CODE_UNAVAILABLE);
        assert_eq!(status.name(), "UNAVAILABLE");
        assert_eq!(status.message, "connection refused");
    }

    #[test]
    fn test_unknown_codes_map_to_unknown() {
        assert_eq!(code_name(99), "UNKNOWN");
        assert!(RpcStatus::ok().is_ok());
    }
}
