//! Wire transport seam.
//!
//! The session engine never talks to a network library directly. It dials a
//! [`Target`] through a [`Transport`], opens calls on the resulting
//! [`Connection`] and exchanges raw protobuf payloads over channels:
//!
//! - requests flow through [`Call::requests`]; dropping the sender half-closes
//! - responses arrive as [`CallFrame`]s, ending with exactly one
//!   [`CallFrame::Status`] unless the transport dies first
//!
//! [`GrpcTransport`] is the HTTP/2 implementation; tests substitute scripted
//! in-memory transports.

mod grpc;
mod insecure;
mod reflection;
mod status;

pub use grpc::GrpcTransport;
pub use reflection::GrpcReflectionClient;
pub use status::{code_name, RpcStatus, CODE_CANCELLED, CODE_OK, CODE_UNAVAILABLE};

use crate::workspace::{Header, WorkspaceOptions};
use crate::{GrottoError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Connection parameters captured from a workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub workspace: String,
    pub addr: String,
    pub use_tls: bool,
    /// Skip server certificate verification. Only meaningful with TLS.
    pub insecure: bool,
    pub root_ca: Option<String>,
    pub client_cert: Option<String>,
    pub client_key: Option<String>,
}

impl Target {
    pub fn from_options(options: &WorkspaceOptions) -> Self {
        Self {
            workspace: options.name.clone(),
            addr: options.addr.clone(),
            use_tls: options.use_tls,
            insecure: options.insecure,
            root_ca: options.root_ca.clone(),
            client_cert: options.client_cert.clone(),
            client_key: options.client_key.clone(),
        }
    }

    /// TLS is on and the server certificate is not checked.
    pub fn skips_verification(&self) -> bool {
        self.use_tls && self.insecure
    }

    /// Endpoint URI. The scheme always follows the TLS flag; a scheme in
    /// `addr` is replaced.
    pub fn uri(&self) -> Result<url::Url> {
        let addr = self.addr.trim();
        let authority = addr.split_once("://").map(|(_, rest)| rest).unwrap_or(addr);
        let scheme = if self.use_tls { "https" } else { "http" };
        let raw = format!("{}://{}", scheme, authority);
        let url = url::Url::parse(&raw).map_err(|e| GrottoError::ConnectionError {
            addr: self.addr.clone(),
            message: format!("invalid address: {}", e),
        })?;
        if url.host_str().is_none() {
            return Err(GrottoError::ConnectionError {
                addr: self.addr.clone(),
                message: "address has no host".into(),
            });
        }
        Ok(url)
    }
}

/// One frame of a call's response side.
#[derive(Debug, Clone, PartialEq)]
pub enum CallFrame {
    Headers(Vec<Header>),
    Message(Bytes),
    Trailers(Vec<Header>),
    Status(RpcStatus),
}

/// An open call: a request sink and a response frame source.
#[derive(Debug)]
pub struct Call {
    pub requests: mpsc::Sender<Bytes>,
    pub responses: mpsc::Receiver<CallFrame>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish a channel to `target`, including any TLS handshake.
    async fn connect(&self, target: &Target) -> Result<Arc<dyn Connection>>;
}

#[async_trait]
pub trait Connection: Send + Sync {
    /// Start a call on `path` (`/package.Service/Method`).
    async fn start_call(&self, path: &str, metadata: &[Header]) -> Result<Call>;
}

/// Source of serialized `FileDescriptorProto`s from a live server.
#[async_trait]
pub trait ReflectionClient: Send + Sync {
    /// Every file needed to describe every service the server lists.
    async fn file_descriptors(&self, target: &Target, headers: &[Header]) -> Result<Vec<Vec<u8>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(addr: &str, use_tls: bool) -> Target {
        Target {
            workspace: "w".into(),
            addr: addr.into(),
            use_tls,
            insecure: false,
            root_ca: None,
            client_cert: None,
            client_key: None,
        }
    }

    #[test]
    fn test_uri_scheme_follows_tls_flag() {
        assert_eq!(
            target("localhost:50051", false).uri().unwrap().as_str(),
            "http://localhost:50051/"
        );
        assert_eq!(target("api.example.com:443", true).uri().unwrap().scheme(), "https");
        assert_eq!(
            target("http://10.0.0.1:9000", true).uri().unwrap().as_str(),
            "https://10.0.0.1:9000/"
        );
    }

    #[test]
    fn test_insecure_flag_needs_tls() {
        let mut plain = target("localhost:50051", false);
        plain.insecure = true;
        assert!(!plain.skips_verification());

        let mut tls = target("localhost:50051", true);
        assert!(!tls.skips_verification());
        tls.insecure = true;
        assert!(tls.skips_verification());
    }

    #[test]
    fn test_uri_rejects_garbage() {
        let err = target("local host:50051", false).uri().unwrap_err();
        assert!(matches!(err, GrottoError::ConnectionError { .. }));
    }
}
