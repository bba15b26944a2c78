//! HTTP/2 gRPC transport built on tonic.
//!
//! Payloads stay opaque: a pass-through codec moves already-encoded protobuf
//! bytes, so one transport serves every method of every schema.

use super::insecure::UnverifiedTlsConnector;
use super::{Call, CallFrame, Connection, RpcStatus, Target, Transport};
use crate::config::{AppConfig, SessionConfig};
use crate::workspace::Header;
use crate::{GrottoError, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::{Buf, BufMut, Bytes};
use futures::Stream;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::codegen::http::uri::PathAndQuery;
use tonic::metadata::{
    AsciiMetadataKey, AsciiMetadataValue, BinaryMetadataKey, BinaryMetadataValue, KeyAndValueRef,
    MetadataMap,
};
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};
use tonic::Status;
use tracing::{debug, warn};

/// Dials targets with tonic channels.
#[derive(Debug, Clone)]
pub struct GrpcTransport {
    connect_timeout: Duration,
}

impl GrpcTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    pub(crate) fn endpoint(&self, target: &Target) -> Result<Endpoint> {
        let mut uri = target.uri()?;
        let connection_error = |message: String| GrottoError::ConnectionError {
            addr: target.addr.clone(),
            message,
        };
        // The unverified connector does its own TLS; tonic must see plain http.
        if target.skips_verification() && uri.set_scheme("http").is_err() {
            return Err(connection_error("cannot rewrite endpoint scheme".into()));
        }

        let mut endpoint = Channel::from_shared(uri.to_string())
            .map_err(|e| connection_error(format!("invalid address: {}", e)))?
            .connect_timeout(self.connect_timeout)
            .user_agent(AppConfig::USER_AGENT)
            .map_err(|e| connection_error(error_chain(&e)))?;

        if target.use_tls && !target.insecure {
            let mut tls = ClientTlsConfig::new().with_native_roots();
            if let Some(host) = uri.host_str() {
                tls = tls.domain_name(host.trim_matches(|c| c == '[' || c == ']'));
            }
            if let Some(ca) = &target.root_ca {
                tls = tls.ca_certificate(Certificate::from_pem(ca));
            }
            if let (Some(cert), Some(key)) = (&target.client_cert, &target.client_key) {
                tls = tls.identity(Identity::from_pem(cert, key));
            }
            endpoint = endpoint
                .tls_config(tls)
                .map_err(|e| connection_error(error_chain(&e)))?;
        }
        Ok(endpoint)
    }

    pub(crate) async fn channel(&self, target: &Target) -> Result<Channel> {
        let endpoint = self.endpoint(target)?;
        let connected = if target.skips_verification() {
            warn!("Certificate verification disabled for {}", target.addr);
            let connector = UnverifiedTlsConnector::new(target)?;
            endpoint.connect_with_connector(connector).await
        } else {
            endpoint.connect().await
        };
        connected.map_err(|e| GrottoError::ConnectionError {
            addr: target.addr.clone(),
            message: error_chain(&e),
        })
    }
}

impl Default for GrpcTransport {
    fn default() -> Self {
        Self::new(SessionConfig::CONNECT_TIMEOUT)
    }
}

#[async_trait]
impl Transport for GrpcTransport {
    async fn connect(&self, target: &Target) -> Result<Arc<dyn Connection>> {
        debug!(
            "Dialing {} (tls: {}) for workspace {}",
            target.addr, target.use_tls, target.workspace
        );
        let channel = self.channel(target).await?;
        Ok(Arc::new(GrpcConnection {
            channel,
            addr: target.addr.clone(),
        }))
    }
}

struct GrpcConnection {
    channel: Channel,
    addr: String,
}

#[async_trait]
impl Connection for GrpcConnection {
    async fn start_call(&self, path: &str, metadata: &[Header]) -> Result<Call> {
        let path = PathAndQuery::try_from(path).map_err(|e| GrottoError::InvalidParams {
            message: format!("invalid method path {}: {}", path, e),
        })?;

        let (request_tx, request_rx) = mpsc::channel::<Bytes>(SessionConfig::OUTBOUND_QUEUE);
        let (frame_tx, frame_rx) = mpsc::channel(SessionConfig::INBOUND_QUEUE);

        let mut request = tonic::Request::new(outbound(request_rx));
        *request.metadata_mut() = metadata_map(metadata)?;

        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        grpc.ready()
            .await
            .map_err(|e| GrottoError::ConnectionError {
                addr: self.addr.clone(),
                message: error_chain(&e),
            })?;

        let addr = self.addr.clone();
        tokio::spawn(async move {
            let response = tokio::select! {
                _ = frame_tx.closed() => return,
                response = grpc.streaming(request, path, RawCodec) => response,
            };
            let mut stream = match response {
                Ok(response) => {
                    let (headers, stream, _) = response.into_parts();
                    if frame_tx.send(CallFrame::Headers(headers_of(&headers))).await.is_err() {
                        return;
                    }
                    stream
                }
                Err(status) => {
                    let _ = frame_tx
                        .send(CallFrame::Trailers(headers_of(status.metadata())))
                        .await;
                    let _ = frame_tx.send(CallFrame::Status(status.into())).await;
                    return;
                }
            };

            loop {
                let next = tokio::select! {
                    _ = frame_tx.closed() => {
                        debug!("Call on {} dropped by the session", addr);
                        return;
                    }
                    next = stream.message() => next,
                };
                match next {
                    Ok(Some(payload)) => {
                        if frame_tx.send(CallFrame::Message(payload)).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => {
                        let trailers = match stream.trailers().await {
                            Ok(trailers) => trailers.map(|t| headers_of(&t)).unwrap_or_default(),
                            Err(status) => {
                                let _ = frame_tx.send(CallFrame::Status(status.into())).await;
                                return;
                            }
                        };
                        let _ = frame_tx.send(CallFrame::Trailers(trailers)).await;
                        let _ = frame_tx.send(CallFrame::Status(RpcStatus::ok())).await;
                        return;
                    }
                    Err(status) => {
                        if status.code() == tonic::Code::Unavailable {
                            warn!("Call on {} lost its transport: {}", addr, status.message());
                        }
                        let _ = frame_tx
                            .send(CallFrame::Trailers(headers_of(status.metadata())))
                            .await;
                        let _ = frame_tx.send(CallFrame::Status(status.into())).await;
                        return;
                    }
                }
            }
        });

        Ok(Call {
            requests: request_tx,
            responses: frame_rx,
        })
    }
}

/// Build request metadata. Keys ending in `-bin` carry base64 values.
/// Request stream fed by `rx`; it ends once every sender is dropped.
pub(crate) fn outbound<T>(mut rx: mpsc::Receiver<T>) -> impl Stream<Item = T> + Send + 'static
where
    T: Send + 'static,
{
    futures::stream::poll_fn(move |cx| rx.poll_recv(cx))
}

pub(crate) fn metadata_map(headers: &[Header]) -> Result<MetadataMap> {
    let invalid = |h: &Header, what: &str| GrottoError::Validation {
        field: "metadata".into(),
        message: format!("invalid header {}: {}", h.key, what),
    };

    let mut map = MetadataMap::new();
    for header in headers {
        let key = header.key.trim().to_ascii_lowercase();
        if key.is_empty() {
            continue;
        }
        if key.ends_with("-bin") {
            let key = BinaryMetadataKey::from_bytes(key.as_bytes())
                .map_err(|_| invalid(header, "bad key"))?;
            let raw = STANDARD
                .decode(header.val.trim().as_bytes())
                .map_err(|_| invalid(header, "binary value is not base64"))?;
            map.append_bin(key, BinaryMetadataValue::from_bytes(&raw));
        } else {
            let key = AsciiMetadataKey::from_bytes(key.as_bytes())
                .map_err(|_| invalid(header, "bad key"))?;
            let value = AsciiMetadataValue::try_from(header.val.as_str())
                .map_err(|_| invalid(header, "value is not visible ASCII"))?;
            map.append(key, value);
        }
    }
    Ok(map)
}

/// Flatten response metadata; binary values are rendered as base64.
fn headers_of(map: &MetadataMap) -> Vec<Header> {
    map.iter()
        .filter_map(|entry| match entry {
            KeyAndValueRef::Ascii(key, value) => value
                .to_str()
                .ok()
                .map(|v| Header::new(key.as_str(), v)),
            KeyAndValueRef::Binary(key, value) => value
                .to_bytes()
                .ok()
                .map(|v| Header::new(key.as_str(), STANDARD.encode(v))),
        })
        .collect()
}

/// Render an error with its source chain.
pub(crate) fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

/// Pass-through codec for pre-encoded protobuf payloads.
#[derive(Debug, Clone, Copy, Default)]
struct RawCodec;

impl Codec for RawCodec {
    type Encode = Bytes;
    type Decode = Bytes;
    type Encoder = RawCodec;
    type Decoder = RawCodec;

    fn encoder(&mut self) -> Self::Encoder {
        RawCodec
    }

    fn decoder(&mut self) -> Self::Decoder {
        RawCodec
    }
}

impl Encoder for RawCodec {
    type Item = Bytes;
    type Error = Status;

    fn encode(&mut self, item: Bytes, dst: &mut EncodeBuf<'_>) -> std::result::Result<(), Status> {
        dst.put(item);
        Ok(())
    }
}

impl Decoder for RawCodec {
    type Item = Bytes;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> std::result::Result<Option<Bytes>, Status> {
        let len = src.remaining();
        Ok(Some(src.copy_to_bytes(len)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_outbound_yields_in_order_and_ends_with_senders() {
        use futures::StreamExt;

        let (tx, rx) = mpsc::channel::<Bytes>(4);
        let mut stream = Box::pin(outbound(rx));
        tx.send(Bytes::from_static(b"m1")).await.unwrap();
        tx.send(Bytes::from_static(b"m2")).await.unwrap();
        assert_eq!(stream.next().await.unwrap(), Bytes::from_static(b"m1"));
        assert_eq!(stream.next().await.unwrap(), Bytes::from_static(b"m2"));
        drop(tx);
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn test_metadata_map_handles_ascii_and_binary() {
        let headers = vec![
            Header::new("Authorization", "Bearer abc"),
            Header::new("", "ignored"),
            Header::new("trace-bin", STANDARD.encode([1u8, 2, 3])),
        ];
        let map = metadata_map(&headers).unwrap();
        assert_eq!(map.get("authorization").unwrap().to_str().unwrap(), "Bearer abc");
        assert_eq!(
            map.get_bin("trace-bin").unwrap().to_bytes().unwrap().as_ref(),
            &[1u8, 2, 3]
        );

        let back = headers_of(&map);
        assert!(back.contains(&Header::new("authorization", "Bearer abc")));
        assert!(back.contains(&Header::new("trace-bin", STANDARD.encode([1u8, 2, 3]))));
    }

    #[test]
    fn test_metadata_map_rejects_invalid_value() {
        let err = metadata_map(&[Header::new("x-note", "line\nbreak")]).unwrap_err();
        assert!(matches!(err, GrottoError::Validation { .. }));
    }

    #[test]
    fn test_metadata_map_rejects_binary_value_that_is_not_base64() {
        let err = metadata_map(&[Header::new("trace-bin", "not base64!")]).unwrap_err();
        match err {
            GrottoError::Validation { field, message } => {
                assert_eq!(field, "metadata");
                assert!(message.contains("trace-bin"), "{message}");
            }
            other => panic!("expected a validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_endpoint_accepts_tls_settings() {
        let transport = GrpcTransport::default();
        let target = Target {
            workspace: "prod".into(),
            addr: "api.example.com:443".into(),
            use_tls: true,
            insecure: false,
            root_ca: None,
            client_cert: None,
            client_key: None,
        };
        let endpoint = transport.endpoint(&target).unwrap();
        assert_eq!(endpoint.uri().scheme_str(), Some("https"));
    }

    #[tokio::test]
    async fn test_unverified_endpoint_hands_tls_to_the_connector() {
        let transport = GrpcTransport::default();
        let target = Target {
            workspace: "staging".into(),
            addr: "staging.internal:8443".into(),
            use_tls: true,
            insecure: true,
            root_ca: None,
            client_cert: None,
            client_key: None,
        };
        let endpoint = transport.endpoint(&target).unwrap();
        assert_eq!(endpoint.uri().scheme_str(), Some("http"));
        assert_eq!(endpoint.uri().port_u16(), Some(8443));
    }

    #[tokio::test]
    async fn test_unverified_connect_refused_is_connection_error() {
        let transport = GrpcTransport::new(Duration::from_millis(500));
        let target = Target {
            workspace: "local".into(),
            addr: "127.0.0.1:1".into(),
            use_tls: true,
            insecure: true,
            root_ca: None,
            client_cert: None,
            client_key: None,
        };
        let err = transport.connect(&target).await.err().unwrap();
        assert!(matches!(err, GrottoError::ConnectionError { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        let transport = GrpcTransport::new(Duration::from_millis(500));
        let target = Target {
            workspace: "local".into(),
            addr: "127.0.0.1:1".into(),
            use_tls: false,
            insecure: false,
            root_ca: None,
            client_cert: None,
            client_key: None,
        };
        let err = transport.connect(&target).await.err().unwrap();
        assert!(matches!(err, GrottoError::ConnectionError { .. }), "{err:?}");
    }
}
