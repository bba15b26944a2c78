//! TLS connector that accepts any server certificate.
//!
//! Used when a workspace sets `insecure`. Handshake signatures are still
//! checked, so the peer must hold the key for the certificate it presents;
//! only the chain of trust and the host name are ignored.

use super::Target;
use crate::{GrottoError, Result};
use futures::future::BoxFuture;
use hyper_util::rt::TokioIo;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{ring, verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use std::io;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tonic::codegen::http::Uri;
use tower::Service;

const HTTPS_PORT: u16 = 443;

#[derive(Debug)]
struct AcceptAnyCertificate {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// rustls client config for `target`: no certificate checks, h2 ALPN and
/// the workspace's client identity when one is configured.
pub(crate) fn client_config(target: &Target) -> Result<ClientConfig> {
    let tls_error = |message: String| GrottoError::ConnectionError {
        addr: target.addr.clone(),
        message,
    };

    let provider = Arc::new(ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| tls_error(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate { provider }));

    let mut config = match (&target.client_cert, &target.client_key) {
        (Some(cert), Some(key)) => {
            let chain = CertificateDer::pem_slice_iter(cert.as_bytes())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| tls_error(format!("invalid client certificate: {}", e)))?;
            let key = PrivateKeyDer::from_pem_slice(key.as_bytes())
                .map_err(|e| tls_error(format!("invalid client key: {}", e)))?;
            builder
                .with_client_auth_cert(chain, key)
                .map_err(|e| tls_error(e.to_string()))?
        }
        _ => builder.with_no_client_auth(),
    };
    config.alpn_protocols = vec![b"h2".to_vec()];
    Ok(config)
}

/// Dials TCP and runs the unverified TLS handshake for tonic.
#[derive(Clone)]
pub(crate) struct UnverifiedTlsConnector {
    tls: TlsConnector,
}

impl UnverifiedTlsConnector {
    pub(crate) fn new(target: &Target) -> Result<Self> {
        let config = client_config(target)?;
        Ok(Self {
            tls: TlsConnector::from(Arc::new(config)),
        })
    }
}

impl Service<Uri> for UnverifiedTlsConnector {
    type Response = TokioIo<TlsStream<TcpStream>>;
    type Error = io::Error;
    type Future = BoxFuture<'static, io::Result<Self::Response>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let tls = self.tls.clone();
        Box::pin(async move {
            let host = uri
                .host()
                .map(|h| h.trim_matches(|c| c == '[' || c == ']').to_string())
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "address has no host"))?;
            let port = uri.port_u16().unwrap_or(HTTPS_PORT);
            let server_name = ServerName::try_from(host.clone())
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

            let tcp = TcpStream::connect((host.as_str(), port)).await?;
            tcp.set_nodelay(true)?;
            let stream = tls.connect(server_name, tcp).await?;
            Ok(TokioIo::new(stream))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> Target {
        Target {
            workspace: "staging".into(),
            addr: "staging.internal:8443".into(),
            use_tls: true,
            insecure: true,
            root_ca: None,
            client_cert: None,
            client_key: None,
        }
    }

    #[test]
    fn test_client_config_negotiates_h2() {
        let config = client_config(&target()).unwrap();
        assert_eq!(config.alpn_protocols, vec![b"h2".to_vec()]);
    }

    #[test]
    fn test_verifier_accepts_any_certificate() {
        let verifier = AcceptAnyCertificate {
            provider: Arc::new(ring::default_provider()),
        };
        let cert = CertificateDer::from(vec![0x30, 0x03, 0x02, 0x01, 0x00]);
        let name = ServerName::try_from("self-signed.invalid").unwrap();
        assert!(verifier
            .verify_server_cert(&cert, &[], &name, &[], UnixTime::now())
            .is_ok());
        assert!(!verifier.supported_verify_schemes().is_empty());
    }

    #[test]
    fn test_client_config_rejects_garbage_identity() {
        let mut target = target();
        target.client_cert = Some("not a certificate".into());
        target.client_key = Some("not a key".into());
        let err = client_config(&target).unwrap_err();
        assert!(matches!(err, GrottoError::ConnectionError { .. }), "{err:?}");
    }
}
