//! `grpc.reflection.v1.ServerReflection` client.

use super::grpc::{error_chain, metadata_map, outbound};
use super::{GrpcTransport, ReflectionClient, Target};
use crate::workspace::Header;
use crate::{GrottoError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet, VecDeque};
use tokio::sync::mpsc;
use tonic::Streaming;
use tonic_reflection::pb::v1::server_reflection_client::ServerReflectionClient;
use tonic_reflection::pb::v1::server_reflection_request::MessageRequest;
use tonic_reflection::pb::v1::server_reflection_response::MessageResponse;
use tonic_reflection::pb::v1::{ServerReflectionRequest, ServerReflectionResponse};
use tracing::debug;

const REFLECTION_SERVICE: &str = "grpc.reflection.v1.ServerReflection";
const REFLECTION_SERVICE_ALPHA: &str = "grpc.reflection.v1alpha.ServerReflection";

/// Fetches every file descriptor reachable from the server's services.
#[derive(Debug, Clone, Default)]
pub struct GrpcReflectionClient {
    transport: GrpcTransport,
}

impl GrpcReflectionClient {
    pub fn new(transport: GrpcTransport) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl ReflectionClient for GrpcReflectionClient {
    async fn file_descriptors(&self, target: &Target, headers: &[Header]) -> Result<Vec<Vec<u8>>> {
        let unavailable = |message: String| GrottoError::ReflectionUnavailable {
            addr: target.addr.clone(),
            message,
        };

        let channel = self
            .transport
            .channel(target)
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        let mut client = ServerReflectionClient::new(channel);

        let (request_tx, request_rx) = mpsc::channel::<ServerReflectionRequest>(4);
        let mut request = tonic::Request::new(outbound(request_rx));
        *request.metadata_mut() = metadata_map(headers)?;

        let host = target
            .uri()
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();
        let ask = |message: MessageRequest| ServerReflectionRequest {
            host: host.clone(),
            message_request: Some(message),
        };

        request_tx
            .send(ask(MessageRequest::ListServices(String::new())))
            .await
            .map_err(|_| unavailable("reflection stream closed".into()))?;
        let mut responses = client
            .server_reflection_info(request)
            .await
            .map_err(|status| unavailable(format!("{}: {}", status.code(), status.message())))?
            .into_inner();

        let services = match next_response(&mut responses, target).await? {
            MessageResponse::ListServicesResponse(list) => list
                .service
                .into_iter()
                .map(|s| s.name)
                .filter(|n| n != REFLECTION_SERVICE && n != REFLECTION_SERVICE_ALPHA)
                .collect::<Vec<_>>(),
            other => return Err(unexpected(target, &other)),
        };
        debug!("Reflection on {} lists {} service(s)", target.addr, services.len());

        let mut files: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        let mut wanted: VecDeque<String> = VecDeque::new();
        let mut requested: HashSet<String> = HashSet::new();

        for service in &services {
            request_tx
                .send(ask(MessageRequest::FileContainingSymbol(service.clone())))
                .await
                .map_err(|_| unavailable("reflection stream closed".into()))?;
            let response = next_response(&mut responses, target).await?;
            collect_files(target, response, &mut files, &mut wanted)?;
        }

        while let Some(name) = wanted.pop_front() {
            if files.contains_key(&name) || !requested.insert(name.clone()) {
                continue;
            }
            request_tx
                .send(ask(MessageRequest::FileByFilename(name.clone())))
                .await
                .map_err(|_| unavailable("reflection stream closed".into()))?;
            match next_response(&mut responses, target).await? {
                // Well-known imports are often not served; the built-in
                // definitions cover them.
                MessageResponse::ErrorResponse(err) => {
                    debug!("Dependency {} not served: {}", name, err.error_message);
                }
                response => collect_files(target, response, &mut files, &mut wanted)?,
            }
        }

        Ok(files.into_values().collect())
    }
}

async fn next_response(
    responses: &mut Streaming<ServerReflectionResponse>,
    target: &Target,
) -> Result<MessageResponse> {
    let response = responses
        .message()
        .await
        .map_err(|status| GrottoError::ReflectionUnavailable {
            addr: target.addr.clone(),
            message: format!("{}: {}", status.code(), status.message()),
        })?
        .ok_or_else(|| GrottoError::ReflectionUnavailable {
            addr: target.addr.clone(),
            message: "reflection stream ended early".into(),
        })?;
    response
        .message_response
        .ok_or_else(|| GrottoError::ReflectionUnavailable {
            addr: target.addr.clone(),
            message: "empty reflection response".into(),
        })
}

/// Record returned files and queue their not-yet-seen dependencies.
fn collect_files(
    target: &Target,
    response: MessageResponse,
    files: &mut BTreeMap<String, Vec<u8>>,
    wanted: &mut VecDeque<String>,
) -> Result<()> {
    use prost::Message;

    let blobs = match response {
        MessageResponse::FileDescriptorResponse(found) => found.file_descriptor_proto,
        MessageResponse::ErrorResponse(err) => {
            return Err(GrottoError::ReflectionUnavailable {
                addr: target.addr.clone(),
                message: format!("server error {}: {}", err.error_code, err.error_message),
            })
        }
        other => return Err(unexpected(target, &other)),
    };

    for blob in blobs {
        let file = prost_types::FileDescriptorProto::decode(blob.as_slice()).map_err(|e| {
            GrottoError::ReflectionUnavailable {
                addr: target.addr.clone(),
                message: format!("invalid descriptor: {}", error_chain(&e)),
            }
        })?;
        for dependency in &file.dependency {
            if !files.contains_key(dependency) {
                wanted.push_back(dependency.clone());
            }
        }
        files.entry(file.name().to_string()).or_insert(blob);
    }
    Ok(())
}

fn unexpected(target: &Target, response: &MessageResponse) -> GrottoError {
    let kind = match response {
        MessageResponse::FileDescriptorResponse(_) => "file descriptor",
        MessageResponse::AllExtensionNumbersResponse(_) => "extension numbers",
        MessageResponse::ListServicesResponse(_) => "service list",
        MessageResponse::ErrorResponse(_) => "error",
    };
    GrottoError::ReflectionUnavailable {
        addr: target.addr.clone(),
        message: format!("unexpected {} response", kind),
    }
}
