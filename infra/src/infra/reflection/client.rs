use anyhow::Result;
use http::uri::PathAndQuery;
use prost::Message;
use prost_types::FileDescriptorProto;
use reflectrpc_base::error::{grpc_code_name, ReflectRpcError};
use tonic::codec::ProstCodec;
use tonic::transport::Channel;
use tonic::Code;
// v1 and v1alpha messages are wire-identical, the v1 types serve both paths
use tonic_reflection::pb::v1::{
    server_reflection_request::MessageRequest, server_reflection_response::MessageResponse,
    ServerReflectionRequest, ServerReflectionResponse,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReflectionVersion {
    V1,
    V1Alpha,
}

impl ReflectionVersion {
    fn path(&self) -> PathAndQuery {
        match self {
            ReflectionVersion::V1 => PathAndQuery::from_static(
                "/grpc.reflection.v1.ServerReflection/ServerReflectionInfo",
            ),
            ReflectionVersion::V1Alpha => PathAndQuery::from_static(
                "/grpc.reflection.v1alpha.ServerReflection/ServerReflectionInfo",
            ),
        }
    }
}

/// Client for the server reflection protocol.
///
/// Every request opens its own stream carrying exactly one request message.
/// The protocol version is negotiated on the first request (v1, then v1alpha
/// when the server answers UNIMPLEMENTED) and kept for the client's lifetime.
#[derive(Debug, Clone)]
pub struct ReflectionClient {
    grpc: tonic::client::Grpc<Channel>,
    version: Option<ReflectionVersion>,
}

impl ReflectionClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            grpc: tonic::client::Grpc::new(channel),
            version: None,
        }
    }

    pub fn version(&self) -> Option<ReflectionVersion> {
        self.version
    }

    pub async fn list_services(&mut self) -> Result<Vec<String>> {
        match self.request(MessageRequest::ListServices(String::new())).await? {
            MessageResponse::ListServicesResponse(res) => {
                Ok(res.service.into_iter().map(|s| s.name).collect())
            }
            other => Err(unexpected_response("ListServices", &other)),
        }
    }

    /// Files defining `symbol`, plus whatever dependencies the server chose to include.
    pub async fn file_containing_symbol(&mut self, symbol: &str) -> Result<Vec<FileDescriptorProto>> {
        let res = self
            .request(MessageRequest::FileContainingSymbol(symbol.to_string()))
            .await?;
        decode_file_descriptors("FileContainingSymbol", res)
    }

    pub async fn file_by_filename(&mut self, filename: &str) -> Result<Vec<FileDescriptorProto>> {
        let res = self
            .request(MessageRequest::FileByFilename(filename.to_string()))
            .await?;
        decode_file_descriptors("FileByFilename", res)
    }

    async fn request(&mut self, message: MessageRequest) -> Result<MessageResponse> {
        let response = match self.version {
            Some(version) => self.exchange(version, message).await,
            None => match self.exchange(ReflectionVersion::V1, message.clone()).await {
                Ok(res) => {
                    self.version = Some(ReflectionVersion::V1);
                    Ok(res)
                }
                Err(status) if status.code() == Code::Unimplemented => {
                    tracing::debug!("reflection v1 is unimplemented, falling back to v1alpha");
                    let res = self.exchange(ReflectionVersion::V1Alpha, message).await;
                    if res.is_ok() {
                        self.version = Some(ReflectionVersion::V1Alpha);
                    }
                    res
                }
                Err(status) => {
                    if status.code() == Code::NotFound {
                        // answered by a v1 reflection service
                        self.version = Some(ReflectionVersion::V1);
                    }
                    Err(status)
                }
            },
        };
        // tonic-reflection ends the stream with a NOT_FOUND status for unknown
        // symbols and files instead of sending an ErrorResponse
        let response = response.map_err(|status| match status.code() {
            Code::NotFound => ReflectRpcError::NotFound(status.message().to_string()),
            _ => {
                tracing::warn!("reflection request failed: {:?}", status);
                ReflectRpcError::from(status)
            }
        })?;
        match response.message_response {
            Some(MessageResponse::ErrorResponse(err)) => {
                let code = Code::from(err.error_code);
                if code == Code::NotFound {
                    Err(ReflectRpcError::NotFound(err.error_message).into())
                } else {
                    Err(ReflectRpcError::ReflectionError(format!(
                        "code = {} desc = {}",
                        grpc_code_name(code),
                        err.error_message
                    ))
                    .into())
                }
            }
            Some(res) => Ok(res),
            None => Err(ReflectRpcError::ReflectionError(
                "reflection response carried no message".to_string(),
            )
            .into()),
        }
    }

    async fn exchange(
        &mut self,
        version: ReflectionVersion,
        message: MessageRequest,
    ) -> Result<ServerReflectionResponse, tonic::Status> {
        self.grpc.ready().await.map_err(|e| {
            tonic::Status::new(
                Code::Unavailable,
                format!("reflection service was not ready: {}", e),
            )
        })?;
        let request = ServerReflectionRequest {
            host: String::new(),
            message_request: Some(message),
        };
        let codec: ProstCodec<ServerReflectionRequest, ServerReflectionResponse> =
            ProstCodec::default();
        let mut inbound = self
            .grpc
            .streaming(
                tonic::Request::new(tokio_stream::once(request)),
                version.path(),
                codec,
            )
            .await?
            .into_inner();
        inbound.message().await?.ok_or_else(|| {
            tonic::Status::new(Code::Internal, "reflection stream closed without a response")
        })
    }
}

fn decode_file_descriptors(
    request: &str,
    response: MessageResponse,
) -> Result<Vec<FileDescriptorProto>> {
    match response {
        MessageResponse::FileDescriptorResponse(res) => res
            .file_descriptor_proto
            .iter()
            .map(|bytes| {
                FileDescriptorProto::decode(bytes.as_slice()).map_err(|e| {
                    anyhow::Error::from(ReflectRpcError::ReflectionError(format!(
                        "malformed file descriptor in {} response: {}",
                        request, e
                    )))
                })
            })
            .collect(),
        other => Err(unexpected_response(request, &other)),
    }
}

fn unexpected_response(request: &str, response: &MessageResponse) -> anyhow::Error {
    let kind = match response {
        MessageResponse::FileDescriptorResponse(_) => "FileDescriptorResponse",
        MessageResponse::AllExtensionNumbersResponse(_) => "AllExtensionNumbersResponse",
        MessageResponse::ListServicesResponse(_) => "ListServicesResponse",
        MessageResponse::ErrorResponse(_) => "ErrorResponse",
    };
    ReflectRpcError::ReflectionError(format!("unexpected {} to {} request", kind, request)).into()
}
