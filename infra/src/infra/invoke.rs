use crate::infra::codec::{self, RawCodec, RequestSupplier};
use crate::infra::descriptor::DescriptorSource;
use crate::infra::grpc::GrpcConnection;
use crate::infra::metadata::{self, MetadataCapture, MetadataMultiMap};
use anyhow::Result;
use http::uri::PathAndQuery;
use prost_reflect::MethodDescriptor;
use reflectrpc_base::error::{grpc_code_name, ReflectRpcError};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tonic::metadata::MetadataMap;
use tonic::Code;

/// Everything observed during one call.
#[derive(Debug, Clone)]
pub struct RpcOutcome {
    /// decoded responses as pretty JSON, in arrival order
    pub responses: Vec<String>,
    pub headers: MetadataMultiMap,
    pub trailers: MetadataMultiMap,
    pub status: Code,
    pub status_message: String,
}

impl RpcOutcome {
    pub fn is_ok(&self) -> bool {
        self.status == Code::Ok
    }

    pub fn status_code_name(&self) -> &'static str {
        grpc_code_name(self.status)
    }

    /// The terminal status as an error, `None` when the call succeeded.
    pub fn status_error(&self) -> Option<ReflectRpcError> {
        (!self.is_ok()).then(|| ReflectRpcError::RpcStatus {
            code: self.status,
            message: self.status_message.clone(),
        })
    }

    /// Response messages, each followed by a newline.
    pub fn body(&self) -> String {
        self.responses.iter().map(|r| format!("{}\n", r)).collect()
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "body": self.body(),
            "headers": self.headers.to_json(),
            "trailers": self.trailers.to_json(),
            "metadata": {
                "status_code": self.status_code_name(),
            },
        })
    }
}

/// Invoke `method` (`pkg.Service/Method`) with one JSON request.
///
/// `headers` are `name: value` lines sent as request metadata. A non-OK
/// terminal status is reported in the outcome, not as an error: errors are
/// left for failures that keep the call from completing.
pub async fn invoke<S: AsRef<str>>(
    connection: &GrpcConnection,
    method: &str,
    headers: &[S],
    request_json: &str,
    ct: &CancellationToken,
) -> Result<RpcOutcome> {
    let mut source = DescriptorSource::new(connection);
    let call = async {
        let method = source.resolve_method(method).await?;
        let metadata = metadata::parse_header_lines(headers)?;
        let request = codec::encode_json(&method.input(), request_json)?;
        execute(connection, &method, metadata, request).await
    };
    tokio::select! {
        biased;
        _ = ct.cancelled() => Err(ReflectRpcError::Cancelled(format!(
            "call to {} was cancelled",
            method
        ))
        .into()),
        res = call => res,
    }
}

async fn execute(
    connection: &GrpcConnection,
    method: &MethodDescriptor,
    metadata: MetadataMap,
    request: bytes::Bytes,
) -> Result<RpcOutcome> {
    let path = format!("/{}/{}", method.parent_service().full_name(), method.name());
    let path = PathAndQuery::try_from(path.as_str()).map_err(|e| {
        ReflectRpcError::InvalidParameter(format!("invalid method path {}: {}", path, e))
    })?;

    let mut grpc = tonic::client::Grpc::new(connection.channel());
    grpc.ready().await.map_err(|e| {
        ReflectRpcError::ConnectionError(format!("channel was not ready: {}", e))
    })?;

    let mut req = tonic::Request::new(RequestSupplier::new(request).into_stream());
    *req.metadata_mut() = metadata;

    tracing::debug!("invoke {}", path);
    let output = method.output();
    let mut capture = MetadataCapture::default();
    let mut responses = Vec::new();
    // every method shape goes through the streaming path: one request, any number of responses
    let (status, status_message) = match grpc.streaming(req, path, RawCodec).await {
        Ok(response) => {
            capture.on_headers(response.metadata());
            let mut stream = response.into_inner();
            loop {
                match stream.message().await {
                    Ok(Some(bytes)) => responses.push(codec::decode_to_json(&output, &bytes)?),
                    Ok(None) => {
                        match stream.trailers().await {
                            Ok(Some(trailers)) => capture.on_trailers(&trailers),
                            Ok(None) => {}
                            Err(status) => {
                                capture.on_trailers(status.metadata());
                                break (status.code(), status.message().to_string());
                            }
                        }
                        break (Code::Ok, String::new());
                    }
                    Err(status) => {
                        capture.on_trailers(status.metadata());
                        break (status.code(), status.message().to_string());
                    }
                }
            }
        }
        // trailers-only response: its metadata is all the call produced
        Err(status) => {
            capture.on_trailers(status.metadata());
            (status.code(), status.message().to_string())
        }
    };
    if status != Code::Ok {
        tracing::info!(
            "call {} ended with {}: {}",
            method.full_name(),
            grpc_code_name(status),
            status_message
        );
    }

    let (headers, trailers) = capture.into_parts();
    Ok(RpcOutcome {
        responses,
        headers,
        trailers,
        status,
        status_message,
    })
}
