use thiserror::Error;
use tonic::Code;

#[derive(Debug, Error)]
pub enum ReflectRpcError {
    #[error("InvalidParameter({0})")]
    InvalidParameter(String),
    #[error("ConnectionError({0})")]
    ConnectionError(String),
    #[error("ReflectionError({0})")]
    ReflectionError(String),
    #[error("NotFound({0})")]
    NotFound(String),
    #[error("CodecError({0})")]
    CodecError(String),
    #[error("code = {} desc = {message}", grpc_code_name(*.code))]
    RpcStatus { code: Code, message: String },
    #[error("Inconsistent({0})")]
    Inconsistent(String),
    #[error("CancelledError({0})")]
    Cancelled(String),
    #[error("TonicClientError(code = {} desc = {})", grpc_code_name(.0.code()), .0.message())]
    TonicClientError(tonic::Status),
}

impl From<tonic::Status> for ReflectRpcError {
    fn from(s: tonic::Status) -> Self {
        ReflectRpcError::TonicClientError(s)
    }
}

/// Canonical gRPC status code names (as printed by grpc-go / grpcurl).
pub fn grpc_code_name(code: Code) -> &'static str {
    match code {
        Code::Ok => "OK",
        Code::Cancelled => "Canceled",
        Code::Unknown => "Unknown",
        Code::InvalidArgument => "InvalidArgument",
        Code::DeadlineExceeded => "DeadlineExceeded",
        Code::NotFound => "NotFound",
        Code::AlreadyExists => "AlreadyExists",
        Code::PermissionDenied => "PermissionDenied",
        Code::ResourceExhausted => "ResourceExhausted",
        Code::FailedPrecondition => "FailedPrecondition",
        Code::Aborted => "Aborted",
        Code::OutOfRange => "OutOfRange",
        Code::Unimplemented => "Unimplemented",
        Code::Internal => "Internal",
        Code::Unavailable => "Unavailable",
        Code::DataLoss => "DataLoss",
        Code::Unauthenticated => "Unauthenticated",
    }
}
