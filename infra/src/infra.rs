pub mod codec;
pub mod descriptor;
pub mod grpc;
pub mod invoke;
pub mod metadata;
pub mod reflection;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_server;
