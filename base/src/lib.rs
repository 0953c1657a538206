use std::time::Duration;

pub mod error;

pub static APP_NAME: &str = "reflectrpc";
pub static DEFAULT_MCP_SERVER_NAME: &str = "grpcReflectionServer";

/// upper bound for establishing a connection to the target server
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

pub static REFLECTION_V1_SERVICE: &str = "grpc.reflection.v1.ServerReflection";
pub static REFLECTION_V1ALPHA_SERVICE: &str = "grpc.reflection.v1alpha.ServerReflection";

/// true for the reflection meta-service itself (any protocol version)
pub fn is_reflection_service(name: &str) -> bool {
    name == REFLECTION_V1_SERVICE || name == REFLECTION_V1ALPHA_SERVICE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_reflection_service() {
        assert!(is_reflection_service("grpc.reflection.v1.ServerReflection"));
        assert!(is_reflection_service(
            "grpc.reflection.v1alpha.ServerReflection"
        ));
        assert!(!is_reflection_service("greet.Greeter"));
        assert!(!is_reflection_service("grpc.health.v1.Health"));
    }
}
