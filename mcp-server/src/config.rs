use anyhow::{anyhow, Result};
use reflectrpc_base::{error::ReflectRpcError, DEFAULT_MCP_SERVER_NAME};
use serde::Deserialize;

/// Configuration for MCP Server
#[derive(Clone, Debug, Deserialize)]
pub struct McpServerConfig {
    /// Target gRPC server, `host:port` (`ADDRESS`)
    #[serde(default)]
    pub address: String,
    /// Server name advertised to MCP clients (`MCP_SERVER_NAME`)
    #[serde(default = "default_server_name")]
    pub mcp_server_name: String,
}

fn default_server_name() -> String {
    DEFAULT_MCP_SERVER_NAME.to_string()
}

impl Default for McpServerConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            mcp_server_name: default_server_name(),
        }
    }
}

impl McpServerConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: McpServerConfig = envy::from_iter(vars)
            .map_err(|e| anyhow!("cannot read mcp server config from env: {:?}", e))?;
        if config.address.trim().is_empty() {
            return Err(ReflectRpcError::InvalidParameter(
                "ADDRESS environment variable is required".to_string(),
            )
            .into());
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_default_config() {
        let config = McpServerConfig::default();
        assert!(config.address.is_empty());
        assert_eq!(config.mcp_server_name, "grpcReflectionServer");
    }

    #[test]
    fn test_config_from_vars() {
        let config = McpServerConfig::from_vars(vars(&[
            ("ADDRESS", "localhost:50051"),
            ("MCP_SERVER_NAME", "orders"),
            ("UNRELATED", "x"),
        ]))
        .unwrap();
        assert_eq!(config.address, "localhost:50051");
        assert_eq!(config.mcp_server_name, "orders");

        let config = McpServerConfig::from_vars(vars(&[("ADDRESS", "localhost:50051")])).unwrap();
        assert_eq!(config.mcp_server_name, "grpcReflectionServer");
    }

    #[test]
    fn test_address_is_required() {
        assert!(McpServerConfig::from_vars(vars(&[])).is_err());
        assert!(McpServerConfig::from_vars(vars(&[("ADDRESS", " ")])).is_err());
    }
}
