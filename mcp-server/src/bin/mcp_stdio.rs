//! MCP server with stdio transport.
//!
//! Exposes the reflection-enabled gRPC server at `ADDRESS` as the tools
//! `set-headers`, `invoke`, `list` and `describe`.
//!
//! # Usage
//!
//! Configure in the MCP client settings:
//! ```json
//! {
//!   "mcpServers": {
//!     "grpc": {
//!       "command": "/path/to/mcp-stdio",
//!       "env": {
//!         "ADDRESS": "localhost:50051"
//!       }
//!     }
//!   }
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `ADDRESS`: target server `host:port` (required)
//! - `MCP_SERVER_NAME`: advertised server name
//! - `LOG_LEVEL`, `LOG_FILE_DIR`, `LOG_FILE_NAME`, `LOG_USE_JSON`: logging
//!   (stderr when no file is configured)

use anyhow::Result;
use command_utils::util::tracing::LoggingConfig;
use dotenvy::dotenv;
use mcp_server::{McpHandler, McpServerConfig};
use reflectrpc_base::APP_NAME;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    // stdout carries the MCP protocol: log to a file or stderr only
    let conf = command_utils::util::tracing::load_tracing_config_from_env().unwrap_or_default();
    let file_name = match (&conf.file_dir, &conf.file_name) {
        (Some(_), None) => Some(command_utils::util::tracing::create_filename_with_pid_postfix(
            APP_NAME, "log",
        )),
        _ => conf.file_name.clone(),
    };
    let conf = LoggingConfig {
        file_name,
        use_stdout: false,
        ..conf
    };
    command_utils::util::tracing::tracing_init(conf).await?;

    let config = McpServerConfig::from_env().inspect_err(|e| {
        tracing::error!("invalid configuration: {:?}", e);
    })?;
    let handler = McpHandler::new(config);

    mcp_server::boot_stdio_server(handler).await?;

    tracing::info!("MCP Stdio Server shutdown");
    Ok(())
}
