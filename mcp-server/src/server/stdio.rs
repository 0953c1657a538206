use crate::handler::McpHandler;
use anyhow::Result;
use rmcp::{transport::stdio, ServiceExt};

/// Boot the MCP Server in Stdio mode.
///
/// Serves until the client closes stdin or the process receives ctrl-c.
pub async fn boot_stdio_server(handler: McpHandler) -> Result<()> {
    tracing::info!(
        "Starting MCP Stdio Server {} for {}",
        handler.config().mcp_server_name,
        handler.config().address
    );

    let service = handler.serve(stdio()).await.inspect_err(|e| {
        tracing::error!("MCP stdio serve error: {:?}", e);
    })?;

    tokio::select! {
        res = service.waiting() => {
            let reason = res?;
            tracing::info!("MCP stdio session ended: {:?}", reason);
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
        }
    }
    Ok(())
}
