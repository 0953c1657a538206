//! MCP server exposing a reflection-enabled gRPC server as tools.
//!
//! ```text
//! MCP client (stdio, JSON-RPC)
//!     │
//!     ▼
//! McpHandler (rmcp::ServerHandler)
//!   set-headers → SessionHeaders
//!   invoke      → infra::invoke
//!   list        → DescriptorSource::list_services
//!   describe    → DescriptorSource::resolve_symbol + descriptor::text
//!     │  one connection per tool call
//!     ▼
//! target gRPC server (ADDRESS)
//! ```
//!
//! # Environment Variables
//!
//! - `ADDRESS`: target server `host:port` (required)
//! - `MCP_SERVER_NAME`: advertised server name (default: grpcReflectionServer)
//! - `LOG_LEVEL`, `LOG_FILE_DIR`, `LOG_FILE_NAME`, `LOG_USE_JSON`: logging

pub mod config;
pub mod handler;
pub mod headers;
pub mod server;
pub mod tools;

pub use config::McpServerConfig;
pub use handler::McpHandler;
pub use server::boot_stdio_server;
