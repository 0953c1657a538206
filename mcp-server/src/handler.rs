use crate::config::McpServerConfig;
use crate::headers::{self, SessionHeaders};
use crate::tools::{self, InvokeArgs, SetHeadersArgs};
use infra::infra::descriptor::{text, DescriptorSource};
use infra::infra::grpc::GrpcConnection;
use infra::infra::invoke;
use reflectrpc_base::error::ReflectRpcError;
use rmcp::{
    handler::server::ServerHandler,
    model::{
        CallToolRequestParam, CallToolResult, Content, JsonObject, ListToolsResult,
        PaginatedRequestParam, ServerCapabilities, ServerInfo,
    },
    service::RequestContext,
    ErrorData, RoleServer,
};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const INSTRUCTIONS: &str = "Tools for a gRPC server that supports server reflection. \
Use 'list' to discover services, 'describe' to inspect services, methods and messages, \
'invoke' to call a method with a JSON request, and 'set-headers' to send metadata with every call.";

type ToolOutput = Result<String, String>;

/// MCP handler bridging tool calls to the target gRPC server.
///
/// Clones share the session headers.
#[derive(Clone)]
pub struct McpHandler {
    config: Arc<McpServerConfig>,
    headers: SessionHeaders,
}

impl McpHandler {
    pub fn new(config: McpServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            headers: SessionHeaders::default(),
        }
    }

    pub fn config(&self) -> &McpServerConfig {
        &self.config
    }

    pub fn session_headers(&self) -> &SessionHeaders {
        &self.headers
    }

    /// Run tool `name`. Tool failures are error results; only an unknown tool
    /// is an error of the request itself.
    pub async fn dispatch(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
        ct: CancellationToken,
    ) -> Result<CallToolResult, ErrorData> {
        let arguments = arguments.unwrap_or_default();
        tracing::debug!("call tool: {}", name);
        let output = match name {
            tools::SET_HEADERS => self.set_headers(arguments).await,
            tools::INVOKE => self.invoke(arguments, &ct).await,
            tools::LIST => self.list(&ct).await,
            tools::DESCRIBE => self.describe(arguments, &ct).await,
            _ => {
                return Err(ErrorData::invalid_params(
                    format!("tool not found: {}", name),
                    None,
                ))
            }
        };
        Ok(match output {
            Ok(text) => CallToolResult::success(vec![Content::text(text)]),
            Err(message) => {
                tracing::info!("tool {} failed: {}", name, message);
                CallToolResult::error(vec![Content::text(message)])
            }
        })
    }

    async fn set_headers(&self, arguments: JsonObject) -> ToolOutput {
        let args: SetHeadersArgs = tools::parse_args(arguments)?;
        let parsed = headers::parse_headers_json(&args.headers)
            .map_err(|e| format!("Failed to parse headers JSON: {}", e))?;
        let current = self.headers.set(parsed, args.clear).await;
        let pretty = serde_json::to_string_pretty(&current)
            .map_err(|e| format!("Failed to marshal headers: {}", e))?;
        Ok(format!("Headers updated successfully:\n{}", pretty))
    }

    async fn invoke(&self, arguments: JsonObject, ct: &CancellationToken) -> ToolOutput {
        let args: InvokeArgs = tools::parse_args(arguments)?;
        let per_call = match args.headers.as_deref() {
            Some(json) if !json.is_empty() => headers::parse_headers_json(json)
                .map_err(|e| format!("Failed to parse headers JSON: {}", e))?,
            _ => Default::default(),
        };
        let global = self.headers.snapshot().await;
        let lines = headers::call_header_lines(&global, &per_call);

        let connection = self.connect(ct).await?;
        let outcome = invoke::invoke(&connection, &args.method, &lines, &args.request, ct)
            .await
            .map_err(|e| format!("Failed to invoke RPC: {}", e))?;
        if let Some(err) = outcome.status_error() {
            return Err(format!("RPC failed: {}", err));
        }
        serde_json::to_string_pretty(&outcome.to_json())
            .map_err(|e| format!("Failed to marshal response: {}", e))
    }

    async fn list(&self, ct: &CancellationToken) -> ToolOutput {
        let connection = self.connect(ct).await?;
        let mut source = DescriptorSource::new(&connection);
        let services = cancellable(ct, source.list_services())
            .await
            .map_err(|e| format!("Failed to list services: {}", e))?;
        Ok(services.iter().map(|s| format!("{}\n", s)).collect())
    }

    async fn describe(&self, arguments: JsonObject, ct: &CancellationToken) -> ToolOutput {
        let entities = tools::parse_entities(arguments.get("entities"))?;
        let connection = self.connect(ct).await?;
        let mut source = DescriptorSource::new(&connection);

        let mut results = Vec::with_capacity(entities.len());
        for entity in entities {
            let entity = entity.strip_prefix('.').unwrap_or(&entity).to_string();
            let descriptor = cancellable(ct, source.resolve_symbol(&entity))
                .await
                .map_err(|e| format!("Failed to resolve symbol {:?}: {}", entity, e))?;
            let element = descriptor
                .described_element()
                .map_err(|e| format!("Failed to describe symbol {:?}: {}", entity, e))?;
            results.push(format!(
                "{} is {}:\n{}",
                descriptor.full_name(),
                descriptor.kind().label(),
                text::render(&element)
            ));
        }
        Ok(results.join("\n\n"))
    }

    async fn connect(&self, ct: &CancellationToken) -> Result<GrpcConnection, String> {
        GrpcConnection::dial_with_cancel(&self.config.address, ct)
            .await
            .map_err(|e| format!("Failed to create gRPC connection: {}", e))
    }
}

async fn cancellable<T>(
    ct: &CancellationToken,
    fut: impl Future<Output = anyhow::Result<T>>,
) -> anyhow::Result<T> {
    tokio::select! {
        biased;
        _ = ct.cancelled() => Err(ReflectRpcError::Cancelled("request was cancelled".to_string()).into()),
        res = fut => res,
    }
}

impl ServerHandler for McpHandler {
    fn get_info(&self) -> ServerInfo {
        let mut info = ServerInfo::default();
        info.capabilities = ServerCapabilities::builder().enable_tools().build();
        info.server_info.name = self.config.mcp_server_name.clone();
        info.server_info.version = env!("CARGO_PKG_VERSION").to_string();
        info.instructions = Some(INSTRUCTIONS.to_string());
        info
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListToolsResult, ErrorData>> + Send + '_ {
        async move { Ok(ListToolsResult::with_all_items(tools::tool_definitions())) }
    }

    fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<CallToolResult, ErrorData>> + Send + '_ {
        async move {
            self.dispatch(&request.name, request.arguments, context.ct)
                .await
        }
    }
}
