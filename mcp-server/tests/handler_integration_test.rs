//! Integration tests for MCP Server Handler
//!
//! Each test runs the tools against an in-process reflection server.

use anyhow::Result;
use infra::infra::test_server::TestServer;
use mcp_server::{McpHandler, McpServerConfig};
use rmcp::model::{CallToolResult, JsonObject};
use rmcp::ServerHandler;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

fn args(value: Value) -> Option<JsonObject> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn text_of(result: &CallToolResult) -> String {
    result
        .content
        .iter()
        .filter_map(|c| c.as_text().map(|t| t.text.clone()))
        .collect()
}

fn is_error(result: &CallToolResult) -> bool {
    result.is_error.unwrap_or(false)
}

async fn call(handler: &McpHandler, name: &str, arguments: Value) -> CallToolResult {
    handler
        .dispatch(name, args(arguments), CancellationToken::new())
        .await
        .expect("tool exists")
}

async fn start() -> Result<(TestServer, McpHandler)> {
    command_utils::util::tracing::tracing_init_test(tracing::Level::DEBUG);
    let server = TestServer::spawn().await?;
    let handler = McpHandler::new(McpServerConfig::new(server.address()));
    Ok((server, handler))
}

#[test]
fn test_get_info() {
    let handler = McpHandler::new(McpServerConfig::new("localhost:50051"));
    let info = handler.get_info();

    assert!(info.capabilities.tools.is_some());
    assert_eq!(info.server_info.name, "grpcReflectionServer");
    assert!(!info.server_info.version.is_empty());
    assert!(info.instructions.as_ref().unwrap().contains("describe"));
}

#[tokio::test]
async fn test_set_headers() -> Result<()> {
    let handler = McpHandler::new(McpServerConfig::new("localhost:50051"));

    let result = call(
        &handler,
        "set-headers",
        json!({"headers": r#"{"Authorization": "Bearer a", "x-b": "1"}"#}),
    )
    .await;
    assert!(!is_error(&result));
    assert_eq!(
        text_of(&result),
        "Headers updated successfully:\n{\n  \"authorization\": \"Bearer a\",\n  \"x-b\": \"1\"\n}"
    );

    let result = call(
        &handler,
        "set-headers",
        json!({"headers": r#"{"x-c": "2"}"#, "clear": true}),
    )
    .await;
    assert_eq!(
        text_of(&result),
        "Headers updated successfully:\n{\n  \"x-c\": \"2\"\n}"
    );
    assert_eq!(handler.session_headers().snapshot().await.len(), 1);

    let result = call(&handler, "set-headers", json!({"headers": "{oops"})).await;
    assert!(is_error(&result));
    assert!(text_of(&result).starts_with("Failed to parse headers JSON: "));
    // a failed update leaves the mapping untouched
    assert_eq!(handler.session_headers().snapshot().await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_invoke_with_session_and_call_headers() -> Result<()> {
    let (_server, handler) = start().await?;

    call(
        &handler,
        "set-headers",
        json!({"headers": r#"{"x-request-id": "global"}"#}),
    )
    .await;
    let result = call(
        &handler,
        "invoke",
        json!({
            "method": "greet.Greeter/SayHello",
            "request": r#"{"name": "Ada"}"#,
            "headers": r#"{"x-request-id": "per-call"}"#,
        }),
    )
    .await;
    assert!(!is_error(&result), "{}", text_of(&result));

    let output: Value = serde_json::from_str(&text_of(&result))?;
    let body: Value = serde_json::from_str(output["body"].as_str().unwrap())?;
    assert_eq!(body, json!({"message": "Hello, Ada"}));
    assert_eq!(output["metadata"]["status_code"], "OK");
    assert_eq!(output["headers"]["x-greeting"], "hello");
    assert_eq!(output["headers"]["x-request-id"], json!(["global", "per-call"]));
    Ok(())
}

#[tokio::test]
async fn test_invoke_server_streaming() -> Result<()> {
    let (_server, handler) = start().await?;

    let result = call(
        &handler,
        "invoke",
        json!({"method": "greet.Greeter/SayHellos", "request": r#"{"name": "Bo"}"#}),
    )
    .await;
    let output: Value = serde_json::from_str(&text_of(&result))?;
    assert_eq!(
        output["body"],
        "{\n  \"message\": \"Hello, Bo\"\n}\n{\n  \"message\": \"Goodbye, Bo\"\n}\n"
    );
    Ok(())
}

#[tokio::test]
async fn test_invoke_failures() -> Result<()> {
    let (_server, handler) = start().await?;

    let result = call(
        &handler,
        "invoke",
        json!({"method": "greet.Greeter/SayHelloStrict", "request": "{}"}),
    )
    .await;
    assert!(is_error(&result));
    assert_eq!(
        text_of(&result),
        "RPC failed: code = InvalidArgument desc = name must not be empty"
    );

    let result = call(
        &handler,
        "invoke",
        json!({"method": "greet.Greeter/Missing", "request": "{}"}),
    )
    .await;
    assert!(is_error(&result));
    assert!(text_of(&result).starts_with("Failed to invoke RPC: "));

    let result = call(
        &handler,
        "invoke",
        json!({"method": "greet.Greeter/SayHello", "request": r#"{"nam": "x"}"#}),
    )
    .await;
    assert!(text_of(&result).starts_with("Failed to invoke RPC: "));

    let result = call(
        &handler,
        "invoke",
        json!({"method": "greet.Greeter/SayHello", "request": "{}", "headers": "[]"}),
    )
    .await;
    assert!(text_of(&result).starts_with("Failed to parse headers JSON: "));

    let result = call(&handler, "invoke", json!({"request": "{}"})).await;
    assert!(is_error(&result));
    Ok(())
}

#[tokio::test]
async fn test_connection_failure() {
    let handler = McpHandler::new(McpServerConfig::new("127.0.0.1:1"));
    for (name, arguments) in [
        ("list", json!({})),
        ("describe", json!({"entities": ["greet.Greeter"]})),
        (
            "invoke",
            json!({"method": "greet.Greeter/SayHello", "request": "{}"}),
        ),
    ] {
        let result = call(&handler, name, arguments).await;
        assert!(is_error(&result));
        assert!(
            text_of(&result).starts_with("Failed to create gRPC connection: "),
            "{}: {}",
            name,
            text_of(&result)
        );
    }
}

#[tokio::test]
async fn test_list() -> Result<()> {
    let (_server, handler) = start().await?;

    let result = call(&handler, "list", json!({})).await;
    assert!(!is_error(&result));
    assert_eq!(text_of(&result), "greet.Greeter\nshop.OrderService\n");

    let result = handler
        .dispatch("list", None, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(text_of(&result), "greet.Greeter\nshop.OrderService\n");
    Ok(())
}

#[tokio::test]
async fn test_describe() -> Result<()> {
    let (_server, handler) = start().await?;

    let result = call(&handler, "describe", json!({"entities": ["greet.Greeter"]})).await;
    assert_eq!(
        text_of(&result),
        "greet.Greeter is a service:\n\
         service Greeter {\n\
         \x20 rpc SayHello ( .greet.HelloRequest ) returns ( .greet.HelloReply );\n\
         \x20 rpc SayHellos ( .greet.HelloRequest ) returns ( stream .greet.HelloReply );\n\
         \x20 rpc SayHelloStrict ( .greet.HelloRequest ) returns ( .greet.HelloReply );\n\
         }"
    );

    let result = call(
        &handler,
        "describe",
        json!({"entities": [".greet.Greeter.SayHello", "shop.Order.attributes"]}),
    )
    .await;
    assert_eq!(
        text_of(&result),
        "greet.Greeter.SayHello is a method:\n\
         rpc SayHello ( .greet.HelloRequest ) returns ( .greet.HelloReply );\n\
         \n\
         shop.Order.attributes is a field:\n\
         map<string, string> attributes = 3;"
    );

    let result = call(
        &handler,
        "describe",
        json!({"entities": "greet.HelloRequest, shop.Order.AttributesEntry"}),
    )
    .await;
    assert!(!is_error(&result));
    let text = text_of(&result);
    assert!(text.starts_with("greet.HelloRequest is a message:\nmessage HelloRequest {"));
    assert!(text.ends_with(
        "shop.Order.AttributesEntry is the entry type for a map field:\n\
         map<string, string> attributes = 3;"
    ));
    Ok(())
}

#[tokio::test]
async fn test_describe_sibling_scoped_enum_value() -> Result<()> {
    let (_server, handler) = start().await?;

    let result = call(&handler, "describe", json!({"entities": ["shop.Order.SHIPPED"]})).await;
    assert!(!is_error(&result), "{}", text_of(&result));
    assert_eq!(
        text_of(&result),
        "shop.Order.Status.SHIPPED is an enum value:\nSHIPPED = 2;"
    );
    Ok(())
}

#[tokio::test]
async fn test_describe_errors() -> Result<()> {
    let (_server, handler) = start().await?;

    let result = call(
        &handler,
        "describe",
        json!({"entities": ["greet.Greeter", "greet.Nope"]}),
    )
    .await;
    assert!(is_error(&result));
    assert!(text_of(&result).starts_with("Failed to resolve symbol \"greet.Nope\": "));

    let result = call(&handler, "describe", json!({"entities": ["nonexistent.Symbol"]})).await;
    assert!(is_error(&result));
    assert!(
        text_of(&result).starts_with("Failed to resolve symbol \"nonexistent.Symbol\": NotFound("),
        "{}",
        text_of(&result)
    );
    // a failed describe leaves nothing behind for the next call
    let result = call(&handler, "describe", json!({"entities": ["greet.HelloReply"]})).await;
    assert!(!is_error(&result), "{}", text_of(&result));
    assert_eq!(
        text_of(&result),
        "greet.HelloReply is a message:\nmessage HelloReply {\n  string message = 1;\n}"
    );

    let result = call(&handler, "describe", json!({"entities": []})).await;
    assert_eq!(text_of(&result), "No entities provided");

    let result = call(&handler, "describe", json!({})).await;
    assert_eq!(text_of(&result), "No entities provided");

    let result = call(&handler, "describe", json!({"entities": ["a.B", 7]})).await;
    assert_eq!(
        text_of(&result),
        "entities argument should be an array of strings instead of 7"
    );
    Ok(())
}

#[tokio::test]
async fn test_unknown_tool() {
    let handler = McpHandler::new(McpServerConfig::new("localhost:50051"));
    let result = handler
        .dispatch("delete", None, CancellationToken::new())
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_cancelled_call() -> Result<()> {
    let (_server, handler) = start().await?;
    let ct = CancellationToken::new();
    ct.cancel();

    let result = handler.dispatch("list", None, ct).await.unwrap();
    assert!(is_error(&result));
    Ok(())
}
