use rmcp::model::{JsonObject, Tool};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

pub const SET_HEADERS: &str = "set-headers";
pub const INVOKE: &str = "invoke";
pub const LIST: &str = "list";
pub const DESCRIBE: &str = "describe";

const SET_HEADERS_DESCRIPTION: &str = r#"Set global headers to be used with all future gRPC requests.
Parameters:
 - "headers": JSON object with header key-value pairs, e.g. {"Authorization": "Bearer <token>"}.
 - "clear": (Optional) Boolean to clear all existing headers before setting new ones."#;

const INVOKE_DESCRIPTION: &str = r#"Invokes a gRPC method using reflection.
Parameters:
 - "method": Fully-qualified method name (e.g., package.Service/Method).
 - "request": JSON payload for the request.
 - "headers": (Optional) JSON object for custom gRPC headers that will be merged with global headers."#;

const LIST_DESCRIPTION: &str =
    "Lists all available gRPC services on the target server using reflection.";

const DESCRIBE_DESCRIPTION: &str = r#"Describes a gRPC service or message type.
Provide the target entity using dot notation.
Examples:
 - "mypackage.MyService" to describe the service.
 - "mypackage.MyService.MyRpc" to describe a specific RPC method.
 - "mypackage.MyMessage" to describe a message type.
Note: Slash notation (e.g., "mypackage.MyService/MyMethod") is used for invoking RPCs, not for describing symbols."#;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SetHeadersArgs {
    /// JSON object with header key-value pairs
    pub headers: String,
    /// Clear existing headers before setting new ones
    #[serde(default)]
    pub clear: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct InvokeArgs {
    /// Fully-qualified method name (e.g., package.Service/Method)
    pub method: String,
    /// JSON request payload
    pub request: String,
    /// Optional JSON object for request-specific headers
    #[serde(default)]
    pub headers: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListArgs {}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DescribeArgs {
    /// The services or messages type to describe (use dot notation)
    pub entities: Vec<String>,
}

fn input_schema<T: JsonSchema>() -> Arc<JsonObject> {
    match serde_json::to_value(schemars::schema_for!(T)) {
        Ok(Value::Object(mut schema)) => {
            schema.remove("$schema");
            Arc::new(schema)
        }
        _ => {
            let mut schema = JsonObject::new();
            schema.insert("type".to_string(), Value::String("object".to_string()));
            Arc::new(schema)
        }
    }
}

pub fn tool_definitions() -> Vec<Tool> {
    vec![
        Tool::new(
            SET_HEADERS,
            SET_HEADERS_DESCRIPTION,
            input_schema::<SetHeadersArgs>(),
        ),
        Tool::new(INVOKE, INVOKE_DESCRIPTION, input_schema::<InvokeArgs>()),
        Tool::new(LIST, LIST_DESCRIPTION, input_schema::<ListArgs>()),
        Tool::new(DESCRIBE, DESCRIBE_DESCRIPTION, input_schema::<DescribeArgs>()),
    ]
}

/// Deserialize tool arguments into `T`.
pub fn parse_args<T: serde::de::DeserializeOwned>(args: JsonObject) -> Result<T, String> {
    serde_json::from_value(Value::Object(args))
        .map_err(|e| format!("Failed to parse arguments: {}", e))
}

/// `entities` as a comma-separated string or an array of strings.
pub fn parse_entities(value: Option<&Value>) -> Result<Vec<String>, String> {
    let entities: Vec<String> = match value {
        Some(Value::String(s)) => s.split(',').map(|e| e.trim().to_string()).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.trim().to_string()),
                other => Err(format!(
                    "entities argument should be an array of strings instead of {}",
                    other
                )),
            })
            .collect::<Result<_, _>>()?,
        _ => Vec::new(),
    };
    let entities: Vec<String> = entities.into_iter().filter(|e| !e.is_empty()).collect();
    if entities.is_empty() {
        return Err("No entities provided".to_string());
    }
    Ok(entities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_definitions() {
        let tools = tool_definitions();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_ref()).collect();
        assert_eq!(names, vec![SET_HEADERS, INVOKE, LIST, DESCRIBE]);

        let describe = tools.iter().find(|t| t.name == DESCRIBE).unwrap();
        let schema = Value::Object(describe.input_schema.as_ref().clone());
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["entities"]["type"], "array");
        assert_eq!(schema["properties"]["entities"]["items"]["type"], "string");
        assert_eq!(schema["required"], json!(["entities"]));

        let invoke = tools.iter().find(|t| t.name == INVOKE).unwrap();
        let schema = Value::Object(invoke.input_schema.as_ref().clone());
        let required = schema["required"].as_array().unwrap();
        assert!(required.contains(&json!("method")));
        assert!(required.contains(&json!("request")));
        assert!(!required.contains(&json!("headers")));
    }

    #[test]
    fn test_parse_entities_string() {
        assert_eq!(
            parse_entities(Some(&json!("greet.Greeter, greet.HelloRequest"))).unwrap(),
            vec!["greet.Greeter", "greet.HelloRequest"]
        );
    }

    #[test]
    fn test_parse_entities_array() {
        assert_eq!(
            parse_entities(Some(&json!(["a.B", " c.D "]))).unwrap(),
            vec!["a.B", "c.D"]
        );
    }

    #[test]
    fn test_parse_entities_errors() {
        assert_eq!(
            parse_entities(Some(&json!(["a.B", 1]))).unwrap_err(),
            "entities argument should be an array of strings instead of 1"
        );
        assert_eq!(
            parse_entities(Some(&json!([{"x": 1}]))).unwrap_err(),
            r#"entities argument should be an array of strings instead of {"x":1}"#
        );
        assert_eq!(parse_entities(None).unwrap_err(), "No entities provided");
        assert_eq!(
            parse_entities(Some(&json!([]))).unwrap_err(),
            "No entities provided"
        );
        assert_eq!(
            parse_entities(Some(&json!(" , "))).unwrap_err(),
            "No entities provided"
        );
        assert_eq!(
            parse_entities(Some(&json!(true))).unwrap_err(),
            "No entities provided"
        );
    }

    #[test]
    fn test_parse_args() {
        let mut args = JsonObject::new();
        args.insert("method".to_string(), json!("greet.Greeter/SayHello"));
        args.insert("request".to_string(), json!("{}"));
        let parsed: InvokeArgs = parse_args(args).unwrap();
        assert_eq!(parsed.method, "greet.Greeter/SayHello");
        assert!(parsed.headers.is_none());

        let err = parse_args::<InvokeArgs>(JsonObject::new()).unwrap_err();
        assert!(err.starts_with("Failed to parse arguments: "));
    }
}
