mod error;
mod http;
mod stdio;
mod transport;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use super::interface::{Tool, ToolArgs, ToolError};

pub use error::McpError;
pub use transport::{McpTransport, TransportKind};

const PROTOCOL_VERSION: &str = "2025-06-18";

/// One agent tool wrapping one MCP server. The server's own tool catalog is
/// discovered at construction and addressed through the `tool_name`
/// parameter; the agent-visible name (`mcp`, `mcp2`, `mcp_<label>`) is
/// assigned by the embedder from the CLI spec.
pub struct McpTool {
    name: String,
    transport: Arc<dyn McpTransport>,
    catalog: Vec<SubTool>,
    index: HashMap<String, usize>,
}

#[derive(Debug, Clone)]
struct SubTool {
    name: String,
    description: Option<String>,
    input_schema: Option<Value>,
}

impl McpTool {
    /// Connects to the target (stdio command line or HTTP/SSE URL), runs the
    /// initialisation handshake, and caches the discovered tool catalog.
    pub async fn connect(name: impl Into<String>, target: &str) -> Result<Self, McpError> {
        let name = name.into();
        let transport = transport::connect(&name, target).await?;
        Self::with_transport(name, transport).await
    }

    pub(crate) async fn with_transport(
        name: String,
        transport: Arc<dyn McpTransport>,
    ) -> Result<Self, McpError> {
        let init = transport
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "clientInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                    "capabilities": {},
                }),
            )
            .await?;
        if let Some(instructions) = init.get("instructions").and_then(Value::as_str) {
            debug!(server = name.as_str(), instructions, "server instructions");
        }
        transport
            .notify("notifications/initialized", json!({}))
            .await?;

        let listed = transport.request("tools/list", json!({})).await?;
        let catalog = parse_catalog(&listed);
        info!(
            server = name.as_str(),
            tools = catalog.len(),
            "MCP server initialised"
        );

        let index = catalog
            .iter()
            .enumerate()
            .map(|(position, tool)| (tool.name.clone(), position))
            .collect();

        Ok(Self {
            name,
            transport,
            catalog,
            index,
        })
    }

    pub fn tool_count(&self) -> usize {
        self.catalog.len()
    }

    fn sub_tool_names(&self) -> Vec<&str> {
        self.catalog.iter().map(|tool| tool.name.as_str()).collect()
    }
}

fn parse_catalog(listed: &Value) -> Vec<SubTool> {
    listed
        .get("tools")
        .and_then(Value::as_array)
        .map(|tools| {
            tools
                .iter()
                .filter_map(|tool| {
                    let name = tool.get("name").and_then(Value::as_str)?;
                    Some(SubTool {
                        name: name.to_string(),
                        description: tool
                            .get("description")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        input_schema: tool.get("inputSchema").cloned(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Joins the text-content parts of a `tools/call` result into one string.
fn flatten_text_content(result: &Value) -> String {
    let Some(parts) = result.get("content").and_then(Value::as_array) else {
        return String::new();
    };

    let texts: Vec<&str> = parts
        .iter()
        .filter(|part| {
            part.get("type")
                .and_then(Value::as_str)
                .is_some_and(|kind| kind.eq_ignore_ascii_case("text"))
        })
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    texts.join("\n").trim().to_string()
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> String {
        let names = self.sub_tool_names();
        if names.is_empty() {
            format!("Call tools on the '{}' MCP server.", self.name)
        } else {
            format!(
                "Call tools on the '{}' MCP server. Available tools: {}",
                self.name,
                names.join(", ")
            )
        }
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "tool_name": {
                    "type": "string",
                    "description": "Name of the MCP tool to call",
                    "enum": self.sub_tool_names(),
                },
                "arguments": {
                    "type": "object",
                    "description": "Arguments object for the selected tool",
                },
            },
            "required": ["tool_name"],
        })
    }

    async fn invoke(&self, args: &ToolArgs) -> Result<String, ToolError> {
        let tool_name = args
            .get("tool_name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .ok_or(ToolError::MissingParameter { name: "tool_name" })?;
        if !self.index.contains_key(tool_name) {
            return Err(McpError::UnknownSubTool {
                tool: tool_name.to_string(),
                available: self.sub_tool_names().join(", "),
            }
            .into());
        }

        let arguments = match args.get("arguments") {
            Some(Value::Object(map)) => Value::Object(map.clone()),
            _ => Value::Object(Map::new()),
        };

        debug!(server = %self.name, tool = tool_name, "dispatching MCP tool call");
        let result = self
            .transport
            .request(
                "tools/call",
                json!({ "name": tool_name, "arguments": arguments }),
            )
            .await
            .map_err(ToolError::from)?;

        let text = flatten_text_content(&result);
        let is_error = result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if is_error {
            return Err(McpError::SubToolFailed {
                tool: tool_name.to_string(),
                message: if text.is_empty() {
                    "(no output)".to_string()
                } else {
                    text
                },
            }
            .into());
        }

        if text.is_empty() {
            return Ok("(no output)".to_string());
        }
        Ok(text)
    }

    async fn release(&self) {
        self.transport.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    /// Scripted transport: records every outbound call and replays canned
    /// results keyed by method.
    struct StubTransport {
        calls: Mutex<Vec<(String, Value)>>,
        tools_result: Value,
        call_result: Value,
    }

    impl StubTransport {
        fn new(tools_result: Value, call_result: Value) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                tools_result,
                call_result,
            })
        }

        async fn calls(&self) -> Vec<(String, Value)> {
            self.calls.lock().await.clone()
        }
    }

    #[async_trait]
    impl McpTransport for StubTransport {
        async fn request(&self, method: &str, params: Value) -> Result<Value, McpError> {
            self.calls
                .lock()
                .await
                .push((method.to_string(), params));
            match method {
                "initialize" => Ok(json!({"protocolVersion": PROTOCOL_VERSION})),
                "tools/list" => Ok(self.tools_result.clone()),
                "tools/call" => Ok(self.call_result.clone()),
                other => Err(McpError::Rpc {
                    server: "stub".to_string(),
                    code: -32601,
                    message: format!("unexpected method {other}"),
                }),
            }
        }

        async fn notify(&self, method: &str, params: Value) -> Result<(), McpError> {
            self.calls
                .lock()
                .await
                .push((method.to_string(), params));
            Ok(())
        }

        async fn close(&self) {}
    }

    fn file_server_tools() -> Value {
        json!({
            "tools": [
                {"name": "read_file", "description": "Read a file", "inputSchema": {"type": "object"}},
                {"name": "list_directory", "description": "List a directory"},
            ]
        })
    }

    fn text_result(text: &str) -> Value {
        json!({
            "content": [{"type": "text", "text": text}],
            "isError": false,
        })
    }

    async fn connect_stub(tools_result: Value, call_result: Value) -> (McpTool, Arc<StubTransport>) {
        let transport = StubTransport::new(tools_result, call_result);
        let tool = McpTool::with_transport("mcp".to_string(), transport.clone())
            .await
            .expect("handshake succeeds");
        (tool, transport)
    }

    #[tokio::test]
    async fn handshake_initialises_then_lists_tools() {
        let (tool, transport) = connect_stub(file_server_tools(), text_result("ok")).await;

        let calls = transport.calls().await;
        let methods: Vec<&str> = calls.iter().map(|(method, _)| method.as_str()).collect();
        assert_eq!(
            methods,
            vec!["initialize", "notifications/initialized", "tools/list"]
        );
        assert_eq!(tool.tool_count(), 2);
    }

    #[tokio::test]
    async fn description_lists_discovered_tools() {
        let (tool, _) = connect_stub(file_server_tools(), text_result("ok")).await;

        let description = tool.description();
        assert!(description.contains("read_file"));
        assert!(description.contains("list_directory"));
    }

    #[tokio::test]
    async fn parameters_enumerate_discovered_tools() {
        let (tool, _) = connect_stub(file_server_tools(), text_result("ok")).await;

        let schema = tool.parameters();
        assert_eq!(
            schema["properties"]["tool_name"]["enum"],
            json!(["read_file", "list_directory"])
        );
        assert_eq!(schema["required"], json!(["tool_name"]));
    }

    #[tokio::test]
    async fn invoke_forwards_arguments_and_flattens_text() {
        let (tool, transport) = connect_stub(
            file_server_tools(),
            json!({
                "content": [
                    {"type": "text", "text": "line one"},
                    {"type": "image", "data": "ignored"},
                    {"type": "text", "text": "line two"},
                ],
            }),
        )
        .await;

        let mut args = ToolArgs::new();
        args.insert("tool_name".to_string(), json!("read_file"));
        args.insert("arguments".to_string(), json!({"path": "/tmp/hello.txt"}));

        let result = tool.invoke(&args).await.expect("invoke succeeds");
        assert_eq!(result, "line one\nline two");

        let calls = transport.calls().await;
        let (_, params) = calls.last().expect("tools/call recorded");
        assert_eq!(params["name"], "read_file");
        assert_eq!(params["arguments"]["path"], "/tmp/hello.txt");
    }

    #[tokio::test]
    async fn missing_arguments_default_to_empty_object() {
        let (tool, transport) = connect_stub(file_server_tools(), text_result("ok")).await;

        let mut args = ToolArgs::new();
        args.insert("tool_name".to_string(), json!("list_directory"));
        tool.invoke(&args).await.expect("invoke succeeds");

        let calls = transport.calls().await;
        let (_, params) = calls.last().expect("tools/call recorded");
        assert_eq!(params["arguments"], json!({}));
    }

    #[tokio::test]
    async fn empty_content_reports_no_output() {
        let (tool, _) = connect_stub(file_server_tools(), json!({"content": []})).await;

        let mut args = ToolArgs::new();
        args.insert("tool_name".to_string(), json!("read_file"));
        let result = tool.invoke(&args).await.expect("invoke succeeds");
        assert_eq!(result, "(no output)");
    }

    #[tokio::test]
    async fn error_flag_surfaces_as_tool_error() {
        let (tool, _) = connect_stub(
            file_server_tools(),
            json!({
                "content": [{"type": "text", "text": "permission denied"}],
                "isError": true,
            }),
        )
        .await;

        let mut args = ToolArgs::new();
        args.insert("tool_name".to_string(), json!("read_file"));
        let err = tool.invoke(&args).await.expect_err("must fail");
        assert!(err.to_string().contains("permission denied"));
    }

    #[tokio::test]
    async fn unknown_sub_tool_is_rejected_without_rpc() {
        let (tool, transport) = connect_stub(file_server_tools(), text_result("ok")).await;

        let mut args = ToolArgs::new();
        args.insert("tool_name".to_string(), json!("delete_everything"));
        let err = tool.invoke(&args).await.expect_err("must fail");
        assert!(err.to_string().contains("delete_everything"));

        let calls = transport.calls().await;
        assert!(calls.iter().all(|(method, _)| method != "tools/call"));
    }

    #[tokio::test]
    async fn missing_tool_name_is_an_error() {
        let (tool, _) = connect_stub(file_server_tools(), text_result("ok")).await;

        let err = tool.invoke(&ToolArgs::new()).await.expect_err("must fail");
        assert_eq!(err.to_string(), "tool_name parameter required");
    }
}
