use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::error::McpError;
use super::http::{HttpTransport, SseTransport};
use super::stdio::StdioTransport;

/// One JSON-RPC session with an MCP server, independent of how the bytes
/// travel. `request` resolves to the `result` member of the response.
#[async_trait]
pub trait McpTransport: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value, McpError>;

    async fn notify(&self, method: &str, params: Value) -> Result<(), McpError>;

    /// Tears the session down; stdio transports kill the child process.
    async fn close(&self);
}

/// How a target string maps onto a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportKind {
    Sse { url: String },
    StreamableHttp { url: String },
    Stdio { command: String, args: Vec<String> },
}

impl TransportKind {
    pub fn classify(target: &str) -> Option<Self> {
        if target.starts_with("http://") || target.starts_with("https://") {
            if target.trim_end_matches('/').ends_with("/sse") {
                return Some(Self::Sse {
                    url: target.to_string(),
                });
            }
            return Some(Self::StreamableHttp {
                url: target.to_string(),
            });
        }

        let mut parts = target.split_whitespace();
        let command = parts.next()?.to_string();
        Some(Self::Stdio {
            command,
            args: parts.map(String::from).collect(),
        })
    }
}

/// Extracts `result` from a JSON-RPC response envelope, mapping the `error`
/// member onto `McpError::Rpc`.
pub(super) fn rpc_outcome(server: &str, message: &Value) -> Result<Value, McpError> {
    if let Some(error) = message.get("error") {
        return Err(McpError::Rpc {
            server: server.to_string(),
            code: error.get("code").and_then(Value::as_i64).unwrap_or(-32000),
            message: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        });
    }
    Ok(message.get("result").cloned().unwrap_or(Value::Null))
}

pub async fn connect(server: &str, target: &str) -> Result<Arc<dyn McpTransport>, McpError> {
    match TransportKind::classify(target) {
        Some(TransportKind::Sse { url }) => {
            Ok(Arc::new(SseTransport::connect(server, &url).await?))
        }
        Some(TransportKind::StreamableHttp { url }) => {
            Ok(Arc::new(HttpTransport::new(server, &url)))
        }
        Some(TransportKind::Stdio { command, args }) => {
            Ok(Arc::new(StdioTransport::spawn(server, &command, &args).await?))
        }
        None => Err(McpError::transport(server, "empty MCP target")),
    }
}
