use thiserror::Error;

#[derive(Debug, Error)]
pub enum McpError {
    #[error("failed to spawn MCP server '{server}': {source}")]
    Spawn {
        server: String,
        #[source]
        source: std::io::Error,
    },
    #[error("MCP server '{server}' transport error: {message}")]
    Transport { server: String, message: String },
    #[error("MCP server '{server}' returned invalid JSON: {source}")]
    InvalidJson {
        server: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("MCP server '{server}' returned JSON-RPC error {code}: {message}")]
    Rpc {
        server: String,
        code: i64,
        message: String,
    },
    #[error("MCP server '{server}' terminated unexpectedly")]
    Terminated { server: String },
    #[error("unknown tool '{tool}' on this MCP server (available: {available})")]
    UnknownSubTool { tool: String, available: String },
    #[error("MCP tool '{tool}' reported an error: {message}")]
    SubToolFailed { tool: String, message: String },
}

impl McpError {
    pub(super) fn transport(server: &str, message: impl Into<String>) -> Self {
        Self::Transport {
            server: server.to_string(),
            message: message.into(),
        }
    }
}
