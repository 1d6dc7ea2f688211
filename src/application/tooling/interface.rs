use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use super::mcp::McpError;
use crate::domain::types::ToolDescriptor;
use crate::infrastructure::rag::RagError;

/// The untyped argument mapping carried by a parsed tool call.
pub type ToolArgs = Map<String, Value>;

/// A side-effectful capability the agent can dispatch to. The returned text
/// is exactly what the model will see as the tool's output; errors are
/// rendered by the agent as `Error: <message>` and fed back to the model
/// rather than aborting the turn.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> String;

    /// JSON-schema-shaped description of the accepted arguments.
    fn parameters(&self) -> Value;

    async fn invoke(&self, args: &ToolArgs) -> Result<String, ToolError>;

    /// Releases long-lived resources (subprocesses, network clients). The
    /// embedder must call this once before discarding the tool; the default
    /// is a no-op for tools that own nothing.
    async fn release(&self) {}

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description(),
            parameters: self.parameters(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{name} parameter required")]
    MissingParameter { name: &'static str },
    #[error("unknown action: {action}")]
    UnknownAction { action: String },
    #[error("failed to launch command: {source}")]
    Spawn {
        #[source]
        source: std::io::Error,
    },
    #[error("failed to connect to {host}: {message}")]
    Connect { host: String, message: String },
    #[error("{message}")]
    Execution { message: String },
    #[error(transparent)]
    Mcp(#[from] McpError),
    #[error(transparent)]
    Rag(#[from] RagError),
}

impl ToolError {
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
        }
    }
}
