use async_trait::async_trait;

use super::types::ModelError;
use crate::domain::types::{ChatMessage, ModelReply};

/// Gateway to a chat backend. Implementations map message roles onto
/// whatever the backend expects and run every assembled reply through the
/// reply parser.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// One-shot chat; blocks until the backend has produced the full reply.
    async fn chat(&self, messages: &[ChatMessage]) -> Result<ModelReply, ModelError>;

    /// Streaming chat. Prose replies are forwarded chunk-by-chunk through
    /// `on_chunk`; replies that open with `{` are buffered silently so tool
    /// call JSON never leaks to the operator's terminal.
    ///
    /// The default implementation falls back to a single `chat` round trip
    /// and forwards the whole content once when the reply carries no tool
    /// call.
    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        on_chunk: &(dyn for<'a> Fn(&'a str) + Send + Sync),
    ) -> Result<ModelReply, ModelError> {
        let reply = self.chat(messages).await?;
        if reply.tool_calls.is_empty() {
            on_chunk(&reply.content);
        }
        Ok(reply)
    }
}
