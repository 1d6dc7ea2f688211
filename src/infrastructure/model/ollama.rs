use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

use super::parser::parse_reply;
use super::traits::ChatClient;
use super::types::ModelError;
use crate::domain::types::{ChatMessage, MessageRole, ModelReply};

/// Chat gateway for a local Ollama server.
#[derive(Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }

    fn payload(&self, messages: &[ChatMessage], stream: bool) -> Value {
        json!({
            "model": self.model,
            "messages": messages.iter().map(to_wire_message).collect::<Vec<_>>(),
            "stream": stream,
        })
    }
}

/// Tool results travel as user-role text; the agent has already wrapped them
/// in a `Tool '<name>' returned:` preamble the model can read.
fn to_wire_message(message: &ChatMessage) -> Value {
    let role = match message.role {
        MessageRole::System => "system",
        MessageRole::User | MessageRole::Tool => "user",
        MessageRole::Assistant => "assistant",
    };
    json!({ "role": role, "content": message.content })
}

#[async_trait]
impl ChatClient for OllamaClient {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<ModelReply, ModelError> {
        info!(
            model = self.model.as_str(),
            messages = messages.len(),
            "sending chat request to Ollama"
        );

        let response: OllamaChatResponse = self
            .http
            .post(self.chat_url())
            .json(&self.payload(messages, false))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!("received chat response from Ollama");

        let content = response
            .message
            .ok_or_else(|| ModelError::invalid_response("missing message in chat response"))?
            .content;

        Ok(parse_reply(&content))
    }

    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        on_chunk: &(dyn for<'a> Fn(&'a str) + Send + Sync),
    ) -> Result<ModelReply, ModelError> {
        info!(
            model = self.model.as_str(),
            messages = messages.len(),
            "sending streaming chat request to Ollama"
        );

        let response = self
            .http
            .post(self.chat_url())
            .json(&self.payload(messages, true))
            .send()
            .await?
            .error_for_status()?;

        let mut stream = response.bytes_stream();
        let mut accumulator = StreamAccumulator::new();
        let mut pending = String::new();

        while let Some(item) = stream.next().await {
            let bytes = item.map_err(|err| ModelError::stream(err.to_string()))?;
            pending.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(newline) = pending.find('\n') {
                let line: String = pending.drain(..=newline).collect();
                consume_line(line.trim(), &mut accumulator, on_chunk)?;
            }
        }
        consume_line(pending.trim(), &mut accumulator, on_chunk)?;

        Ok(parse_reply(&accumulator.into_content()))
    }
}

fn consume_line(
    line: &str,
    accumulator: &mut StreamAccumulator,
    on_chunk: &(dyn for<'a> Fn(&'a str) + Send + Sync),
) -> Result<(), ModelError> {
    if line.is_empty() {
        return Ok(());
    }
    let chunk: OllamaStreamChunk = serde_json::from_str(line)
        .map_err(|err| ModelError::stream(format!("invalid stream line: {err}")))?;
    if let Some(message) = chunk.message {
        accumulator.push(&message.content, on_chunk);
    }
    Ok(())
}

/// Decides mid-stream whether the reply is a tool call or prose. The first
/// non-whitespace byte settles it: `{` latches json mode and everything is
/// buffered silently; anything else latches streaming mode, flushes the
/// buffer, and forwards every later chunk. Neither latch is ever reset.
#[derive(Default)]
pub(crate) struct StreamAccumulator {
    buffer: String,
    streaming: bool,
    json_mode: bool,
}

impl StreamAccumulator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, chunk: &str, on_chunk: &(dyn for<'a> Fn(&'a str) + Send + Sync)) {
        self.buffer.push_str(chunk);

        if !self.streaming && !self.json_mode {
            match self.buffer.trim_start().chars().next() {
                Some('{') => self.json_mode = true,
                Some(_) => {
                    self.streaming = true;
                    on_chunk(&self.buffer);
                }
                None => {}
            }
        } else if self.streaming {
            on_chunk(chunk);
        }
    }

    pub(crate) fn into_content(self) -> String {
        self.buffer
    }
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: Option<OllamaMessage>,
}

#[derive(Deserialize)]
struct OllamaStreamChunk {
    message: Option<OllamaMessage>,
}

#[derive(Serialize, Deserialize)]
struct OllamaMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn collect_chunks(chunks: &[&str]) -> (Vec<String>, String) {
        let seen = Mutex::new(Vec::new());
        let mut accumulator = StreamAccumulator::new();
        for chunk in chunks {
            accumulator.push(chunk, &|piece: &str| {
                seen.lock().expect("chunk record lock").push(piece.to_string());
            });
        }
        (seen.into_inner().expect("chunk record lock"), accumulator.into_content())
    }

    #[test]
    fn json_replies_are_buffered_silently() {
        let (seen, content) = collect_chunks(&["{", "\"na", "me\":\"t\"}"]);

        assert!(seen.is_empty(), "on_chunk must not fire for JSON replies");
        assert_eq!(content, r#"{"name":"t"}"#);

        let reply = parse_reply(&content);
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].name, "t");
    }

    #[test]
    fn prose_replies_stream_from_the_first_chunk() {
        let (seen, content) = collect_chunks(&["The answer", " is 42."]);

        assert_eq!(seen, vec!["The answer".to_string(), " is 42.".to_string()]);
        assert_eq!(content, "The answer is 42.");
    }

    #[test]
    fn leading_whitespace_defers_the_decision() {
        let (seen, _) = collect_chunks(&["  \n", "  {\"name\":\"x\"}"]);
        assert!(seen.is_empty());

        let (seen, _) = collect_chunks(&["  \n", "Hello", " there"]);
        assert_eq!(seen.len(), 2);
        // The first forwarded piece carries the buffered prefix.
        assert_eq!(seen[0], "  \nHello");
        assert_eq!(seen[1], " there");
    }

    #[test]
    fn streaming_latch_never_resets() {
        let (seen, content) = collect_chunks(&["text then ", "{\"name\":\"x\"}"]);

        assert_eq!(seen.len(), 2);
        assert_eq!(content, "text then {\"name\":\"x\"}");
    }

    #[test]
    fn tool_role_travels_as_user_message() {
        let wire = to_wire_message(&ChatMessage::tool("Tool 'shell' returned:\nok"));
        assert_eq!(wire["role"], "user");
        assert!(wire["content"].as_str().expect("content").starts_with("Tool 'shell'"));
    }
}
