use std::collections::HashMap;
use std::io::Write as _;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::tooling::Tool;
use crate::domain::types::{ChatMessage, ModelReply, ParsedToolCall, ToolDescriptor};
use crate::infrastructure::model::{ChatClient, ModelError, build_system_prompt};

pub const DEFAULT_MAX_ITERATIONS: usize = 10;

const DISPLAY_TRUNCATE_LEN: usize = 500;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent iteration {iteration}: {source}")]
    Model {
        iteration: usize,
        #[source]
        source: ModelError,
    },
    #[error("max iterations ({0}) reached")]
    IterationLimit(usize),
}

/// Drives the reason-act loop: stream a model reply, execute the tool call
/// it carries (if any), feed the result back, and repeat until the model
/// produces a final answer or the iteration bound trips.
pub struct Agent {
    client: Arc<dyn ChatClient>,
    tools: HashMap<String, Arc<dyn Tool>>,
    system_prompt: String,
    history: Vec<ChatMessage>,
    max_iterations: usize,
}

impl Agent {
    pub fn new(client: Arc<dyn ChatClient>, tools: Vec<Arc<dyn Tool>>, max_iterations: usize) -> Self {
        let descriptors: Vec<ToolDescriptor> =
            tools.iter().map(|tool| tool.descriptor()).collect();
        let system_prompt = build_system_prompt(&descriptors);
        let tools = tools
            .into_iter()
            .map(|tool| (tool.name().to_string(), tool))
            .collect();

        Self {
            client,
            tools,
            system_prompt,
            history: Vec::new(),
            max_iterations: if max_iterations == 0 {
                DEFAULT_MAX_ITERATIONS
            } else {
                max_iterations
            },
        }
    }

    /// Runs one user turn. History always records the user message; the
    /// final assistant message is recorded only when the turn completes.
    pub async fn run(&mut self, user_input: &str) -> Result<String, AgentError> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(ChatMessage::system(self.system_prompt.clone()));
        messages.extend(self.history.iter().cloned());
        messages.push(ChatMessage::user(user_input));

        self.history.push(ChatMessage::user(user_input));

        for iteration in 0..self.max_iterations {
            print!("\n[Agent] ");
            let _ = std::io::stdout().flush();
            let reply = self
                .client
                .chat_stream(&messages, &|chunk: &str| {
                    print!("{chunk}");
                    let _ = std::io::stdout().flush();
                })
                .await
                .map_err(|source| AgentError::Model { iteration, source })?;
            println!();

            if let Some(call) = reply.tool_calls.first() {
                self.step_with_tool(call, &reply, &mut messages).await;
                continue;
            }

            if reply.is_final || !reply.content.contains('{') {
                self.history.push(ChatMessage::assistant(reply.content.clone()));
                return Ok(reply.content);
            }

            // Neither terminal nor a usable tool call; hand the reply back
            // and let the iteration bound cap degenerate models.
            debug!(iteration, "reply was neither terminal nor a tool call");
            messages.push(ChatMessage::assistant(reply.content.clone()));
        }

        warn!(bound = self.max_iterations, "iteration bound exhausted");
        Err(AgentError::IterationLimit(self.max_iterations))
    }

    /// Executes the first tool call of a reply and appends both sides of the
    /// exchange to the working message list. Tool failures become `Error:`
    /// text for the model; they never abort the turn.
    async fn step_with_tool(
        &self,
        call: &ParsedToolCall,
        reply: &ModelReply,
        messages: &mut Vec<ChatMessage>,
    ) {
        info!(tool = call.name.as_str(), "model requested tool call");
        println!(
            "[Tool Call] {}: {}",
            call.name,
            Value::Object(call.arguments.clone())
        );

        let result = match self.tools.get(&call.name) {
            Some(tool) => match tool.invoke(&call.arguments).await {
                Ok(text) => text,
                Err(error) => {
                    warn!(tool = call.name.as_str(), %error, "tool invocation failed");
                    format!("Error: {error}")
                }
            },
            None => {
                warn!(tool = call.name.as_str(), "unknown tool requested");
                format!("Error: unknown tool: {}", call.name)
            }
        };
        println!("[Tool Result] {}", truncate(&result, DISPLAY_TRUNCATE_LEN));

        messages.push(ChatMessage::assistant(reply.content.clone()));
        messages.push(ChatMessage::tool(format!(
            "Tool '{}' returned:\n{result}",
            call.name
        )));
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Releases every registered tool; the REPL calls this before exit.
    pub async fn release_tools(&self) {
        for tool in self.tools.values() {
            tool.release().await;
        }
    }
}

/// Bounds operator-facing echoes of tool output; the model always receives
/// the full text.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let cut: String = s.chars().take(max_len).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod truncate_tests {
    use super::truncate;

    #[test]
    fn truncates_only_past_the_limit() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello", 5), "hello");
        assert_eq!(truncate("hello world", 5), "hello...");
        assert_eq!(truncate("", 5), "");
        assert_eq!(truncate("ab", 1), "a...");
    }
}
