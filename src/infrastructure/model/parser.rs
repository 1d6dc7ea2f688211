use serde::Deserialize;
use serde_json::{Map, Value};

use crate::domain::types::{ModelReply, ParsedToolCall};

/// The shapes a model is allowed to use for a tool call. Either key spelling
/// is accepted; extra fields are ignored.
#[derive(Debug, Deserialize, Default)]
struct RawToolCall {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    parameters: Option<Map<String, Value>>,
    #[serde(default)]
    params: Option<Map<String, Value>>,
}

/// Extracts a tool call or final answer from raw model output.
///
/// The first `{` in the content starts the candidate object; the matching
/// brace is found structurally rather than with a JSON decoder because the
/// model wraps the object in prose and frequently hallucinates text after
/// it. When a call is recognised the content is truncated at the closing
/// brace so invented tool output never enters the conversation.
pub fn parse_reply(content: &str) -> ModelReply {
    let trimmed = content.trim();

    if let Some(start) = trimmed.find('{') {
        let json_part = &trimmed[start..];
        if let Some(end) = find_matching_brace(json_part) {
            if let Ok(raw) = serde_json::from_str::<RawToolCall>(&json_part[..=end]) {
                let name = raw
                    .name
                    .filter(|name| !name.is_empty())
                    .or(raw.tool)
                    .unwrap_or_default();
                if !name.is_empty() {
                    let arguments = raw.parameters.or(raw.params).unwrap_or_default();
                    return ModelReply {
                        content: trimmed[..start + end + 1].trim().to_string(),
                        tool_calls: vec![ParsedToolCall { name, arguments }],
                        is_final: false,
                    };
                }
            }
        }
    }

    let lowered = trimmed.to_lowercase();
    let is_final = lowered.contains("final answer:")
        || lowered.contains("answer:")
        || !trimmed.contains('{');

    ModelReply {
        content: content.to_string(),
        tool_calls: Vec::new(),
        is_final,
    }
}

/// Byte index of the `}` matching a leading `{`, or `None` when the input
/// does not start with `{` or the brace is never closed. Braces inside JSON
/// string literals (including escaped quotes) do not affect depth.
pub fn find_matching_brace(s: &str) -> Option<usize> {
    if !s.starts_with('{') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape = false;

    for (i, ch) in s.char_indices() {
        if escape {
            escape = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape = true,
            '"' => in_string = !in_string,
            _ if in_string => {}
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}
