use crate::domain::types::ToolDescriptor;

const PREAMBLE: &str = r#"You are an autonomous agent that uses tools to complete tasks.

RESPONSE FORMAT:
- To call a tool: respond with ONLY a JSON object: {"name": "tool_name", "parameters": {...}}
- To give final answer: respond with plain text (no JSON)
"#;

const KNOWLEDGE_RULES: &str = r#"WHEN NOT TO USE TOOLS (answer directly from your knowledge):
- General knowledge questions (math, science, history, concepts)
- Explanations, definitions, "what is", "how does X work"
- Opinions, comparisons, "which is better", "is X easier than Y"
- Programming questions, code explanations, best practices
- Anything you can answer from knowledge without running commands

CONTEXT RULES:
- Maintain context from previous messages until user says "clear"
- If user gives a correction or follow-up, apply it to the SAME host/target from previous messages
- Example: if you just used ssh to host X and user says "try grep vmx instead", use ssh to host X again

CRITICAL RULES:
- NEVER fabricate system/command output - if you run a tool, report real results
- If a command fails or returns empty, report exactly what happened
- For knowledge questions, use your own knowledge - no tools needed
- If unsure about facts, say so
"#;

const PROCESS: &str = r#"Process:
1. Can I answer this from my knowledge? -> answer directly (no tools)
2. Do I need to run a command or check a system? -> use appropriate tool
3. If tool result is useful, provide final answer
4. If tool result is empty/error, report honestly or try alternative
"#;

/// Assembles the system prompt from the fixed routing copy and the rendered
/// catalog of registered tools. The MCP routing line is generated from the
/// mcp-family tool names actually registered, since their names depend on
/// the operator's --mcp flags.
pub fn build_system_prompt(tools: &[ToolDescriptor]) -> String {
    let mut prompt = String::from(PREAMBLE);

    prompt.push_str("\nWHEN TO USE TOOLS:\n");
    prompt.push_str(
        "- \"ssh to\", \"connect to\", user@host, remote server, IP address -> use \"ssh\" tool\n",
    );
    prompt.push_str("- Local machine operations, run commands, check files -> use \"shell\" tool\n");

    let mcp_names: Vec<&str> = tools
        .iter()
        .map(|tool| tool.name.as_str())
        .filter(|name| is_mcp_family(name))
        .collect();
    if !mcp_names.is_empty() {
        let rendered: Vec<String> = mcp_names.iter().map(|name| format!("\"{name}\"")).collect();
        prompt.push_str(&format!(
            "- \"mcp\", MCP tool calls -> use the {} tool{}\n",
            rendered.join(" or "),
            if mcp_names.len() > 1 { "s" } else { "" },
        ));
    }

    prompt.push_str(
        "- \"wiki\", \"confluence\", \"documentation\", \"diagram\", \"architecture\" -> use \"wiki\" tool\n",
    );

    prompt.push('\n');
    prompt.push_str(KNOWLEDGE_RULES);

    prompt.push_str("\nAvailable tools:\n");
    for tool in tools {
        match serde_json::to_string_pretty(tool) {
            Ok(rendered) => {
                prompt.push('\n');
                prompt.push_str(&rendered);
                prompt.push('\n');
            }
            Err(error) => {
                tracing::warn!(tool = %tool.name, %error, "failed to render tool descriptor");
            }
        }
    }

    prompt.push('\n');
    prompt.push_str(PROCESS);
    prompt
}

fn is_mcp_family(name: &str) -> bool {
    name == "mcp"
        || name.strip_prefix("mcp_").is_some_and(|rest| !rest.is_empty())
        || name
            .strip_prefix("mcp")
            .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(name: &str, description: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            description: description.to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "input": {"type": "string", "description": "The input value"},
                },
                "required": ["input"],
            }),
        }
    }

    #[test]
    fn prompt_contains_rendered_descriptors() {
        let tools = vec![
            descriptor("shell", "Execute local commands"),
            descriptor("ssh", "Execute remote commands via SSH"),
        ];

        let prompt = build_system_prompt(&tools);

        for expected in [
            "autonomous agent",
            "JSON",
            "parameters",
            "final answer",
            r#""name": "shell""#,
            r#""description": "Execute local commands""#,
            r#""name": "ssh""#,
            "Execute remote commands",
        ] {
            assert!(prompt.contains(expected), "prompt missing {expected:?}");
        }
    }

    #[test]
    fn mcp_routing_line_lists_registered_names() {
        let tools = vec![
            descriptor("mcp_files", "files server"),
            descriptor("mcp2", "second server"),
        ];

        let prompt = build_system_prompt(&tools);

        assert!(prompt.contains(r#"use the "mcp_files" or "mcp2" tools"#));
    }

    #[test]
    fn mcp_routing_line_absent_without_mcp_tools() {
        let prompt = build_system_prompt(&[descriptor("shell", "local")]);

        assert!(!prompt.contains("MCP tool calls"));
    }

    #[test]
    fn empty_tool_list_still_builds_prompt() {
        let prompt = build_system_prompt(&[]);

        assert!(!prompt.is_empty());
        assert!(prompt.contains("agent"));
    }

    #[test]
    fn mcp_family_detection() {
        for name in ["mcp", "mcp2", "mcp10", "mcp_files"] {
            assert!(is_mcp_family(name), "{name} should be mcp-family");
        }
        for name in ["mcpx", "mcp_", "shell", "wiki"] {
            assert!(!is_mcp_family(name), "{name} should not be mcp-family");
        }
    }
}
