use clap::Parser;

/// Flags mirror the config file keys; an explicit flag always wins over the
/// file, which wins over the built-in defaults.
#[derive(Parser, Debug)]
#[command(
    name = "opsagent",
    version,
    about = "Autonomous tool-using agent powered by a local Ollama model"
)]
pub struct Cli {
    /// Ollama model to use
    #[arg(long)]
    pub model: Option<String>,

    /// Maximum agent iterations per query
    #[arg(long)]
    pub max_iter: Option<usize>,

    /// Path to a Confluence HTML export to index and enable the wiki tool
    #[arg(long)]
    pub wiki: Option<String>,

    /// Qdrant server URL
    #[arg(long)]
    pub qdrant: Option<String>,

    /// Only index the wiki, then exit
    #[arg(long)]
    pub index_only: bool,

    /// MCP server (repeatable). Format: [label:]command-or-url
    #[arg(long = "mcp", value_name = "SPEC")]
    pub mcp: Vec<String>,

    /// Ollama server URL
    #[arg(long)]
    pub ollama_url: Option<String>,

    /// Path to a TOML config file
    #[arg(long)]
    pub config: Option<String>,
}

/// Splits an MCP spec into the agent-visible tool name and the connection
/// target. A `label:` prefix that is not a URL scheme names the tool
/// `mcp_<label>`; otherwise names are auto-assigned as `mcp`, `mcp2`, ...
pub fn parse_mcp_spec(spec: &str, index: usize) -> (String, String) {
    if let Some((prefix, target)) = spec.split_once(':') {
        if !prefix.is_empty() && prefix != "http" && prefix != "https" {
            return (format!("mcp_{prefix}"), target.trim().to_string());
        }
    }

    if index == 0 {
        ("mcp".to_string(), spec.to_string())
    } else {
        (format!("mcp{}", index + 1), spec.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labelled_spec_names_the_tool() {
        let (name, target) = parse_mcp_spec("files: mcp-filesystem-server /data", 0);
        assert_eq!(name, "mcp_files");
        assert_eq!(target, "mcp-filesystem-server /data");
    }

    #[test]
    fn unlabelled_specs_auto_number() {
        assert_eq!(
            parse_mcp_spec("mcp-filesystem-server /data", 0),
            ("mcp".to_string(), "mcp-filesystem-server /data".to_string())
        );
        assert_eq!(
            parse_mcp_spec("other-server", 1),
            ("mcp2".to_string(), "other-server".to_string())
        );
        assert_eq!(
            parse_mcp_spec("third-server", 2),
            ("mcp3".to_string(), "third-server".to_string())
        );
    }

    #[test]
    fn url_schemes_are_not_labels() {
        assert_eq!(
            parse_mcp_spec("http://localhost:9000/sse", 0),
            ("mcp".to_string(), "http://localhost:9000/sse".to_string())
        );
        assert_eq!(
            parse_mcp_spec("https://mcp.example.com/rpc", 1),
            ("mcp2".to_string(), "https://mcp.example.com/rpc".to_string())
        );
    }

    #[test]
    fn labelled_url_keeps_the_label() {
        let (name, target) = parse_mcp_spec("remote:https://mcp.example.com/sse", 0);
        assert_eq!(name, "mcp_remote");
        assert_eq!(target, "https://mcp.example.com/sse");
    }
}
