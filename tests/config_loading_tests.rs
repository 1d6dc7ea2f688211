use std::fs;
use std::path::Path;

use opsagent::config::{AppConfig, ConfigError};

#[test]
fn loads_full_config_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("opsagent.toml");
    fs::write(
        &path,
        r#"
model = "qwen2.5"
max_iter = 6
ollama_url = "http://127.0.0.1:11434"
qdrant_url = "http://127.0.0.1:6333"
wiki_path = "/srv/wiki-export"
mcp = ["files: mcp-filesystem-server /data", "http://localhost:9000/sse"]
"#,
    )
    .expect("write config");

    let config = AppConfig::load(Some(&path)).expect("load config");

    assert_eq!(config.model.as_deref(), Some("qwen2.5"));
    assert_eq!(config.max_iter, Some(6));
    assert_eq!(config.qdrant_url.as_deref(), Some("http://127.0.0.1:6333"));
    assert_eq!(config.wiki_path.as_deref(), Some("/srv/wiki-export"));
    assert_eq!(config.mcp.len(), 2);
}

#[test]
fn partial_config_leaves_other_keys_unset() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("opsagent.toml");
    fs::write(&path, "model = \"llama3.1\"\n").expect("write config");

    let config = AppConfig::load(Some(&path)).expect("load config");

    assert_eq!(config.model.as_deref(), Some("llama3.1"));
    assert!(config.max_iter.is_none());
    assert!(config.wiki_path.is_none());
    assert!(config.mcp.is_empty());
}

#[test]
fn missing_explicit_file_is_an_error() {
    let err = AppConfig::load(Some(Path::new("/nonexistent/opsagent.toml")))
        .expect_err("must fail");
    assert!(matches!(err, ConfigError::Read { .. }));
}

#[test]
fn malformed_file_is_a_parse_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("opsagent.toml");
    fs::write(&path, "model = [not toml").expect("write config");

    let err = AppConfig::load(Some(&path)).expect_err("must fail");
    assert!(matches!(err, ConfigError::Parse { .. }));
}
