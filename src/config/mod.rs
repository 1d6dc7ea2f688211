use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_MODEL: &str = "llama3.1";
pub const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
pub const DEFAULT_QDRANT_URL: &str = "http://localhost:6333";
pub const DEFAULT_CONFIG_PATH: &str = "opsagent.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Optional file-based configuration. Every key has a CLI flag counterpart;
/// flags win over the file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    pub model: Option<String>,
    pub max_iter: Option<usize>,
    pub ollama_url: Option<String>,
    pub qdrant_url: Option<String>,
    pub wiki_path: Option<String>,
    #[serde(default)]
    pub mcp: Vec<String>,
}

impl AppConfig {
    /// Loads the file at `path`, or the default path when it exists, or the
    /// built-in defaults. An explicitly named file must parse; the implicit
    /// default file is allowed to be absent.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::parse_file(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::parse_file(default)
                } else {
                    debug!("no config file, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    fn parse_file(path: &Path) -> Result<Self, ConfigError> {
        let expanded = shellexpand::tilde(&path.to_string_lossy()).to_string();
        let path = Path::new(&expanded);
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }
}
