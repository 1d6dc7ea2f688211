use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to walk {}: {source}", path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("network error calling {service}: {source}")]
    Network {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{service} returned invalid response: {reason}")]
    InvalidResponse { service: &'static str, reason: String },
    #[error("vector store request failed: {detail}")]
    Store { detail: String },
}

impl RagError {
    pub(super) fn invalid_response(service: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            service,
            reason: reason.into(),
        }
    }
}
