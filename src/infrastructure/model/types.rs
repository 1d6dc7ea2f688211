use thiserror::Error;

/// Failures surfaced by the chat backend. The gateway performs no retries;
/// the agent loop decides what a failed turn means.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("network error calling model backend: {0}")]
    Network(#[from] reqwest::Error),
    #[error("model backend returned invalid response: {reason}")]
    InvalidResponse { reason: String },
    #[error("model stream error: {message}")]
    Stream { message: String },
}

impl ModelError {
    pub fn invalid_response(reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            reason: reason.into(),
        }
    }

    pub fn stream(message: impl Into<String>) -> Self {
        Self::Stream {
            message: message.into(),
        }
    }
}
