use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::error::RagError;

/// Maps text onto fixed-dimension vectors via the Ollama embeddings API.
pub struct EmbeddingClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

impl EmbeddingClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        self.embed_batch(std::slice::from_ref(&text.to_string()))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::invalid_response("embeddings", "no embedding returned"))
    }

    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/api/embed", self.base_url.trim_end_matches('/'));
        debug!(model = self.model.as_str(), texts = texts.len(), "embedding batch");

        let response: EmbedResponse = self
            .http
            .post(&url)
            .json(&json!({ "model": self.model, "input": texts }))
            .send()
            .await
            .map_err(|source| RagError::Network {
                service: "embeddings",
                source,
            })?
            .error_for_status()
            .map_err(|source| RagError::Network {
                service: "embeddings",
                source,
            })?
            .json()
            .await
            .map_err(|source| RagError::Network {
                service: "embeddings",
                source,
            })?;

        if response.embeddings.len() != texts.len() {
            return Err(RagError::invalid_response(
                "embeddings",
                format!(
                    "expected {} vectors, got {}",
                    texts.len(),
                    response.embeddings.len()
                ),
            ));
        }
        Ok(response.embeddings)
    }
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}
