use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::error::RagError;

const DESCRIBE_PROMPT: &str = r#"Describe this diagram or image in detail. Focus on:
1. What type of diagram/image it is (architecture diagram, flowchart, screenshot, etc.)
2. The main components or elements shown
3. The relationships or connections between components
4. Any text or labels visible
5. The overall purpose or what it's trying to communicate

Provide a clear, comprehensive description that would allow someone to understand the image without seeing it."#;

/// Generates textual descriptions of images with a vision model. Results
/// are cached on disk keyed by absolute image path so re-indexing the same
/// corpus never re-describes unchanged images.
pub struct VisionClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    cache_path: Option<PathBuf>,
    cache: Mutex<HashMap<String, String>>,
}

impl VisionClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        cache_path: Option<PathBuf>,
    ) -> Self {
        let cache = cache_path
            .as_deref()
            .map(load_cache)
            .unwrap_or_default();

        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            cache_path,
            cache: Mutex::new(cache),
        }
    }

    /// Describes an image, consulting the cache first. A hit bypasses the
    /// backend entirely.
    pub async fn describe_image(&self, image_path: &Path) -> Result<String, RagError> {
        let key = cache_key(image_path);
        if let Some(hit) = self.cache.lock().expect("vision cache lock").get(&key) {
            debug!(path = %image_path.display(), "vision cache hit");
            return Ok(hit.clone());
        }

        let bytes = fs::read(image_path).map_err(|source| RagError::Read {
            path: image_path.to_path_buf(),
            source,
        })?;
        let encoded = BASE64.encode(&bytes);

        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let response: VisionResponse = self
            .http
            .post(&url)
            .json(&json!({
                "model": self.model,
                "messages": [{
                    "role": "user",
                    "content": DESCRIBE_PROMPT,
                    "images": [encoded],
                }],
                "stream": false,
            }))
            .send()
            .await
            .map_err(|source| RagError::Network {
                service: "vision",
                source,
            })?
            .error_for_status()
            .map_err(|source| RagError::Network {
                service: "vision",
                source,
            })?
            .json()
            .await
            .map_err(|source| RagError::Network {
                service: "vision",
                source,
            })?;

        let description = response
            .message
            .map(|message| message.content)
            .filter(|content| !content.is_empty())
            .ok_or_else(|| RagError::invalid_response("vision", "no response from vision model"))?;

        {
            let mut cache = self.cache.lock().expect("vision cache lock");
            cache.insert(key, description.clone());
            if let Some(path) = &self.cache_path {
                save_cache(path, &cache);
            }
        }

        Ok(description)
    }
}

fn cache_key(image_path: &Path) -> String {
    std::path::absolute(image_path)
        .unwrap_or_else(|_| image_path.to_path_buf())
        .to_string_lossy()
        .to_string()
}

fn load_cache(path: &Path) -> HashMap<String, String> {
    let Ok(data) = fs::read_to_string(path) else {
        return HashMap::new();
    };
    match serde_json::from_str(&data) {
        Ok(cache) => cache,
        Err(error) => {
            warn!(path = %path.display(), %error, "ignoring unreadable vision cache");
            HashMap::new()
        }
    }
}

fn save_cache(path: &Path, cache: &HashMap<String, String>) {
    match serde_json::to_string_pretty(cache) {
        Ok(data) => {
            if let Err(error) = fs::write(path, data) {
                warn!(path = %path.display(), %error, "failed to persist vision cache");
            }
        }
        Err(error) => warn!(%error, "failed to serialize vision cache"),
    }
}

#[derive(Deserialize)]
struct VisionResponse {
    message: Option<VisionMessage>,
}

#[derive(Deserialize)]
struct VisionMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cache_hit_bypasses_backend() {
        let dir = tempfile::tempdir().expect("tempdir");
        let image_path = dir.path().join("diagram.png");
        let cache_path = dir.path().join(".vision_cache.json");

        let mut seeded = HashMap::new();
        seeded.insert(
            cache_key(&image_path),
            "A cached architecture diagram.".to_string(),
        );
        fs::write(
            &cache_path,
            serde_json::to_string(&seeded).expect("serialize"),
        )
        .expect("write cache");

        // The base URL points nowhere and the image does not exist on disk:
        // only a cache hit can satisfy this call.
        let client = VisionClient::new("http://127.0.0.1:1", "llava", Some(cache_path));
        let description = client.describe_image(&image_path).await.expect("cache hit");

        assert_eq!(description, "A cached architecture diagram.");
    }

    #[tokio::test]
    async fn unreadable_image_is_an_error_not_a_panic() {
        let dir = tempfile::tempdir().expect("tempdir");
        let client = VisionClient::new("http://127.0.0.1:1", "llava", None);

        let err = client
            .describe_image(&dir.path().join("missing.png"))
            .await
            .expect_err("must fail");
        assert!(matches!(err, RagError::Read { .. }));
    }

    #[test]
    fn cache_round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache_path = dir.path().join(".vision_cache.json");

        let mut cache = HashMap::new();
        cache.insert("/abs/path.png".to_string(), "description".to_string());
        save_cache(&cache_path, &cache);

        assert_eq!(load_cache(&cache_path), cache);
    }
}
