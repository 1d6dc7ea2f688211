use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;
use uuid::Uuid;

use super::error::RagError;

/// One indexed document: a text chunk or an image description.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub vector: Vec<f32>,
    pub score: f32,
    pub source_type: SourceType,
    pub image_path: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    Text,
    Image,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::Text => "text",
            SourceType::Image => "image",
        }
    }

    fn from_str(value: &str) -> Self {
        if value == "image" {
            SourceType::Image
        } else {
            SourceType::Text
        }
    }
}

/// Deterministic point id: UUID v5 under the URL namespace over
/// `path + content`, so re-indexing the same source overwrites in place.
pub fn document_id(path: &str, content: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("{path}{content}").as_bytes()).to_string()
}

/// Qdrant adapter over its HTTP API.
pub struct VectorStore {
    http: reqwest::Client,
    base_url: String,
    collection: String,
}

impl VectorStore {
    pub fn new(base_url: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            collection: collection.into(),
        }
    }

    fn collection_url(&self) -> String {
        format!(
            "{}/collections/{}",
            self.base_url.trim_end_matches('/'),
            self.collection
        )
    }

    /// Creates the collection when absent; an existing collection is left
    /// untouched.
    pub async fn ensure_collection(&self, vector_size: usize) -> Result<(), RagError> {
        let url = self.collection_url();
        let existing = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|source| RagError::Network {
                service: "vector store",
                source,
            })?;
        if existing.status().is_success() {
            return Ok(());
        }

        let response = self
            .http
            .put(&url)
            .json(&json!({
                "vectors": { "size": vector_size, "distance": "Cosine" },
            }))
            .send()
            .await
            .map_err(|source| RagError::Network {
                service: "vector store",
                source,
            })?;
        if !response.status().is_success() {
            return Err(RagError::Store {
                detail: format!(
                    "failed to create collection: {}",
                    response.text().await.unwrap_or_default()
                ),
            });
        }
        Ok(())
    }

    /// Deletes the collection; a collection that never existed is a silent
    /// success.
    pub async fn delete_collection(&self) -> Result<(), RagError> {
        let response = self
            .http
            .delete(self.collection_url())
            .send()
            .await
            .map_err(|source| RagError::Network {
                service: "vector store",
                source,
            })?;

        let status = response.status();
        if !status.is_success() && status.as_u16() != 404 {
            return Err(RagError::Store {
                detail: format!(
                    "failed to delete collection: {}",
                    response.text().await.unwrap_or_default()
                ),
            });
        }
        Ok(())
    }

    /// Writes documents through with `wait=true` so an immediately following
    /// search sees them.
    pub async fn upsert(&self, documents: &[Document]) -> Result<(), RagError> {
        if documents.is_empty() {
            return Ok(());
        }

        let points: Vec<Value> = documents
            .iter()
            .map(|document| {
                json!({
                    "id": document.id,
                    "vector": document.vector,
                    "payload": payload_for(document),
                })
            })
            .collect();

        debug!(points = points.len(), "upserting points");
        let response = self
            .http
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&json!({ "points": points }))
            .send()
            .await
            .map_err(|source| RagError::Network {
                service: "vector store",
                source,
            })?;
        if !response.status().is_success() {
            return Err(RagError::Store {
                detail: format!(
                    "failed to upsert points: {}",
                    response.text().await.unwrap_or_default()
                ),
            });
        }
        Ok(())
    }

    /// Top-k nearest documents by cosine similarity.
    pub async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<Document>, RagError> {
        let response = self
            .http
            .post(format!("{}/points/search", self.collection_url()))
            .json(&json!({
                "vector": vector,
                "limit": limit,
                "with_payload": true,
            }))
            .send()
            .await
            .map_err(|source| RagError::Network {
                service: "vector store",
                source,
            })?;
        if !response.status().is_success() {
            return Err(RagError::Store {
                detail: format!(
                    "search failed: {}",
                    response.text().await.unwrap_or_default()
                ),
            });
        }

        let parsed: SearchResponse = response.json().await.map_err(|source| RagError::Network {
            service: "vector store",
            source,
        })?;

        Ok(parsed
            .result
            .into_iter()
            .map(|hit| {
                let mut content = String::new();
                let mut source_type = SourceType::Text;
                let mut image_path = None;
                let mut metadata = BTreeMap::new();

                for (key, value) in hit.payload {
                    let Value::String(value) = value else { continue };
                    match key.as_str() {
                        "content" => content = value,
                        "source_type" => source_type = SourceType::from_str(&value),
                        "image_path" => image_path = Some(value),
                        _ => {
                            metadata.insert(key, value);
                        }
                    }
                }

                Document {
                    id: match hit.id {
                        Value::String(id) => id,
                        Value::Number(id) => id.to_string(),
                        _ => String::new(),
                    },
                    content,
                    vector: Vec::new(),
                    score: hit.score,
                    source_type,
                    image_path,
                    metadata,
                }
            })
            .collect())
    }

    /// Number of points currently stored in the collection.
    pub async fn count(&self) -> Result<u64, RagError> {
        let response: CollectionInfoResponse = self
            .http
            .get(self.collection_url())
            .send()
            .await
            .map_err(|source| RagError::Network {
                service: "vector store",
                source,
            })?
            .json()
            .await
            .map_err(|source| RagError::Network {
                service: "vector store",
                source,
            })?;

        Ok(response.result.points_count)
    }
}

fn payload_for(document: &Document) -> Value {
    let mut payload = Map::new();
    payload.insert("content".to_string(), json!(document.content));
    payload.insert("source_type".to_string(), json!(document.source_type.as_str()));
    for (key, value) in &document.metadata {
        payload.insert(key.clone(), json!(value));
    }
    if let Some(image_path) = &document.image_path {
        payload.insert("image_path".to_string(), json!(image_path));
    }
    Value::Object(payload)
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    id: Value,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    payload: Map<String, Value>,
}

#[derive(Deserialize)]
struct CollectionInfoResponse {
    result: CollectionInfo,
}

#[derive(Deserialize)]
struct CollectionInfo {
    #[serde(default)]
    points_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_id_is_deterministic() {
        let a = document_id("/wiki/page.html", "Deployment steps for the api server");
        let b = document_id("/wiki/page.html", "Deployment steps for the api server");
        assert_eq!(a, b);
    }

    #[test]
    fn document_id_depends_on_path_and_content() {
        let base = document_id("/wiki/page.html", "content");
        assert_ne!(base, document_id("/wiki/other.html", "content"));
        assert_ne!(base, document_id("/wiki/page.html", "different content"));
    }

    #[test]
    fn document_id_is_a_uuid() {
        let id = document_id("/wiki/page.html", "content");
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn payload_carries_metadata_and_image_path() {
        let mut metadata = BTreeMap::new();
        metadata.insert("page_title".to_string(), "Architecture".to_string());

        let document = Document {
            id: document_id("/wiki/arch.html", "image"),
            content: "An architecture diagram.".to_string(),
            vector: vec![0.0; 4],
            score: 0.0,
            source_type: SourceType::Image,
            image_path: Some("/wiki/diagram.png".to_string()),
            metadata,
        };

        let payload = payload_for(&document);
        assert_eq!(payload["content"], "An architecture diagram.");
        assert_eq!(payload["source_type"], "image");
        assert_eq!(payload["page_title"], "Architecture");
        assert_eq!(payload["image_path"], "/wiki/diagram.png");
    }

    #[test]
    fn text_payload_omits_image_path() {
        let document = Document {
            id: document_id("/wiki/page.html", "text"),
            content: "Some text.".to_string(),
            vector: Vec::new(),
            score: 0.0,
            source_type: SourceType::Text,
            image_path: None,
            metadata: BTreeMap::new(),
        };

        let payload = payload_for(&document);
        assert!(payload.get("image_path").is_none());
    }
}
