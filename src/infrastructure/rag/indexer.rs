use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use super::chunk::chunk_text;
use super::embeddings::EmbeddingClient;
use super::error::RagError;
use super::loader::HtmlLoader;
use super::store::{Document, SourceType, VectorStore, document_id};
use super::vision::VisionClient;

const EMBED_BATCH_SIZE: usize = 10;
const MIN_CHUNK_LEN: usize = 20;
const VISION_CACHE_FILE: &str = ".vision_cache.json";

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub wiki_path: PathBuf,
    pub ollama_url: String,
    pub qdrant_url: String,
    pub collection_name: String,
    pub embed_model: String,
    pub vision_model: String,
    pub vector_size: usize,
    pub chunk_size: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            wiki_path: PathBuf::new(),
            ollama_url: "http://127.0.0.1:11434".to_string(),
            qdrant_url: "http://localhost:6333".to_string(),
            collection_name: "confluence_wiki".to_string(),
            embed_model: "nomic-embed-text".to_string(),
            vision_model: "llava".to_string(),
            // nomic-embed-text dimension
            vector_size: 768,
            chunk_size: 500,
        }
    }
}

/// Indexes an HTML wiki export into the vector store: pages become text
/// documents per sub-chunk and image documents per described image.
pub struct Indexer {
    config: IndexerConfig,
    embeddings: Arc<EmbeddingClient>,
    vision: VisionClient,
    store: Arc<VectorStore>,
    loader: HtmlLoader,
}

impl Indexer {
    pub fn new(config: IndexerConfig) -> Self {
        let embeddings = Arc::new(EmbeddingClient::new(
            config.ollama_url.clone(),
            config.embed_model.clone(),
        ));
        let vision = VisionClient::new(
            config.ollama_url.clone(),
            config.vision_model.clone(),
            Some(config.wiki_path.join(VISION_CACHE_FILE)),
        );
        let store = Arc::new(VectorStore::new(
            config.qdrant_url.clone(),
            config.collection_name.clone(),
        ));
        let loader = HtmlLoader::new(config.wiki_path.clone());

        Self {
            config,
            embeddings,
            vision,
            store,
            loader,
        }
    }

    /// Full re-index: reset the collection, rebuild every document, embed in
    /// batches, and write everything through.
    pub async fn index(&self) -> Result<(), RagError> {
        info!(path = %self.config.wiki_path.display(), "loading wiki export");
        let pages = self.loader.load_all()?;
        info!(pages = pages.len(), "pages to index");

        info!("resetting vector store collection");
        self.store.delete_collection().await?;
        self.store.ensure_collection(self.config.vector_size).await?;

        let mut documents = Vec::new();
        for (position, page) in pages.iter().enumerate() {
            info!(
                page = position + 1,
                total = pages.len(),
                title = page.title.as_str(),
                "processing page"
            );
            let page_path = page.file_path.to_string_lossy().to_string();

            for chunk in &page.chunks {
                for text in chunk_text(&chunk.content, self.config.chunk_size) {
                    if text.len() < MIN_CHUNK_LEN {
                        continue;
                    }

                    let mut metadata = BTreeMap::new();
                    metadata.insert("page_title".to_string(), page.title.clone());
                    metadata.insert("file_path".to_string(), page_path.clone());
                    metadata.insert("chunk_type".to_string(), chunk.kind.as_str().to_string());

                    documents.push(Document {
                        id: document_id(&page_path, &text),
                        content: text,
                        vector: Vec::new(),
                        score: 0.0,
                        source_type: SourceType::Text,
                        image_path: None,
                        metadata,
                    });
                }
            }

            for image in &page.images {
                let image_path = image.full_path.to_string_lossy().to_string();
                info!(image = image_path.as_str(), "describing image");

                let description = match self.vision.describe_image(&image.full_path).await {
                    Ok(description) => description,
                    Err(error) => {
                        warn!(image = image_path.as_str(), %error, "failed to describe image, skipping");
                        continue;
                    }
                };

                let mut metadata = BTreeMap::new();
                metadata.insert("page_title".to_string(), page.title.clone());
                metadata.insert("file_path".to_string(), page_path.clone());
                metadata.insert("image_alt".to_string(), image.alt.clone());

                documents.push(Document {
                    id: document_id(&image_path, "image"),
                    content: description,
                    vector: Vec::new(),
                    score: 0.0,
                    source_type: SourceType::Image,
                    image_path: Some(image_path),
                    metadata,
                });
            }
        }

        info!(documents = documents.len(), "generating embeddings");
        let total = documents.len();
        let mut embedded = 0;
        for batch in documents.chunks_mut(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|doc| doc.content.clone()).collect();
            let vectors = self.embeddings.embed_batch(&texts).await?;
            for (document, vector) in batch.iter_mut().zip(vectors) {
                document.vector = vector;
            }
            embedded += batch.len();
            info!(embedded, total, "embedded documents");
        }

        info!("storing documents in vector store");
        self.store.upsert(&documents).await?;
        info!(documents = documents.len(), "indexing complete");
        Ok(())
    }

    /// Query-side handles for the wiki tool; the tool borrows these, the
    /// indexer keeps ownership of the pipeline.
    pub fn embeddings(&self) -> Arc<EmbeddingClient> {
        Arc::clone(&self.embeddings)
    }

    pub fn store(&self) -> Arc<VectorStore> {
        Arc::clone(&self.store)
    }
}
