mod chunk;
mod embeddings;
mod error;
mod indexer;
mod loader;
mod store;
mod vision;

pub use chunk::chunk_text;
pub use embeddings::EmbeddingClient;
pub use error::RagError;
pub use indexer::{Indexer, IndexerConfig};
pub use loader::{ChunkKind, HtmlLoader, ImageRef, PageContent, TextChunk};
pub use store::{Document, SourceType, VectorStore, document_id};
pub use vision::VisionClient;
