use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use super::interface::{Tool, ToolArgs, ToolError};
use crate::infrastructure::rag::{Document, EmbeddingClient, SourceType, VectorStore};

const DEFAULT_LIMIT: usize = 5;
const EXCERPT_LEN: usize = 500;

/// Semantic search over the indexed wiki. Borrows the RAG pipeline's
/// embedding client and vector store.
pub struct WikiTool {
    embeddings: Arc<EmbeddingClient>,
    store: Arc<VectorStore>,
}

impl WikiTool {
    pub fn new(embeddings: Arc<EmbeddingClient>, store: Arc<VectorStore>) -> Self {
        Self { embeddings, store }
    }

    async fn search(&self, args: &ToolArgs) -> Result<String, ToolError> {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .filter(|query| !query.is_empty())
            .ok_or(ToolError::MissingParameter { name: "query" })?;
        let limit = parse_limit(args);

        debug!(query, limit, "searching wiki index");
        let vector = self.embeddings.embed(query).await?;
        let results = self.store.search(&vector, limit).await?;

        if results.is_empty() {
            return Ok("No relevant results found in the wiki.".to_string());
        }
        Ok(format_results(&results))
    }

    async fn count(&self) -> Result<String, ToolError> {
        let count = self.store.count().await?;
        Ok(format!("Wiki index contains {count} documents."))
    }
}

/// Any JSON number is honoured, truncated toward zero with negatives
/// clamped; non-numbers fall back to the default of 5.
fn parse_limit(args: &ToolArgs) -> usize {
    args.get("limit")
        .and_then(Value::as_f64)
        .map(|limit| limit as usize)
        .unwrap_or(DEFAULT_LIMIT)
}

fn format_results(results: &[Document]) -> String {
    let mut rendered = format!("Found {} relevant results:\n\n", results.len());

    for (position, document) in results.iter().enumerate() {
        let tag = match document.source_type {
            SourceType::Text => "TEXT",
            SourceType::Image => "DIAGRAM",
        };
        let title = document
            .metadata
            .get("page_title")
            .filter(|title| !title.is_empty())
            .map(String::as_str)
            .unwrap_or("Unknown Page");

        let _ = writeln!(
            rendered,
            "{}. [{tag}] {title} (score: {:.2})",
            position + 1,
            document.score
        );
        if document.source_type == SourceType::Image {
            if let Some(image_path) = &document.image_path {
                let _ = writeln!(rendered, "   Image: {image_path}");
            }
        }

        let excerpt = if document.content.chars().count() > EXCERPT_LEN {
            let cut: String = document.content.chars().take(EXCERPT_LEN).collect();
            format!("{cut}...")
        } else {
            document.content.clone()
        };
        let _ = writeln!(rendered, "   {excerpt}\n");
    }

    rendered
}

#[async_trait]
impl Tool for WikiTool {
    fn name(&self) -> &str {
        "wiki"
    }

    fn description(&self) -> String {
        "Search the Confluence wiki for relevant documentation, diagrams, and architecture information. Use when user asks about internal documentation, architecture diagrams, deployment, or project-specific knowledge."
            .to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "description": "Action to perform: 'search' to find relevant content, 'count' to get total indexed documents",
                    "enum": ["search", "count"],
                },
                "query": {
                    "type": "string",
                    "description": "Search query (required for 'search' action)",
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of results to return (default: 5)",
                },
            },
            "required": ["action"],
        })
    }

    async fn invoke(&self, args: &ToolArgs) -> Result<String, ToolError> {
        let action = args
            .get("action")
            .and_then(Value::as_str)
            .ok_or(ToolError::MissingParameter { name: "action" })?;

        match action {
            "search" => self.search(args).await,
            "count" => self.count().await,
            other => Err(ToolError::UnknownAction {
                action: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn text_hit(title: &str, content: &str, score: f32) -> Document {
        let mut metadata = BTreeMap::new();
        metadata.insert("page_title".to_string(), title.to_string());
        Document {
            id: "id".to_string(),
            content: content.to_string(),
            vector: Vec::new(),
            score,
            source_type: SourceType::Text,
            image_path: None,
            metadata,
        }
    }

    #[test]
    fn formats_numbered_blocks_with_scores() {
        let results = vec![
            text_hit("Deployment Guide", "Run the deploy script.", 0.914),
            text_hit("Runbook", "Check the dashboards first.", 0.52),
        ];

        let rendered = format_results(&results);

        assert!(rendered.starts_with("Found 2 relevant results:"));
        assert!(rendered.contains("1. [TEXT] Deployment Guide (score: 0.91)"));
        assert!(rendered.contains("2. [TEXT] Runbook (score: 0.52)"));
        assert!(rendered.contains("Run the deploy script."));
    }

    #[test]
    fn diagram_hits_include_image_path() {
        let mut hit = text_hit("Architecture", "A component diagram.", 0.8);
        hit.source_type = SourceType::Image;
        hit.image_path = Some("/wiki/diagram.png".to_string());

        let rendered = format_results(&[hit]);

        assert!(rendered.contains("[DIAGRAM] Architecture"));
        assert!(rendered.contains("Image: /wiki/diagram.png"));
    }

    #[test]
    fn long_excerpts_are_truncated() {
        let hit = text_hit("Long Page", &"x".repeat(600), 0.7);
        let rendered = format_results(&[hit]);

        assert!(rendered.contains(&format!("{}...", "x".repeat(500))));
        assert!(!rendered.contains(&"x".repeat(501)));
    }

    #[test]
    fn limit_accepts_any_json_number() {
        let mut args = ToolArgs::new();
        assert_eq!(parse_limit(&args), 5);

        args.insert("limit".to_string(), json!(3));
        assert_eq!(parse_limit(&args), 3);

        args.insert("limit".to_string(), json!(2.9));
        assert_eq!(parse_limit(&args), 2);

        args.insert("limit".to_string(), json!(-4));
        assert_eq!(parse_limit(&args), 0);

        args.insert("limit".to_string(), json!("ten"));
        assert_eq!(parse_limit(&args), 5);
    }

    #[test]
    fn missing_title_falls_back() {
        let mut hit = text_hit("", "Content here.", 0.6);
        hit.metadata.clear();

        let rendered = format_results(&[hit]);
        assert!(rendered.contains("Unknown Page"));
    }
}
