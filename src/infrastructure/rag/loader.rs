use std::fs;
use std::path::{Path, PathBuf};

use scraper::{ElementRef, Html};
use tracing::warn;

use super::error::RagError;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "svg"];

/// Parsed content of one HTML page.
#[derive(Debug, Clone)]
pub struct PageContent {
    pub title: String,
    pub file_path: PathBuf,
    pub chunks: Vec<TextChunk>,
    pub images: Vec<ImageRef>,
}

#[derive(Debug, Clone)]
pub struct TextChunk {
    pub content: String,
    pub kind: ChunkKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Heading,
    Paragraph,
    List,
    Code,
}

impl ChunkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkKind::Heading => "heading",
            ChunkKind::Paragraph => "paragraph",
            ChunkKind::List => "list",
            ChunkKind::Code => "code",
        }
    }
}

/// A page-relative image that resolved to a real file on disk.
#[derive(Debug, Clone)]
pub struct ImageRef {
    pub src: String,
    pub alt: String,
    pub full_path: PathBuf,
}

/// Parses an exported HTML wiki tree (Confluence-style) into pages.
pub struct HtmlLoader {
    base_path: PathBuf,
}

impl HtmlLoader {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Loads every `.html`/`.htm` file under the base path. Pages that fail
    /// to load are logged and skipped; pages without content are dropped.
    pub fn load_all(&self) -> Result<Vec<PageContent>, RagError> {
        let mut pages = Vec::new();
        self.walk(&self.base_path, &mut pages)?;
        Ok(pages)
    }

    fn walk(&self, dir: &Path, pages: &mut Vec<PageContent>) -> Result<(), RagError> {
        let entries = fs::read_dir(dir).map_err(|source| RagError::Walk {
            path: dir.to_path_buf(),
            source,
        })?;

        for entry in entries {
            let entry = entry.map_err(|source| RagError::Walk {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if path.is_dir() {
                self.walk(&path, pages)?;
                continue;
            }

            let is_html = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| {
                    let ext = ext.to_lowercase();
                    ext == "html" || ext == "htm"
                });
            if !is_html {
                continue;
            }

            match self.load_page(&path) {
                Ok(page) => {
                    if !page.chunks.is_empty() || !page.images.is_empty() {
                        pages.push(page);
                    }
                }
                Err(error) => {
                    warn!(path = %path.display(), %error, "failed to parse page, skipping");
                }
            }
        }
        Ok(())
    }

    /// Parses a single page, extracting the title, typed text chunks in
    /// document order, and resolvable image references.
    pub fn load_page(&self, path: &Path) -> Result<PageContent, RagError> {
        let html = fs::read_to_string(path).map_err(|source| RagError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let document = Html::parse_document(&html);

        let mut page = PageContent {
            title: String::new(),
            file_path: path.to_path_buf(),
            chunks: Vec::new(),
            images: Vec::new(),
        };

        for node in document.root_element().descendants() {
            let Some(element) = ElementRef::wrap(node) else {
                continue;
            };
            match element.value().name() {
                "title" => {
                    if page.title.is_empty() {
                        page.title = collapse_whitespace(&element.text().collect::<String>());
                    }
                }
                "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                    push_chunk(&mut page.chunks, element, ChunkKind::Heading, "");
                }
                "p" => {
                    push_chunk(&mut page.chunks, element, ChunkKind::Paragraph, "");
                }
                "li" => {
                    push_chunk(&mut page.chunks, element, ChunkKind::List, "- ");
                }
                "pre" | "code" => {
                    push_chunk(&mut page.chunks, element, ChunkKind::Code, "");
                }
                "img" => {
                    if let Some(image) = self.resolve_image(element, path) {
                        page.images.push(image);
                    }
                }
                _ => {}
            }
        }

        Ok(page)
    }

    /// Accepts only relative `src` paths with an image extension that point
    /// at an existing file; data URIs and external URLs are ignored.
    fn resolve_image(&self, element: ElementRef<'_>, page_path: &Path) -> Option<ImageRef> {
        let src = element.value().attr("src")?;
        if src.is_empty()
            || src.starts_with("data:")
            || src.starts_with("http://")
            || src.starts_with("https://")
        {
            return None;
        }

        let extension = Path::new(src)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)?;
        if !IMAGE_EXTENSIONS.contains(&extension.as_str()) {
            return None;
        }

        let mut full_path = page_path
            .parent()
            .unwrap_or(Path::new("."))
            .join(src);
        if !full_path.exists() {
            full_path = self.base_path.join(src);
            if !full_path.exists() {
                return None;
            }
        }

        Some(ImageRef {
            src: src.to_string(),
            alt: element.value().attr("alt").unwrap_or_default().to_string(),
            full_path,
        })
    }
}

fn push_chunk(chunks: &mut Vec<TextChunk>, element: ElementRef<'_>, kind: ChunkKind, prefix: &str) {
    let text = collapse_whitespace(&element.text().collect::<String>());
    if text.is_empty() {
        return;
    }
    chunks.push(TextChunk {
        content: format!("{prefix}{text}"),
        kind,
    });
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Test Page</title></head>
<body>
<h1>Main Heading</h1>
<p>This is a test
   paragraph with some content.</p>
<h2>Sub Heading</h2>
<ul>
<li>List item 1</li>
<li>List item 2</li>
</ul>
<pre>Some code here</pre>
</body>
</html>"#;

    #[test]
    fn extracts_title_and_typed_chunks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let page_path = dir.path().join("test.html");
        fs::write(&page_path, PAGE).expect("write page");

        let loader = HtmlLoader::new(dir.path());
        let page = loader.load_page(&page_path).expect("load page");

        assert_eq!(page.title, "Test Page");
        assert!(page.chunks.len() >= 4, "got {} chunks", page.chunks.len());

        for kind in [
            ChunkKind::Heading,
            ChunkKind::Paragraph,
            ChunkKind::List,
            ChunkKind::Code,
        ] {
            assert!(
                page.chunks.iter().any(|chunk| chunk.kind == kind),
                "missing {kind:?} chunk"
            );
        }

        let paragraph = page
            .chunks
            .iter()
            .find(|chunk| chunk.kind == ChunkKind::Paragraph)
            .expect("paragraph");
        assert_eq!(paragraph.content, "This is a test paragraph with some content.");

        let list = page
            .chunks
            .iter()
            .find(|chunk| chunk.kind == ChunkKind::List)
            .expect("list item");
        assert!(list.content.starts_with("- "));
    }

    #[test]
    fn load_all_walks_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("test.html"), PAGE).expect("write page");
        fs::write(dir.path().join("notes.txt"), "not html").expect("write txt");

        let loader = HtmlLoader::new(dir.path());
        let pages = loader.load_all().expect("load all");

        assert_eq!(pages.len(), 1);
    }

    #[test]
    fn resolves_relative_images() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("diagram.png"), b"fake png").expect("write image");
        let html = r#"<html><head><title>Page With Image</title></head>
<body>
<h1>Architecture</h1>
<p>Here is the diagram:</p>
<img src="diagram.png" alt="Architecture Diagram">
</body></html>"#;
        let page_path = dir.path().join("page.html");
        fs::write(&page_path, html).expect("write page");

        let loader = HtmlLoader::new(dir.path());
        let page = loader.load_page(&page_path).expect("load page");

        assert_eq!(page.images.len(), 1);
        let image = &page.images[0];
        assert_eq!(image.src, "diagram.png");
        assert_eq!(image.alt, "Architecture Diagram");
        assert!(image.full_path.exists());
    }

    #[test]
    fn rejects_external_and_missing_images() {
        let dir = tempfile::tempdir().expect("tempdir");
        let html = r#"<html><body>
<img src="https://example.com/remote.png" alt="remote">
<img src="data:image/png;base64,AAAA" alt="inline">
<img src="missing.png" alt="gone">
<img src="notes.txt" alt="wrong type">
</body></html>"#;
        let page_path = dir.path().join("page.html");
        fs::write(&page_path, html).expect("write page");

        let loader = HtmlLoader::new(dir.path());
        let page = loader.load_page(&page_path).expect("load page");

        assert!(page.images.is_empty());
    }
}
