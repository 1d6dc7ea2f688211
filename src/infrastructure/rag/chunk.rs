use std::sync::OnceLock;

use regex::Regex;

/// Splits text into embedding-sized chunks. Text at or under the limit
/// passes through unchanged; longer text is split at sentence boundaries
/// and greedily packed.
pub fn chunk_text(content: &str, max_chunk_size: usize) -> Vec<String> {
    let content = content.trim();
    if content.is_empty() {
        return Vec::new();
    }
    if content.len() <= max_chunk_size {
        return vec![content.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    for sentence in split_sentences(content) {
        if current.len() + sentence.len() > max_chunk_size && !current.is_empty() {
            chunks.push(current.trim().to_string());
            current.clear();
        }
        current.push_str(&sentence);
        current.push(' ');
    }
    if !current.is_empty() {
        chunks.push(current.trim().to_string());
    }
    chunks
}

fn split_sentences(text: &str) -> Vec<String> {
    static BOUNDARY: OnceLock<Regex> = OnceLock::new();
    let boundary = BOUNDARY.get_or_init(|| Regex::new(r"[.!?]+\s+").expect("sentence pattern"));

    boundary
        .split(text)
        .filter_map(|part| {
            let part = part.trim();
            (!part.is_empty()).then(|| part.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = chunk_text("This is a short text.", 100);
        assert_eq!(chunks, vec!["This is a short text.".to_string()]);
    }

    #[test]
    fn long_text_splits_at_sentence_boundaries() {
        let chunks = chunk_text(
            "First sentence. Second sentence. Third sentence. Fourth sentence. Fifth sentence.",
            40,
        );
        assert_eq!(chunks.len(), 3);
        for chunk in &chunks {
            assert!(!chunk.starts_with(' '));
            assert!(!chunk.ends_with(' '));
        }
    }

    #[test]
    fn empty_text_yields_nothing() {
        assert!(chunk_text("", 100).is_empty());
        assert!(chunk_text("   \n\t ", 100).is_empty());
    }

    #[test]
    fn oversized_single_sentence_stays_whole() {
        let text = "word ".repeat(50);
        let chunks = chunk_text(&text, 40);
        assert_eq!(chunks.len(), 1);
    }
}
