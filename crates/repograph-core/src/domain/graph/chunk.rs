//! Chunks: bounded spans of file content

use serde::{Deserialize, Serialize};

use super::entity::SourceKind;
use super::ids;

/// Byte and line range of a chunk within its file (lines are 1-based, inclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start_byte: usize,
    pub end_byte: usize,
    pub start_line: usize,
    pub end_line: usize,
}

impl Span {
    pub fn len(&self) -> usize {
        self.end_byte.saturating_sub(self.start_byte)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_byte(&self, byte: usize) -> bool {
        byte >= self.start_byte && byte < self.end_byte
    }
}

/// A unit of extraction and embedding, owned by exactly one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub path: String,
    pub span: Span,
    pub origin: SourceKind,
    pub content: String,
    pub content_hash: String,
    pub embedding: Option<Vec<f32>>,
}

impl Chunk {
    pub fn new(path: &str, span: Span, origin: SourceKind, content: impl Into<String>) -> Self {
        let content = content.into();
        let content_hash = ids::content_hash(content.as_bytes());
        Self {
            id: ids::chunk_id(path, span.start_byte, span.end_byte, &content_hash),
            path: path.to_string(),
            span,
            origin,
            content,
            content_hash,
            embedding: None,
        }
    }

    pub fn token_estimate(&self) -> usize {
        super::estimate_tokens(&self.content)
    }

    /// Equality ignoring the embedding
    pub fn same_content(&self, other: &Chunk) -> bool {
        self.id == other.id
            && self.path == other.path
            && self.span == other.span
            && self.origin == other.origin
            && self.content_hash == other.content_hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(start: usize, end: usize) -> Span {
        Span {
            start_byte: start,
            end_byte: end,
            start_line: 1,
            end_line: 1,
        }
    }

    #[test]
    fn test_chunk_id_is_deterministic() {
        let a = Chunk::new("/r/a.md", span(0, 5), SourceKind::Document, "hello");
        let b = Chunk::new("/r/a.md", span(0, 5), SourceKind::Document, "hello");
        let c = Chunk::new("/r/a.md", span(0, 5), SourceKind::Document, "world");
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert!(a.id.starts_with("chk-"));
    }

    #[test]
    fn test_span_helpers() {
        let s = span(10, 20);
        assert_eq!(s.len(), 10);
        assert!(s.contains_byte(10));
        assert!(!s.contains_byte(20));
    }
}
