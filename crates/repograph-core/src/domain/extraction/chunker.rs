//! Token-bounded chunking
//!
//! Chunks are contiguous byte ranges of the file. Identical content always
//! yields identical boundaries. For code, boundaries follow top-level
//! declarations and only descend into a declaration that does not fit the
//! budget on its own; a node without children is never split. Budgets are
//! counted in cl100k tokens, so CJK text is bounded as tightly as English.

use crate::domain::graph::{Chunk, SourceKind, Span};
use crate::error::Result;

use super::syntax::SyntaxNode;
use super::tokens::TokenCounter;

#[derive(Debug, Clone)]
pub struct Chunker {
    max_tokens: usize,
    counter: TokenCounter,
}

/// Byte range that is either packed with neighbours or kept whole
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Piece {
    start: usize,
    end: usize,
}

impl Chunker {
    pub fn new(max_tokens: usize) -> Result<Self> {
        Ok(Self::with_counter(max_tokens, TokenCounter::cl100k()?))
    }

    pub fn with_counter(max_tokens: usize, counter: TokenCounter) -> Self {
        Self {
            max_tokens: max_tokens.max(1),
            counter,
        }
    }

    fn fits(&self, content: &str, start: usize, end: usize) -> bool {
        content
            .get(start..end)
            .is_some_and(|s| self.counter.fits(s, self.max_tokens))
    }

    /// Split prose on paragraph, then line, then character boundaries
    pub fn chunk_document(&self, path: &str, content: &str) -> Vec<Chunk> {
        let pieces = self.document_pieces(content, 0, content.len());
        self.pack(path, content, &pieces, SourceKind::Document)
    }

    /// Split code along the syntax tree; without a tree fall back to prose rules
    pub fn chunk_code(&self, path: &str, content: &str, root: Option<&SyntaxNode>) -> Vec<Chunk> {
        let pieces = match root {
            Some(root) if !root.children.is_empty() => {
                let mut pieces = Vec::new();
                self.node_pieces(content, &root.children, 0, content.len(), &mut pieces);
                pieces
            }
            _ => self.document_pieces(content, 0, content.len()),
        };
        self.pack(path, content, &pieces, SourceKind::Code)
    }

    /// Cover `[start, end)` with one piece per node; gaps attach to the following node
    fn node_pieces(
        &self,
        content: &str,
        nodes: &[SyntaxNode],
        start: usize,
        end: usize,
        out: &mut Vec<Piece>,
    ) {
        let mut cursor = start;
        let last = nodes.len().saturating_sub(1);
        for (i, node) in nodes.iter().enumerate() {
            let piece_end = if i == last {
                end
            } else {
                node.end_byte.clamp(cursor, end)
            };
            if piece_end <= cursor {
                continue;
            }
            if self.fits(content, cursor, piece_end) || node.children.is_empty() {
                out.push(Piece {
                    start: cursor,
                    end: piece_end,
                });
            } else {
                self.node_pieces(content, &node.children, cursor, piece_end, out);
            }
            cursor = piece_end;
        }
        if cursor < end {
            out.push(Piece { start: cursor, end });
        }
    }

    fn document_pieces(&self, content: &str, start: usize, end: usize) -> Vec<Piece> {
        let mut pieces = Vec::new();
        for paragraph in split_paragraphs(content, start, end) {
            if self.fits(content, paragraph.start, paragraph.end) {
                pieces.push(paragraph);
                continue;
            }
            for line in split_lines(content, paragraph.start, paragraph.end) {
                if self.fits(content, line.start, line.end) {
                    pieces.push(line);
                } else {
                    self.split_to_fit(content, line.start, line.end, &mut pieces);
                }
            }
        }
        pieces
    }

    /// Halve `[start, end)` on char boundaries until every half fits; a single char is kept whole
    fn split_to_fit(&self, content: &str, start: usize, end: usize, out: &mut Vec<Piece>) {
        if self.fits(content, start, end) {
            out.push(Piece { start, end });
            return;
        }
        let boundaries: Vec<usize> = content[start..end]
            .char_indices()
            .map(|(offset, _)| start + offset)
            .skip(1)
            .collect();
        if boundaries.is_empty() {
            out.push(Piece { start, end });
            return;
        }
        let mid = boundaries[boundaries.len() / 2];
        self.split_to_fit(content, start, mid, out);
        self.split_to_fit(content, mid, end, out);
    }

    /// Greedily pack adjacent pieces while they fit the budget
    fn pack(&self, path: &str, content: &str, pieces: &[Piece], origin: SourceKind) -> Vec<Chunk> {
        let mut ranges: Vec<Piece> = Vec::new();
        for piece in pieces {
            match ranges.last_mut() {
                Some(current) if self.fits(content, current.start, piece.end) => {
                    current.end = piece.end;
                }
                _ => ranges.push(*piece),
            }
        }

        ranges
            .into_iter()
            .filter_map(|range| {
                let text = content.get(range.start..range.end)?;
                if text.trim().is_empty() {
                    return None;
                }
                let span = Span {
                    start_byte: range.start,
                    end_byte: range.end,
                    start_line: line_at(content, range.start),
                    end_line: line_at(content, range.end.saturating_sub(1).max(range.start)),
                };
                Some(Chunk::new(path, span, origin, text))
            })
            .collect()
    }
}

/// 1-based line number of a byte offset
fn line_at(content: &str, byte: usize) -> usize {
    content
        .get(..byte)
        .map_or(1, |prefix| prefix.matches('\n').count() + 1)
}

/// Paragraphs end after a run of blank lines
fn split_paragraphs(content: &str, start: usize, end: usize) -> Vec<Piece> {
    let mut pieces = Vec::new();
    let mut piece_start = start;
    let mut in_blank_run = false;
    for line in split_lines(content, start, end) {
        let blank = content[line.start..line.end].trim().is_empty();
        if !blank && in_blank_run {
            pieces.push(Piece {
                start: piece_start,
                end: line.start,
            });
            piece_start = line.start;
        }
        in_blank_run = blank;
    }
    if piece_start < end {
        pieces.push(Piece {
            start: piece_start,
            end,
        });
    }
    pieces
}

fn split_lines(content: &str, start: usize, end: usize) -> Vec<Piece> {
    let mut pieces = Vec::new();
    let mut offset = start;
    for line in content[start..end].split_inclusive('\n') {
        pieces.push(Piece {
            start: offset,
            end: offset + line.len(),
        });
        offset += line.len();
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(chunks: &[Chunk]) -> Vec<&str> {
        chunks.iter().map(|c| c.content.as_str()).collect()
    }

    fn chunker(max_tokens: usize) -> Chunker {
        Chunker::new(max_tokens).unwrap()
    }

    fn assert_bounded(chunks: &[Chunk], max_tokens: usize) {
        let counter = TokenCounter::cl100k().unwrap();
        for chunk in chunks {
            assert!(
                counter.count(&chunk.content) <= max_tokens || chunk.content.chars().count() == 1,
                "chunk over budget: {:?}",
                chunk.content
            );
        }
    }

    #[test]
    fn test_small_document_is_one_chunk() {
        let content = "# Title\n\nSome text.\n";
        let chunks = chunker(100).chunk_document("/r/a.md", content);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, content);
        assert_eq!(chunks[0].span.start_line, 1);
        assert_eq!(chunks[0].span.end_line, 3);
        assert_eq!(chunks[0].origin, SourceKind::Document);
    }

    #[test]
    fn test_document_splits_on_paragraphs() {
        let content = "one two\n\nthree four\n\nfive six\n";
        let chunks = chunker(5).chunk_document("/r/a.md", content);
        assert_eq!(
            texts(&chunks),
            vec!["one two\n\n", "three four\n\n", "five six\n"]
        );
        assert_bounded(&chunks, 5);
    }

    #[test]
    fn test_oversize_line_is_split_on_char_boundaries() {
        let content = "é".repeat(10);
        let chunks = chunker(1).chunk_document("/r/a.txt", &content);
        assert!(chunks.len() > 1);
        assert_bounded(&chunks, 1);
        assert_eq!(texts(&chunks).concat(), content);
    }

    #[test]
    fn test_cjk_text_respects_token_budget() {
        let content = "日本語のテキストを分割します。".repeat(40);
        let chunks = chunker(20).chunk_document("/r/readme.txt", &content);
        assert!(chunks.len() > 1);
        assert_bounded(&chunks, 20);
        assert_eq!(texts(&chunks).concat(), content);
        // Four chars per token would have allowed 80 chars per chunk
        assert!(chunks.iter().all(|c| c.content.chars().count() < 80));
    }

    #[test]
    fn test_chunking_is_deterministic() {
        let content = "one\ntwo\n\nthree four five six\nseven\n";
        let chunker = chunker(3);
        let a = chunker.chunk_document("/r/a.md", content);
        let b = chunker.chunk_document("/r/a.md", content);
        assert_eq!(a, b);
    }

    #[test]
    fn test_code_chunks_align_to_declarations() {
        let content = "fn a() { 1 }\nfn b() { 2 }\n";
        let root = SyntaxNode::new("source_file", 0, content.len())
            .with_child(SyntaxNode::new("function_item", 0, 12))
            .with_child(SyntaxNode::new("function_item", 13, 25));
        let chunks = chunker(4).chunk_code("/r/a.rs", content, Some(&root));
        assert_eq!(texts(&chunks), vec!["fn a() { 1 }", "\nfn b() { 2 }\n"]);
        assert!(chunks.iter().all(|c| c.origin == SourceKind::Code));
    }

    #[test]
    fn test_oversize_leaf_stays_whole() {
        let content = "const TABLE: &str = \"a very long literal that does not fit\";\n";
        let root = SyntaxNode::new("source_file", 0, content.len())
            .with_child(SyntaxNode::new("const_item", 0, content.len() - 1));
        let chunks = chunker(2).chunk_code("/r/a.rs", content, Some(&root));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, content);
    }

    #[test]
    fn test_code_without_tree_falls_back() {
        let content = "x = 1\n\ny = 2\n";
        let chunks = chunker(100).chunk_code("/r/a.py", content, None);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].origin, SourceKind::Code);
    }
}
