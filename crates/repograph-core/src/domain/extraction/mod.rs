//! Chunking and structural extraction
//!
//! Code goes through the syntax parser collaborator and [`CodeExtractor`];
//! documents go through [`DocumentExtractor`] and the language model. Both
//! produce a [`FileContribution`], the unit the working graph attaches.

pub mod chunker;
pub mod code;
pub mod document;
pub mod summary;
pub mod syntax;
pub mod tokens;

use serde::{Deserialize, Serialize};

use crate::domain::graph::{Chunk, SourceKind};

pub use chunker::Chunker;
pub use code::{CodeExtraction, CodeExtractor};
pub use document::{ChunkExtraction, DocumentExtractor, parse_extraction_response};
pub use summary::CodeSummarizer;
pub use syntax::{Definition, Language, SyntaxNode, SyntaxParser};
pub use tokens::TokenCounter;

/// An entity as seen by one file, before it is attached to the graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub id: String,
    pub name: String,
    pub category: String,
    pub description: String,
    pub kind: SourceKind,
    /// Declaration text, kept for code summaries
    #[serde(skip)]
    pub snippet: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRelationship {
    pub source_id: String,
    pub target_id: String,
    pub kind: String,
    pub description: String,
    pub weight: f32,
}

/// A chunk whose extraction failed and was skipped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkFailure {
    pub chunk_id: String,
    pub path: String,
    pub message: String,
}

/// Everything one file contributes to the graph in a pass
#[derive(Debug, Clone, PartialEq)]
pub struct FileContribution {
    pub path: String,
    pub kind: SourceKind,
    pub content_hash: String,
    pub chunks: Vec<Chunk>,
    pub entities: Vec<ExtractedEntity>,
    pub relationships: Vec<ExtractedRelationship>,
    pub chunk_failures: Vec<ChunkFailure>,
}

impl FileContribution {
    pub fn new(path: impl Into<String>, kind: SourceKind, content_hash: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind,
            content_hash: content_hash.into(),
            chunks: Vec::new(),
            entities: Vec::new(),
            relationships: Vec::new(),
            chunk_failures: Vec::new(),
        }
    }
}
