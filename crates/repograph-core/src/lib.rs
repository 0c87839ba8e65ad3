//! Repograph Core Library
//!
//! Builds and incrementally maintains a knowledge graph plus vector index
//! over a repository of source code and documents:
//! - Change detection against a persisted per-file manifest
//! - Chunking and structural extraction (tree-sitter for code, LLM for documents)
//! - Embedding through a pluggable collaborator
//! - Similarity-driven entity merge with data-driven exclusion rules
//! - Atomic commits to a SQLite store (entities, relationships, chunks)
//! - Retrieval-augmented `query` and `plan` over the committed graph

pub mod config;
pub mod domain;
pub mod embedding;
pub mod error;
pub mod infrastructure;
pub mod llm;
pub mod service;
pub mod storage;
pub mod telemetry;

pub use error::{Error, Result};
pub use service::{DEFAULT_STORAGE, RepoGraph, validate_storage_name};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::domain::graph::{Chunk, Entity, Relationship, StoreStats};
    pub use crate::domain::pipeline::{PassReport, PassState};
    pub use crate::domain::retrieval::{Answer, AnswerMode};
    pub use crate::embedding::Embedder;
    pub use crate::error::{Error, Result};
    pub use crate::llm::LanguageModel;
    pub use crate::service::{DEFAULT_STORAGE, RepoGraph};
}
