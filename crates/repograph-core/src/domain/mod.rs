//! Domain layer
//!
//! The graph model and everything that builds or reads it: change detection,
//! extraction, entity merge, the pass pipeline and retrieval.

pub mod extraction;
pub mod graph;
pub mod locking;
pub mod manifest;
pub mod merge;
pub mod pipeline;
pub mod prompts;
pub mod retrieval;
