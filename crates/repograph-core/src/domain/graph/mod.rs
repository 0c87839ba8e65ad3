//! Knowledge graph model
//!
//! Entities, relationships and chunks, the in-memory working graph a pass
//! mutates, and the [`GraphStore`] handle the committed graph lives behind.

pub mod chunk;
pub mod delta;
pub mod entity;
pub mod ids;
pub mod relationship;
pub mod state;
pub mod store;

pub use chunk::{Chunk, Span};
pub use delta::GraphDelta;
pub use entity::{DESCRIPTION_SEPARATOR, DescriptionFragment, Entity, EntityOrigin, SourceKind};
pub use relationship::{RelationFragment, Relationship, RelationshipKey};
pub use state::{AttachOutcome, GraphState};
pub use store::{CommitDelta, GraphStore, ScoredChunk, ScoredEntity, StoreStats};

/// Rough token count: four characters per token
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}
