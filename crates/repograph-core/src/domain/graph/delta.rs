use serde::{Deserialize, Serialize};

use super::chunk::Chunk;
use super::entity::Entity;
use super::relationship::{Relationship, RelationshipKey};

/// Graph changes produced by one pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDelta {
    pub upsert_entities: Vec<Entity>,
    pub delete_entities: Vec<String>,
    pub upsert_relationships: Vec<Relationship>,
    pub delete_relationships: Vec<RelationshipKey>,
    pub upsert_chunks: Vec<Chunk>,
    pub delete_chunks: Vec<String>,
    /// Newly retired ids with their survivor
    pub retired: Vec<(String, String)>,
}

impl GraphDelta {
    pub fn is_empty(&self) -> bool {
        self.upsert_entities.is_empty()
            && self.delete_entities.is_empty()
            && self.upsert_relationships.is_empty()
            && self.delete_relationships.is_empty()
            && self.upsert_chunks.is_empty()
            && self.delete_chunks.is_empty()
            && self.retired.is_empty()
    }
}
