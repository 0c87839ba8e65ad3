//! Persisted graph handle

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::manifest::{FileRecord, Manifest};
use crate::error::Result;

use super::chunk::Chunk;
use super::delta::GraphDelta;
use super::entity::Entity;
use super::relationship::Relationship;
use super::state::GraphState;

/// Everything one pass writes, applied as a single unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitDelta {
    pub pass_id: Uuid,
    pub committed_at: DateTime<Utc>,
    /// Canonical root directory the manifest describes
    pub root: String,
    pub graph: GraphDelta,
    pub manifest_upserts: Vec<FileRecord>,
    pub manifest_deletes: Vec<String>,
}

impl CommitDelta {
    pub fn new(pass_id: Uuid, root: impl Into<String>) -> Self {
        Self {
            pass_id,
            committed_at: Utc::now(),
            root: root.into(),
            graph: GraphDelta::default(),
            manifest_upserts: Vec::new(),
            manifest_deletes: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty() && self.manifest_upserts.is_empty() && self.manifest_deletes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredEntity {
    pub entity: Entity,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Row counts of a committed storage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub files: usize,
    pub chunks: usize,
    pub entities: usize,
    pub relationships: usize,
    pub retired: usize,
    pub last_commit_at: Option<DateTime<Utc>>,
}

/// Committed graph, manifest and vector index of one storage
///
/// Reads always see the last committed snapshot; [`GraphStore::commit`]
/// applies a whole pass or nothing.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Whether at least one pass has been committed
    async fn is_initialized(&self) -> Result<bool>;

    async fn load_manifest(&self) -> Result<Manifest>;

    /// Entities, relationships, chunks and the retirement map
    async fn load_state(&self) -> Result<GraphState>;

    async fn commit(&self, delta: &CommitDelta) -> Result<()>;

    /// Nearest entities to `query` by cosine similarity
    async fn search_entities(&self, query: &[f32], limit: usize) -> Result<Vec<ScoredEntity>>;

    async fn search_chunks(&self, query: &[f32], limit: usize) -> Result<Vec<ScoredChunk>>;

    /// Relationships with at least one endpoint in `entity_ids`
    async fn relationships_for(&self, entity_ids: &[String]) -> Result<Vec<Relationship>>;

    async fn get_entities(&self, ids: &[String]) -> Result<Vec<Entity>>;

    async fn stats(&self) -> Result<StoreStats>;
}
