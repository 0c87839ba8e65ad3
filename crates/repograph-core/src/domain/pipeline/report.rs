//! Outcome of one build/update pass

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::extraction::ChunkFailure;
use crate::domain::graph::GraphDelta;
use crate::domain::manifest::{ChangeSet, FileFailure};
use crate::domain::merge::MergeOutcome;

use super::state::PassState;

/// Item that was left without a vector this pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingSkip {
    pub id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassReport {
    pub pass_id: Uuid,
    pub storage: String,
    pub root: String,
    pub state: PassState,
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub file_failures: Vec<FileFailure>,
    pub chunk_failures: Vec<ChunkFailure>,
    pub embedding_skips: Vec<EmbeddingSkip>,
    pub merge_outcomes: Vec<MergeOutcome>,
    pub entities_upserted: usize,
    pub entities_deleted: usize,
    pub relationships_upserted: usize,
    pub relationships_deleted: usize,
    pub chunks_upserted: usize,
    pub chunks_deleted: usize,
    /// Whether anything was written to the store
    pub committed: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PassReport {
    pub fn new(pass_id: Uuid, storage: impl Into<String>) -> Self {
        Self {
            pass_id,
            storage: storage.into(),
            root: String::new(),
            state: PassState::Idle,
            added: 0,
            modified: 0,
            deleted: 0,
            unchanged: 0,
            file_failures: Vec::new(),
            chunk_failures: Vec::new(),
            embedding_skips: Vec::new(),
            merge_outcomes: Vec::new(),
            entities_upserted: 0,
            entities_deleted: 0,
            relationships_upserted: 0,
            relationships_deleted: 0,
            chunks_upserted: 0,
            chunks_deleted: 0,
            committed: false,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn record_changes(&mut self, changes: &ChangeSet) {
        self.root = changes.root.clone();
        self.added = changes.added.len();
        self.modified = changes.modified.len();
        self.deleted = changes.deleted.len();
        self.unchanged = changes.unchanged.len();
        self.file_failures = changes.failures.clone();
    }

    pub fn record_delta(&mut self, delta: &GraphDelta) {
        self.entities_upserted = delta.upsert_entities.len();
        self.entities_deleted = delta.delete_entities.len();
        self.relationships_upserted = delta.upsert_relationships.len();
        self.relationships_deleted = delta.delete_relationships.len();
        self.chunks_upserted = delta.upsert_chunks.len();
        self.chunks_deleted = delta.delete_chunks.len();
    }

    pub fn finish(&mut self, state: PassState) {
        self.state = state;
        self.finished_at = Some(Utc::now());
    }

    pub fn merged_count(&self) -> usize {
        self.merge_outcomes
            .iter()
            .filter(|o| matches!(o, MergeOutcome::Merged { .. }))
            .count()
    }

    /// Per-item failures absorbed by the pass
    pub fn failure_count(&self) -> usize {
        self.file_failures.len() + self.chunk_failures.len() + self.embedding_skips.len()
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_timing() {
        let mut report = PassReport::new(Uuid::new_v4(), "storage");
        report.merge_outcomes.push(MergeOutcome::Merged {
            absorbed_id: "a".into(),
            survivor_id: "b".into(),
        });
        report.embedding_skips.push(EmbeddingSkip {
            id: "x".into(),
            message: "permanent".into(),
        });
        assert_eq!(report.merged_count(), 1);
        assert_eq!(report.failure_count(), 1);
        assert!(report.duration_ms().is_none());

        report.finish(PassState::Idle);
        assert!(report.duration_ms().is_some_and(|ms| ms >= 0));
    }
}
