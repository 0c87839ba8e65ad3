//! Applies a pass's delta to the store as one unit

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, error};

use crate::domain::graph::{CommitDelta, GraphState, GraphStore};
use crate::error::{Error, Result};

/// Writes commit deltas behind the storage's read/write gate
///
/// Queries hold the read half of the gate, so they observe either the
/// snapshot before a commit or the one after it.
#[derive(Clone)]
pub struct StoreSynchronizer {
    store: Arc<dyn GraphStore>,
    gate: Arc<RwLock<()>>,
}

impl StoreSynchronizer {
    pub fn new(store: Arc<dyn GraphStore>, gate: Arc<RwLock<()>>) -> Self {
        Self { store, gate }
    }

    /// Refuse graphs with dangling edges or live retired ids
    pub fn verify(state: &GraphState) -> Result<()> {
        let dangling = state.dangling_relationships();
        if let Some(first) = dangling.first() {
            return Err(Error::ConsistencyViolation(format!(
                "{} relationship(s) reference missing entities, first {} -[{}]-> {}",
                dangling.len(),
                first.source_id,
                first.kind,
                first.target_id
            )));
        }
        if let Some(id) = state.retired.keys().find(|id| state.entities.contains_key(*id)) {
            return Err(Error::ConsistencyViolation(format!(
                "retired entity {} is still present",
                id
            )));
        }
        Ok(())
    }

    /// Verify `state` and commit `delta`, which must have been diffed from it
    pub async fn commit(&self, state: &GraphState, delta: &CommitDelta) -> Result<()> {
        Self::verify(state).inspect_err(|e| {
            error!(pass_id = %delta.pass_id, error = %e, "Refusing to commit");
        })?;

        let _writer = self.gate.write().await;
        self.store.commit(delta).await?;
        debug!(pass_id = %delta.pass_id, "Delta applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::graph::{Entity, EntityOrigin, Relationship};

    fn entity(id: &str) -> Entity {
        Entity::new(id, id, "concept", EntityOrigin::Document).with_fragment("/r/a.md", "text")
    }

    #[test]
    fn test_verify_accepts_consistent_graph() {
        let mut state = GraphState::new();
        state.entities.insert("a".into(), entity("a"));
        state.entities.insert("b".into(), entity("b"));
        let rel = Relationship::new("a", "b", "uses").with_fragment("/r/a.md", "", 1.0);
        state.relationships.insert(rel.key(), rel);
        assert!(StoreSynchronizer::verify(&state).is_ok());
    }

    #[test]
    fn test_verify_rejects_dangling_endpoint() {
        let mut state = GraphState::new();
        state.entities.insert("a".into(), entity("a"));
        let rel = Relationship::new("a", "gone", "uses").with_fragment("/r/a.md", "", 1.0);
        state.relationships.insert(rel.key(), rel);

        let err = StoreSynchronizer::verify(&state).unwrap_err();
        assert!(matches!(err, Error::ConsistencyViolation(_)));
    }

    #[test]
    fn test_verify_rejects_live_retired_id() {
        let mut state = GraphState::new();
        state.entities.insert("a".into(), entity("a"));
        state.entities.insert("b".into(), entity("b"));
        state.retired.insert("a".into(), "b".into());
        assert!(StoreSynchronizer::verify(&state).is_err());
    }
}
