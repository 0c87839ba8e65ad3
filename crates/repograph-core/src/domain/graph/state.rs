//! In-memory working graph
//!
//! Every phase before COMMITTING mutates a clone of the committed state; the
//! difference against the committed baseline becomes the commit delta.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::config::EntityText;
use crate::domain::extraction::FileContribution;
use crate::error::{Error, Result};

use super::chunk::Chunk;
use super::delta::GraphDelta;
use super::entity::{Entity, EntityOrigin, SourceKind};
use super::relationship::{Relationship, RelationshipKey};

/// Result of attaching one file's extraction
#[derive(Debug, Clone, Default)]
pub struct AttachOutcome {
    /// Code entities produced by this file that take part in merging
    pub code_entities: BTreeSet<String>,
    /// Contributions routed to a merge survivor
    pub redirected: usize,
    /// Relationships dropped for lack of an endpoint
    pub dropped_relationships: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphState {
    pub entities: BTreeMap<String, Entity>,
    pub relationships: BTreeMap<RelationshipKey, Relationship>,
    pub chunks: BTreeMap<String, Chunk>,
    /// Retired entity id -> the id that absorbed it
    pub retired: BTreeMap<String, String>,
}

impl GraphState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Follow the retirement chain to the live id
    pub fn resolve_id(&self, id: &str) -> String {
        let mut current = id;
        let mut hops = 0;
        while let Some(next) = self.retired.get(current) {
            current = next;
            hops += 1;
            if hops > self.retired.len() {
                break;
            }
        }
        current.to_string()
    }

    pub fn is_retired(&self, id: &str) -> bool {
        self.retired.contains_key(id)
    }

    pub fn entity_ids_for_path(&self, path: &str) -> BTreeSet<String> {
        self.entities
            .values()
            .filter(|e| e.source_paths.contains(path))
            .map(|e| e.id.clone())
            .collect()
    }

    pub fn chunk_ids_for_path(&self, path: &str) -> BTreeSet<String> {
        self.chunks
            .values()
            .filter(|c| c.path == path)
            .map(|c| c.id.clone())
            .collect()
    }

    /// Remove everything `path` contributed; returns the ids of deleted entities
    pub fn detach_file(&mut self, path: &str) -> Vec<String> {
        self.chunks.retain(|_, chunk| chunk.path != path);

        let mut removed = Vec::new();
        for (id, entity) in self.entities.iter_mut() {
            if entity.source_paths.contains(path) && !entity.detach_path(path) {
                removed.push(id.clone());
            }
        }
        for id in &removed {
            self.entities.remove(id);
        }

        self.relationships.retain(|_, rel| {
            if rel.source_paths.contains(path) {
                rel.detach_path(path)
            } else {
                true
            }
        });
        self.prune_dangling();

        debug!(path, removed = removed.len(), "Detached file from working graph");
        removed
    }

    /// Add one file's chunks, entities and relationships
    pub fn attach_file(&mut self, contribution: &FileContribution) -> AttachOutcome {
        let mut outcome = AttachOutcome::default();
        let path = contribution.path.as_str();

        for chunk in &contribution.chunks {
            self.chunks.insert(chunk.id.clone(), chunk.clone());
        }

        for extracted in &contribution.entities {
            let id = self.resolve_id(&extracted.id);
            let redirected = id != extracted.id;

            let entity = self.entities.entry(id.clone()).or_insert_with(|| {
                Entity::new(
                    id.clone(),
                    extracted.name.clone(),
                    extracted.category.clone(),
                    EntityOrigin::from(extracted.kind),
                )
            });
            entity.add_fragment(path, &extracted.description);

            if redirected {
                outcome.redirected += 1;
            } else if extracted.kind == SourceKind::Code && entity.origin == EntityOrigin::Code {
                outcome.code_entities.insert(id);
            }
        }

        for extracted in &contribution.relationships {
            let source = self.resolve_id(&extracted.source_id);
            let target = self.resolve_id(&extracted.target_id);
            if source == target {
                continue;
            }
            if !self.entities.contains_key(&source) || !self.entities.contains_key(&target) {
                outcome.dropped_relationships += 1;
                continue;
            }
            let key = RelationshipKey::new(&source, &target, &extracted.kind);
            self.relationships
                .entry(key)
                .or_insert_with(|| Relationship::new(&source, &target, &extracted.kind))
                .add_fragment(path, &extracted.description, extracted.weight);
        }

        outcome
    }

    /// Consolidate `absorbed_id` into `survivor_id` and retire the absorbed id
    pub fn merge_into(&mut self, absorbed_id: &str, survivor_id: &str) -> Result<()> {
        if absorbed_id == survivor_id {
            return Err(Error::InvalidInput(format!(
                "cannot merge entity {} into itself",
                absorbed_id
            )));
        }
        let absorbed = self.entities.remove(absorbed_id).ok_or_else(|| {
            Error::InvalidInput(format!("merge source {} not in graph", absorbed_id))
        })?;
        let survivor = self.entities.get_mut(survivor_id).ok_or_else(|| {
            Error::InvalidInput(format!("merge survivor {} not in graph", survivor_id))
        })?;

        survivor.absorb(&absorbed);
        if survivor.origin.is_document_side() {
            survivor.origin = EntityOrigin::Merged;
        }

        self.rewrite_endpoint(absorbed_id, survivor_id);

        for target in self.retired.values_mut() {
            if target == absorbed_id {
                *target = survivor_id.to_string();
            }
        }
        self.retired
            .insert(absorbed_id.to_string(), survivor_id.to_string());
        Ok(())
    }

    /// Point every relationship touching `from` at `to`
    ///
    /// Colliding edges are combined; self-loops created by the rewrite are dropped.
    pub fn rewrite_endpoint(&mut self, from: &str, to: &str) {
        let affected: Vec<RelationshipKey> = self
            .relationships
            .keys()
            .filter(|key| key.touches(from))
            .cloned()
            .collect();

        for key in affected {
            let Some(mut rel) = self.relationships.remove(&key) else {
                continue;
            };
            if rel.source_id == from {
                rel.source_id = to.to_string();
            }
            if rel.target_id == from {
                rel.target_id = to.to_string();
            }
            if rel.source_id == rel.target_id {
                continue;
            }
            match self.relationships.get_mut(&rel.key()) {
                Some(existing) => existing.absorb(&rel),
                None => {
                    self.relationships.insert(rel.key(), rel);
                }
            }
        }
    }

    fn prune_dangling(&mut self) {
        let entities = &self.entities;
        self.relationships.retain(|key, _| {
            entities.contains_key(&key.source_id) && entities.contains_key(&key.target_id)
        });
    }

    /// Relationships whose endpoints are missing or retired
    pub fn dangling_relationships(&self) -> Vec<RelationshipKey> {
        self.relationships
            .keys()
            .filter(|key| {
                !self.entities.contains_key(&key.source_id)
                    || !self.entities.contains_key(&key.target_id)
                    || self.is_retired(&key.source_id)
                    || self.is_retired(&key.target_id)
            })
            .cloned()
            .collect()
    }

    /// Carry over unchanged embeddings from the committed baseline
    ///
    /// Returns `(id, text)` for entities that need a fresh vector.
    pub fn reuse_entity_embeddings(
        &mut self,
        baseline: &GraphState,
        mode: EntityText,
    ) -> Vec<(String, String)> {
        let mut pending = Vec::new();
        for (id, entity) in self.entities.iter_mut() {
            let text = entity.embedding_text(mode);
            let reusable = baseline
                .entities
                .get(id)
                .filter(|b| b.embedding.is_some() && b.embedding_text(mode) == text);
            match reusable {
                Some(previous) => entity.embedding = previous.embedding.clone(),
                None => {
                    entity.embedding = None;
                    pending.push((id.clone(), text));
                }
            }
        }
        pending
    }

    /// Carry over chunk embeddings; returns chunks that still need one
    pub fn reuse_chunk_embeddings(&mut self, baseline: &GraphState) -> Vec<(String, String)> {
        let mut pending = Vec::new();
        for (id, chunk) in self.chunks.iter_mut() {
            if chunk.embedding.is_some() {
                continue;
            }
            match baseline.chunks.get(id).and_then(|b| b.embedding.clone()) {
                Some(vector) => chunk.embedding = Some(vector),
                None => pending.push((id.clone(), chunk.content.clone())),
            }
        }
        pending
    }

    /// Changes needed to turn `baseline` into `self`
    pub fn diff(&self, baseline: &GraphState) -> GraphDelta {
        let mut delta = GraphDelta::default();

        for (id, entity) in &self.entities {
            let changed = baseline
                .entities
                .get(id)
                .is_none_or(|previous| !previous.same_content(entity));
            if changed {
                delta.upsert_entities.push(entity.clone());
            }
        }
        for id in baseline.entities.keys() {
            if !self.entities.contains_key(id) {
                delta.delete_entities.push(id.clone());
            }
        }

        for (key, rel) in &self.relationships {
            if baseline.relationships.get(key) != Some(rel) {
                delta.upsert_relationships.push(rel.clone());
            }
        }
        for key in baseline.relationships.keys() {
            if !self.relationships.contains_key(key) {
                delta.delete_relationships.push(key.clone());
            }
        }

        for (id, chunk) in &self.chunks {
            let changed = baseline
                .chunks
                .get(id)
                .is_none_or(|previous| !previous.same_content(chunk) || previous.embedding != chunk.embedding);
            if changed {
                delta.upsert_chunks.push(chunk.clone());
            }
        }
        for id in baseline.chunks.keys() {
            if !self.chunks.contains_key(id) {
                delta.delete_chunks.push(id.clone());
            }
        }

        for (retired, survivor) in &self.retired {
            if baseline.retired.get(retired) != Some(survivor) {
                delta.retired.push((retired.clone(), survivor.clone()));
            }
        }

        delta
    }

    /// Apply a delta produced by [`GraphState::diff`]
    pub fn apply(&mut self, delta: &GraphDelta) {
        for id in &delta.delete_entities {
            self.entities.remove(id);
        }
        for entity in &delta.upsert_entities {
            self.entities.insert(entity.id.clone(), entity.clone());
        }
        for key in &delta.delete_relationships {
            self.relationships.remove(key);
        }
        for rel in &delta.upsert_relationships {
            self.relationships.insert(rel.key(), rel.clone());
        }
        for id in &delta.delete_chunks {
            self.chunks.remove(id);
        }
        for chunk in &delta.upsert_chunks {
            self.chunks.insert(chunk.id.clone(), chunk.clone());
        }
        for (retired, survivor) in &delta.retired {
            self.retired.insert(retired.clone(), survivor.clone());
        }
    }
}
