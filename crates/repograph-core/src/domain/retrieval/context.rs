//! Token-bounded context assembly

use std::collections::BTreeMap;
use std::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::config::SearchConfig;
use crate::domain::graph::{
    Chunk, DESCRIPTION_SEPARATOR, Entity, Relationship, ScoredChunk, ScoredEntity, estimate_tokens,
};

/// Context handed to the language model, plus what it was built from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievedContext {
    pub text: String,
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
    pub chunks: Vec<Chunk>,
    pub tokens: usize,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty() && self.chunks.is_empty()
    }
}

/// Packs entities, relations and source chunks under separate token budgets
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    max_total_tokens: usize,
    max_entity_tokens: usize,
    max_relation_tokens: usize,
}

impl ContextBuilder {
    pub fn new(max_total_tokens: usize, max_entity_tokens: usize, max_relation_tokens: usize) -> Self {
        Self {
            max_total_tokens,
            max_entity_tokens,
            max_relation_tokens,
        }
    }

    pub fn from_config(config: &SearchConfig) -> Self {
        Self::new(
            config.max_total_tokens,
            config.max_entity_tokens,
            config.max_relation_tokens,
        )
    }

    /// Entities are taken in the given order, relations by weight, and the
    /// remaining total budget goes to chunks in score order.
    pub fn build(
        &self,
        entities: &[ScoredEntity],
        relationships: &[Relationship],
        chunks: &[ScoredChunk],
    ) -> RetrievedContext {
        let mut context = RetrievedContext::default();
        let mut names: BTreeMap<&str, &str> = BTreeMap::new();

        let mut entity_section = String::new();
        let mut entity_tokens = 0;
        for scored in entities {
            let entity = &scored.entity;
            let line = render_entity(entity);
            let cost = estimate_tokens(&line);
            if entity_tokens + cost > self.max_entity_tokens {
                break;
            }
            entity_tokens += cost;
            entity_section.push_str(&line);
            names.insert(entity.id.as_str(), entity.name.as_str());
            context.entities.push(entity.clone());
        }

        let mut ranked: Vec<&Relationship> = relationships
            .iter()
            .filter(|r| names.contains_key(r.source_id.as_str()) || names.contains_key(r.target_id.as_str()))
            .collect();
        ranked.sort_by(|a, b| {
            b.weight
                .partial_cmp(&a.weight)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.key().cmp(&b.key()))
        });

        let mut relation_section = String::new();
        let mut relation_tokens = 0;
        for rel in ranked {
            let source = names.get(rel.source_id.as_str()).copied().unwrap_or(rel.source_id.as_str());
            let target = names.get(rel.target_id.as_str()).copied().unwrap_or(rel.target_id.as_str());
            let line = render_relationship(rel, source, target);
            let cost = estimate_tokens(&line);
            if relation_tokens + cost > self.max_relation_tokens {
                break;
            }
            relation_tokens += cost;
            relation_section.push_str(&line);
            context.relationships.push(rel.clone());
        }

        let mut chunk_budget = self
            .max_total_tokens
            .saturating_sub(entity_tokens + relation_tokens);
        let mut chunk_section = String::new();
        let mut chunk_tokens = 0;
        for scored in chunks {
            let block = render_chunk(&scored.chunk);
            let cost = estimate_tokens(&block);
            if cost > chunk_budget {
                break;
            }
            chunk_budget -= cost;
            chunk_tokens += cost;
            chunk_section.push_str(&block);
            context.chunks.push(scored.chunk.clone());
        }

        for (title, body) in [
            ("Entities", entity_section),
            ("Relationships", relation_section),
            ("Sources", chunk_section),
        ] {
            if !body.is_empty() {
                let _ = write!(context.text, "## {}\n\n{}\n", title, body);
            }
        }
        context.tokens = entity_tokens + relation_tokens + chunk_tokens;
        context
    }
}

fn render_entity(entity: &Entity) -> String {
    let description = entity.description.replace(DESCRIPTION_SEPARATOR, " ");
    let sources: Vec<&str> = entity.source_paths.iter().map(String::as_str).collect();
    format!(
        "- {} ({}): {} [sources: {}]\n",
        entity.name,
        entity.category,
        description.trim(),
        sources.join(", ")
    )
}

fn render_relationship(rel: &Relationship, source: &str, target: &str) -> String {
    let description = rel.description.replace(DESCRIPTION_SEPARATOR, " ");
    if description.trim().is_empty() {
        format!("- {} -[{}]-> {}\n", source, rel.kind, target)
    } else {
        format!("- {} -[{}]-> {}: {}\n", source, rel.kind, target, description.trim())
    }
}

fn render_chunk(chunk: &Chunk) -> String {
    format!(
        "### {} (lines {}-{})\n\n{}\n\n",
        chunk.path,
        chunk.span.start_line,
        chunk.span.end_line,
        chunk.content.trim_end()
    )
}
