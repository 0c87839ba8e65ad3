//! Entity extraction from documentation via the language model collaborator

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::domain::graph::{Chunk, SourceKind, ids};
use crate::domain::merge::normalize_name;
use crate::domain::prompts::{EXTRACTION_SYSTEM_PROMPT, build_extraction_prompt};
use crate::error::{Error, Result};
use crate::llm::{CompletionRequest, LanguageModel, RateLimiter};

use super::{ExtractedEntity, ExtractedRelationship};

const DEFAULT_CATEGORY: &str = "concept";
const DEFAULT_WEIGHT: f32 = 1.0;

/// Entities and relations found in one chunk
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkExtraction {
    pub entities: Vec<ExtractedEntity>,
    pub relationships: Vec<ExtractedRelationship>,
}

#[derive(Clone)]
pub struct DocumentExtractor {
    model: Arc<dyn LanguageModel>,
    limiter: Arc<RateLimiter>,
    categories: Vec<String>,
}

impl DocumentExtractor {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        limiter: Arc<RateLimiter>,
        categories: Vec<String>,
    ) -> Self {
        Self {
            model,
            limiter,
            categories,
        }
    }

    /// Extract from one chunk
    ///
    /// Transient failures are retried by the rate limiter; what is left
    /// surfaces as an error for this chunk only.
    pub async fn extract(&self, chunk: &Chunk) -> Result<ChunkExtraction> {
        let request = CompletionRequest::new(build_extraction_prompt(&self.categories, &chunk.content))
            .with_system(EXTRACTION_SYSTEM_PROMPT);

        let response = self
            .limiter
            .with_retry("document_extraction", || self.model.complete(&request))
            .await?;

        let extraction = parse_extraction_response(&response)?;
        debug!(
            chunk_id = %chunk.id,
            entities = extraction.entities.len(),
            relationships = extraction.relationships.len(),
            "Extracted document chunk"
        );
        Ok(extraction)
    }
}

#[derive(Debug, Deserialize)]
struct RawExtraction {
    #[serde(default)]
    entities: Vec<RawEntity>,
    #[serde(default)]
    relationships: Vec<RawRelationship>,
}

#[derive(Debug, Deserialize)]
struct RawEntity {
    name: String,
    #[serde(rename = "type", default)]
    entity_type: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRelationship {
    source: String,
    target: String,
    #[serde(rename = "type", default)]
    relationship_type: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    weight: Option<f32>,
}

/// Parse the collaborator's JSON answer
///
/// Relationships whose endpoints were not reported as entities are dropped.
pub fn parse_extraction_response(response: &str) -> Result<ChunkExtraction> {
    let json = extract_json_from_response(response);
    let raw: RawExtraction = serde_json::from_str(&json)
        .map_err(|e| Error::Extraction(format!("malformed extraction output: {}", e)))?;

    let mut by_name: BTreeMap<String, String> = BTreeMap::new();
    let mut entities = Vec::new();
    for entity in raw.entities {
        let name = entity.name.trim();
        let canonical = normalize_name(name);
        if canonical.is_empty() {
            continue;
        }
        let id = ids::document_entity_id(name);
        by_name.insert(canonical, id.clone());
        let category = entity
            .entity_type
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
        entities.push(ExtractedEntity {
            id,
            name: name.to_string(),
            category,
            description: entity.description.unwrap_or_default().trim().to_string(),
            kind: SourceKind::Document,
            snippet: None,
        });
    }

    let relationships = raw
        .relationships
        .into_iter()
        .filter_map(|rel| {
            let source_id = by_name.get(&normalize_name(&rel.source))?;
            let target_id = by_name.get(&normalize_name(&rel.target))?;
            if source_id == target_id {
                return None;
            }
            let kind = rel
                .relationship_type
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "related_to".to_string());
            let weight = rel
                .weight
                .filter(|w| w.is_finite() && *w > 0.0)
                .unwrap_or(DEFAULT_WEIGHT);
            Some(ExtractedRelationship {
                source_id: source_id.clone(),
                target_id: target_id.clone(),
                kind,
                description: rel.description.unwrap_or_default().trim().to_string(),
                weight,
            })
        })
        .collect();

    Ok(ChunkExtraction {
        entities,
        relationships,
    })
}

/// Extract JSON from a response that might contain markdown or other text
fn extract_json_from_response(response: &str) -> String {
    if let Some(start) = response.find("```json") {
        let json_start = start + 7;
        if let Some(end) = response[json_start..].find("```") {
            return response[json_start..json_start + end].trim().to_string();
        }
    }

    if let Some(start) = response.find("```") {
        let potential_start = start + 3;
        if let Some(newline) = response[potential_start..].find('\n') {
            let json_start = potential_start + newline + 1;
            if let Some(end) = response[json_start..].find("```") {
                return response[json_start..json_start + end].trim().to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (response.find('{'), response.rfind('}')) {
        if start < end {
            return response[start..=end].to_string();
        }
    }

    response.to_string()
}
