//! Query and plan over a committed storage
//!
//! The request is embedded, nearest entities and chunks are retrieved, the
//! entity set is widened by one hop of relationships, and a token-bounded
//! context goes to the language model together with the request.

pub mod context;

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::SearchConfig;
use crate::domain::graph::{Chunk, Entity, GraphStore, ScoredEntity};
use crate::domain::prompts::{PLAN_SYSTEM_PROMPT, QUERY_SYSTEM_PROMPT, build_answer_prompt};
use crate::embedding::{Embedder, EmbeddingInput};
use crate::error::{Error, Result};
use crate::llm::{CompletionRequest, LanguageModel, RateLimiter};

pub use context::{ContextBuilder, RetrievedContext};

/// What the caller asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerMode {
    Query,
    Plan,
}

impl AnswerMode {
    fn system_prompt(&self) -> &'static str {
        match self {
            Self::Query => QUERY_SYSTEM_PROMPT,
            Self::Plan => PLAN_SYSTEM_PROMPT,
        }
    }

    fn heading(&self) -> &'static str {
        match self {
            Self::Query => "Question",
            Self::Plan => "Change request",
        }
    }
}

/// Generated text plus the graph items it was grounded on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub entities: Vec<Entity>,
    pub chunks: Vec<Chunk>,
}

#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    model: Arc<dyn LanguageModel>,
    limiter: Arc<RateLimiter>,
    top_k: usize,
    builder: ContextBuilder,
}

impl Retriever {
    pub fn new(
        config: &SearchConfig,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn LanguageModel>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            embedder,
            model,
            limiter,
            top_k: config.top_k.max(1),
            builder: ContextBuilder::from_config(config),
        }
    }

    /// Collect context for `request` from the committed store
    pub async fn retrieve(&self, store: &dyn GraphStore, request: &str) -> Result<RetrievedContext> {
        let input = [EmbeddingInput::new("request", request)];
        let mut vectors = self
            .limiter
            .with_retry("query_embedding", || self.embedder.embed(&input))
            .await?;
        let query = vectors
            .pop()
            .ok_or_else(|| Error::Collaborator("embedder returned no vector for the request".into()))?;

        let mut entities = store.search_entities(&query, self.top_k).await?;
        let chunks = store.search_chunks(&query, self.top_k).await?;

        let hit_ids: Vec<String> = entities.iter().map(|s| s.entity.id.clone()).collect();
        let relationships = store.relationships_for(&hit_ids).await?;

        let known: BTreeSet<&str> = hit_ids.iter().map(String::as_str).collect();
        let neighbor_ids: Vec<String> = relationships
            .iter()
            .flat_map(|r| [r.source_id.as_str(), r.target_id.as_str()])
            .filter(|id| !known.contains(id))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect();
        for entity in store.get_entities(&neighbor_ids).await? {
            entities.push(ScoredEntity { entity, score: 0.0 });
        }

        debug!(
            hits = hit_ids.len(),
            neighbors = neighbor_ids.len(),
            relationships = relationships.len(),
            chunks = chunks.len(),
            "Retrieved graph context"
        );
        Ok(self.builder.build(&entities, &relationships, &chunks))
    }

    /// Answer a question or draft a plan grounded on the store
    pub async fn answer(&self, store: &dyn GraphStore, mode: AnswerMode, request: &str) -> Result<Answer> {
        let request = request.trim();
        if request.is_empty() {
            return Err(Error::InvalidInput("request text is empty".into()));
        }

        let context = self.retrieve(store, request).await?;
        let completion = CompletionRequest::new(build_answer_prompt(
            &context.text,
            mode.heading(),
            request,
        ))
        .with_system(mode.system_prompt());

        let text = self
            .limiter
            .with_retry("answer", || self.model.complete(&completion))
            .await?;

        info!(
            mode = ?mode,
            entities = context.entities.len(),
            chunks = context.chunks.len(),
            context_tokens = context.tokens,
            "Answer generated"
        );
        Ok(Answer {
            text: text.trim().to_string(),
            entities: context.entities,
            chunks: context.chunks,
        })
    }
}
