use std::sync::Arc;

use crate::domain::prompts::{CODE_SUMMARY_SYSTEM_PROMPT, build_code_summary_prompt};
use crate::error::{Error, Result};
use crate::llm::{CompletionRequest, LanguageModel, RateLimiter};

use super::ExtractedEntity;

const SUMMARY_MAX_TOKENS: usize = 512;

/// Replaces structural code descriptions with model-written summaries
#[derive(Clone)]
pub struct CodeSummarizer {
    model: Arc<dyn LanguageModel>,
    limiter: Arc<RateLimiter>,
}

impl CodeSummarizer {
    pub fn new(model: Arc<dyn LanguageModel>, limiter: Arc<RateLimiter>) -> Self {
        Self { model, limiter }
    }

    pub async fn summarize(&self, entity: &ExtractedEntity, display_path: &str) -> Result<String> {
        let Some(code) = entity.snippet.as_deref() else {
            return Ok(entity.description.clone());
        };
        let request = CompletionRequest::new(build_code_summary_prompt(
            &entity.category,
            &entity.name,
            display_path,
            code,
        ))
        .with_system(CODE_SUMMARY_SYSTEM_PROMPT)
        .with_max_tokens(SUMMARY_MAX_TOKENS);

        let summary = self
            .limiter
            .with_retry("code_summary", || self.model.complete(&request))
            .await?;
        let summary = summary.trim();
        if summary.is_empty() {
            return Err(Error::Extraction(format!(
                "empty summary for {} `{}`",
                entity.category, entity.name
            )));
        }
        Ok(summary.to_string())
    }
}
