//! LLM integration - OpenAI-compatible and Anthropic collaborators
//!
//! This module provides:
//! - The [`LanguageModel`] seam used for document extraction, code summaries,
//!   and answer generation
//! - HTTP clients for OpenAI-compatible chat completions and the Anthropic
//!   messages API, picked per model role by [`language_model`]
//! - The collaborator error split (transient vs permanent)
//! - Rate limiting with retry/backoff shared by all outbound calls

mod anthropic;
mod client;
mod error;
mod rate_limit;
mod types;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{LlmConfig, LlmProvider, ModelConfig};

pub use anthropic::{
    AnthropicLanguageModel, AnthropicMessage, ContentBlock, MessagesRequest, MessagesResponse,
    MessagesUsage,
};
pub use client::{HttpLanguageModel, HttpLanguageModelBuilder};
pub(crate) use client::classify_status;
pub use error::{CollaboratorError, TransientKind};
pub use rate_limit::{RateLimiter, RetryPolicy, calculate_backoff};
pub use types::{
    ChatRequest, ChatResponse, Choice, EmbeddingData, EmbeddingRequest, EmbeddingResponse,
    Message, MessageRole, Usage,
};

/// A single prompt sent to the language model
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub max_tokens: Option<usize>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            max_tokens: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Messages in chat-completion order
    pub fn messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system {
            messages.push(Message::system(system.clone()));
        }
        messages.push(Message::user(self.prompt.clone()));
        messages
    }
}

/// Text-completion collaborator
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model identifier, for logging
    fn model_name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<String, CollaboratorError>;
}

/// Client for one model role, chosen by its provider
pub fn language_model(model: &ModelConfig, llm: &LlmConfig) -> crate::Result<Arc<dyn LanguageModel>> {
    let client: Arc<dyn LanguageModel> = match model.provider {
        LlmProvider::OpenAi => Arc::new(HttpLanguageModel::from_config(model, llm)?),
        LlmProvider::Anthropic => Arc::new(AnthropicLanguageModel::from_config(model, llm)?),
    };
    Ok(client)
}
