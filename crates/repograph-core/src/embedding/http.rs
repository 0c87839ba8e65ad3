use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use tracing::debug;

use crate::config::{EmbeddingConfig, LlmConfig, LlmProvider};
use crate::error::{Error, Result};
use crate::llm::{CollaboratorError, EmbeddingRequest, EmbeddingResponse};

use super::{EmbeddingInput, Embedder, check_batch};

/// OpenAI-compatible `/embeddings` client
#[derive(Clone)]
pub struct HttpEmbedder {
    http_client: HttpClient,
    config: EmbeddingConfig,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for HttpEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEmbedder")
            .field("base_url", &self.base_url)
            .field("model", &self.config.model)
            .field("dimensions", &self.config.dimensions)
            .finish()
    }
}

impl HttpEmbedder {
    pub fn new(config: EmbeddingConfig, api_key: impl Into<String>) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(Error::NetworkError)?;
        let base_url = config.base_url.trim_end_matches('/').to_string();

        Ok(Self {
            http_client,
            config,
            api_key: api_key.into(),
            base_url,
        })
    }

    /// Build from configuration with the OpenAI-compatible key from the environment
    pub fn from_config(config: &EmbeddingConfig, llm: &LlmConfig) -> Result<Self> {
        let api_key = llm
            .require_api_key(LlmProvider::OpenAi)
            .map_err(|e| Error::ConfigError(e.to_string()))?;
        Self::new(config.clone(), api_key)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    async fn embed(
        &self,
        inputs: &[EmbeddingInput],
    ) -> std::result::Result<Vec<Vec<f32>>, CollaboratorError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/embeddings", self.base_url);
        let request = EmbeddingRequest::batch(
            &self.config.model,
            inputs.iter().map(|i| i.text.clone()).collect(),
        )
        .with_dimensions(self.config.dimensions);

        debug!(model = %self.config.model, batch = inputs.len(), "Sending embedding request");

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(crate::llm::classify_status(status, &body, None));
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(|e| {
            CollaboratorError::permanent(format!("Failed to parse embedding response: {}", e))
        })?;
        let vectors = parsed.into_ordered_vectors();
        check_batch(inputs, &vectors, self.config.dimensions)?;
        Ok(vectors)
    }
}
