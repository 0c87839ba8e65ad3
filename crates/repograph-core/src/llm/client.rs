//! OpenAI-compatible chat completions client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use tracing::debug;

use crate::config::{LlmConfig, LlmProvider, ModelConfig};
use crate::error::{Error, Result};

use super::error::{CollaboratorError, TransientKind};
use super::types::{ChatRequest, ChatResponse};
use super::{CompletionRequest, LanguageModel};

/// HTTP-backed language model
///
/// Does not retry on its own; callers wrap it in a
/// [`RateLimiter`](super::RateLimiter) so pacing and retries are shared
/// with every other outbound call of a pass.
#[derive(Clone)]
pub struct HttpLanguageModel {
    http_client: HttpClient,
    model: ModelConfig,
    temperature: f32,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for HttpLanguageModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpLanguageModel")
            .field("base_url", &self.base_url)
            .field("model", &self.model.model)
            .finish()
    }
}

/// Builder for creating an HttpLanguageModel
#[derive(Default)]
pub struct HttpLanguageModelBuilder {
    model: Option<ModelConfig>,
    temperature: Option<f32>,
    api_key: Option<String>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

impl HttpLanguageModelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(mut self, model: ModelConfig) -> Self {
        self.model = Some(model);
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the base URL (defaults to the configured one)
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn build(self) -> Result<HttpLanguageModel> {
        let defaults = LlmConfig::default();
        let model = self.model.unwrap_or_default();
        let api_key = self
            .api_key
            .ok_or_else(|| Error::ConfigError("API key is required".to_string()))?;

        let timeout_secs = self.timeout_secs.unwrap_or(defaults.timeout_secs);

        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(Error::NetworkError)?;

        let base_url = self
            .base_url
            .unwrap_or_else(|| model.endpoint().to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(HttpLanguageModel {
            http_client,
            model,
            temperature: self.temperature.unwrap_or(defaults.temperature),
            api_key,
            base_url,
        })
    }
}

impl HttpLanguageModel {
    pub fn builder() -> HttpLanguageModelBuilder {
        HttpLanguageModelBuilder::new()
    }

    /// Build one model role, reading the API key from the environment
    pub fn from_config(model: &ModelConfig, llm: &LlmConfig) -> Result<Self> {
        let api_key = llm
            .require_api_key(LlmProvider::OpenAi)
            .map_err(|e| Error::ConfigError(e.to_string()))?;
        Self::builder()
            .model(model.clone())
            .temperature(llm.temperature)
            .timeout_secs(llm.timeout_secs)
            .api_key(api_key)
            .build()
    }

    async fn send_request(&self, request: &ChatRequest) -> std::result::Result<String, CollaboratorError> {
        let url = format!("{}/chat/completions", self.base_url);

        debug!(
            model = %request.model,
            messages = request.messages.len(),
            "Sending chat completion request"
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_header = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body, retry_header));
        }

        let chat_response: ChatResponse = response.json().await.map_err(|e| {
            CollaboratorError::permanent(format!("Failed to parse response: {}", e))
        })?;

        chat_response
            .first_content()
            .map(str::to_string)
            .ok_or_else(|| CollaboratorError::permanent("Empty response from API"))
    }
}

#[async_trait]
impl LanguageModel for HttpLanguageModel {
    fn model_name(&self) -> &str {
        &self.model.model
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<String, CollaboratorError> {
        let chat = ChatRequest::new(&self.model.model, request.messages())
            .with_temperature(self.temperature)
            .with_max_tokens(request.max_tokens.unwrap_or(self.model.max_tokens));
        self.send_request(&chat).await
    }
}

/// Map an unsuccessful HTTP status to a collaborator error
pub(crate) fn classify_status(
    status: reqwest::StatusCode,
    body: &str,
    retry_header: Option<u64>,
) -> CollaboratorError {
    match status.as_u16() {
        429 => CollaboratorError::rate_limited(extract_retry_after(body).or(retry_header)),
        408 | 504 => CollaboratorError::transient(TransientKind::Timeout, body.to_string()),
        500..=599 => CollaboratorError::transient(
            TransientKind::Unavailable,
            format!("Server error ({}): {}", status, body),
        ),
        401 | 403 => CollaboratorError::permanent("Unauthorized: check the API key"),
        _ => CollaboratorError::permanent(format!("API error ({}): {}", status, body)),
    }
}

/// Extract retry-after value from error response
fn extract_retry_after(body: &str) -> Option<u64> {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(retry_after) = json.get("retry_after").and_then(|v| v.as_u64()) {
            return Some(retry_after);
        }
        if let Some(error) = json.get("error")
            && let Some(retry_after) = error.get("retry_after").and_then(|v| v.as_u64())
        {
            return Some(retry_after);
        }
    }
    None
}
