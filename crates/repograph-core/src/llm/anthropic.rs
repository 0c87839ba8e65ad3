//! Anthropic messages API client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{LlmConfig, LlmProvider, ModelConfig};
use crate::error::{Error, Result};

use super::client::classify_status;
use super::error::CollaboratorError;
use super::types::MessageRole;
use super::{CompletionRequest, LanguageModel};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Request body for `/messages`; the system prompt travels outside the messages
#[derive(Debug, Clone, Serialize)]
pub struct MessagesRequest {
    pub model: String,
    pub max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnthropicMessage {
    pub role: MessageRole,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagesUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagesResponse {
    pub model: String,
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<String>,
    pub usage: Option<MessagesUsage>,
}

impl MessagesResponse {
    /// Text blocks joined in order; `None` when the reply has no text
    pub fn text(&self) -> Option<String> {
        let text: String = self
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect();
        (!text.is_empty()).then_some(text)
    }
}

impl MessagesRequest {
    pub fn from_completion(model: &ModelConfig, temperature: f32, request: &CompletionRequest) -> Self {
        Self {
            model: model.model.clone(),
            max_tokens: request.max_tokens.unwrap_or(model.max_tokens),
            system: request.system.clone(),
            messages: vec![AnthropicMessage {
                role: MessageRole::User,
                content: request.prompt.clone(),
            }],
            temperature: Some(temperature),
        }
    }
}

/// Language model served by the Anthropic messages API
///
/// Like [`HttpLanguageModel`](super::HttpLanguageModel) it never retries on
/// its own; retries and pacing come from the shared rate limiter.
#[derive(Clone)]
pub struct AnthropicLanguageModel {
    http_client: HttpClient,
    model: ModelConfig,
    temperature: f32,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for AnthropicLanguageModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicLanguageModel")
            .field("base_url", &self.base_url)
            .field("model", &self.model.model)
            .finish()
    }
}

impl AnthropicLanguageModel {
    pub fn new(
        model: ModelConfig,
        api_key: impl Into<String>,
        temperature: f32,
        timeout_secs: u64,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Error::ConfigError("Anthropic API key is required".to_string()));
        }
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(Error::NetworkError)?;
        let base_url = model.endpoint().trim_end_matches('/').to_string();

        Ok(Self {
            http_client,
            model,
            temperature,
            api_key,
            base_url,
        })
    }

    /// Build one model role, reading the API key from the environment
    pub fn from_config(model: &ModelConfig, llm: &LlmConfig) -> Result<Self> {
        let api_key = llm
            .require_api_key(LlmProvider::Anthropic)
            .map_err(|e| Error::ConfigError(e.to_string()))?;
        Self::new(model.clone(), api_key, llm.temperature, llm.timeout_secs)
    }

    async fn send_request(
        &self,
        request: &MessagesRequest,
    ) -> std::result::Result<String, CollaboratorError> {
        let url = format!("{}/messages", self.base_url);

        debug!(model = %request.model, max_tokens = request.max_tokens, "Sending messages request");

        let response = self
            .http_client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
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

        let reply: MessagesResponse = response.json().await.map_err(|e| {
            CollaboratorError::permanent(format!("Failed to parse response: {}", e))
        })?;
        if let Some(usage) = &reply.usage {
            debug!(
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                stop_reason = reply.stop_reason.as_deref().unwrap_or("unknown"),
                "Messages response"
            );
        }

        reply
            .text()
            .ok_or_else(|| CollaboratorError::permanent("Empty response from API"))
    }
}

#[async_trait]
impl LanguageModel for AnthropicLanguageModel {
    fn model_name(&self) -> &str {
        &self.model.model
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<String, CollaboratorError> {
        let body = MessagesRequest::from_completion(&self.model, self.temperature, request);
        self.send_request(&body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claude() -> ModelConfig {
        ModelConfig {
            provider: LlmProvider::Anthropic,
            base_url: None,
            model: "claude-sonnet-4-5".to_string(),
            max_tokens: 8192,
        }
    }

    #[test]
    fn test_system_prompt_is_top_level() {
        let request = CompletionRequest::new("Summarize the graph").with_system("You are terse.");
        let body = MessagesRequest::from_completion(&claude(), 0.0, &request);
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["system"], "You are terse.");
        assert_eq!(json["max_tokens"], 8192);
        assert_eq!(json["messages"].as_array().unwrap().len(), 1);
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "Summarize the graph");
    }

    #[test]
    fn test_request_max_tokens_overrides_role() {
        let request = CompletionRequest::new("x").with_max_tokens(256);
        let body = MessagesRequest::from_completion(&claude(), 0.0, &request);
        assert_eq!(body.max_tokens, 256);
        assert!(serde_json::to_value(&body).unwrap().get("system").is_none());
    }

    #[test]
    fn test_response_text_joins_text_blocks() {
        let body = r#"{
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "model": "claude-sonnet-4-5",
            "content": [
                {"type": "text", "text": "Users live in "},
                {"type": "tool_use", "id": "t", "name": "n", "input": {}},
                {"type": "text", "text": "UserRepository."}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 12, "output_tokens": 5}
        }"#;
        let response: MessagesResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.text().as_deref(), Some("Users live in UserRepository."));
    }

    #[test]
    fn test_empty_content_has_no_text() {
        let body = r#"{"model": "m", "content": [], "stop_reason": "max_tokens"}"#;
        let response: MessagesResponse = serde_json::from_str(body).unwrap();
        assert!(response.text().is_none());
    }

    #[test]
    fn test_client_uses_anthropic_endpoint() {
        let model = AnthropicLanguageModel::new(claude(), "secret-key", 0.0, 30).unwrap();
        assert_eq!(model.base_url, "https://api.anthropic.com/v1");
        assert_eq!(model.model_name(), "claude-sonnet-4-5");
        assert!(!format!("{:?}", model).contains("secret-key"));
        assert!(AnthropicLanguageModel::new(claude(), " ", 0.0, 30).is_err());
    }
}
