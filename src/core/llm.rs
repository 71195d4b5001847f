use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config::ApiConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[allow(dead_code)]
    id: Option<String>,
    #[allow(dead_code)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[allow(dead_code)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[allow(dead_code)]
    role: Option<String>,
    content: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// The single assistant body and usage of a finished completion
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: Option<String>,
    pub usage: Usage,
}

impl From<CompletionResponse> for Completion {
    fn from(response: CompletionResponse) -> Self {
        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content);

        Self {
            content,
            usage: response.usage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelInfo>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid response: {0}")]
    Decode(String),
}

/// Completion transport seen by the conversation engine and title generator
#[async_trait]
pub trait CompletionApi: Send + Sync {
    async fn complete(
        &self,
        credential: &str,
        request: CompletionRequest,
    ) -> Result<Completion, ApiError>;

    async fn list_models(&self, credential: Option<&str>) -> Result<Vec<ModelInfo>, ApiError>;
}

pub struct LLMClient {
    client: Client,
    base_url: String,
}

impl LLMClient {
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

/// Pull a human-readable message out of an error body
fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let message = value
            .pointer("/error/message")
            .or_else(|| value.get("message"))
            .or_else(|| value.get("error"))
            .and_then(|m| m.as_str());
        if let Some(message) = message {
            return message.to_string();
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        "Unknown error".to_string()
    } else {
        trimmed.to_string()
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status: StatusCode = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body);
    tracing::warn!("[LLMClient] API returned error status {}: {}", status, message);

    Err(ApiError::Status {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl CompletionApi for LLMClient {
    async fn complete(
        &self,
        credential: &str,
        request: CompletionRequest,
    ) -> Result<Completion, ApiError> {
        tracing::debug!(
            "[LLMClient] Requesting completion from '{}' with {} messages",
            request.model,
            request.messages.len()
        );

        let response = self
            .client
            .post(self.endpoint("chat/completions"))
            .bearer_auth(credential)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!("[LLMClient] HTTP request failed: {}", e);
                ApiError::Transport(e)
            })?;

        let response = check_status(response).await?;

        let body = response.text().await?;
        let decoded: CompletionResponse = serde_json::from_str(&body).map_err(|e| {
            tracing::warn!("[LLMClient] Failed to decode response body: {}", e);
            ApiError::Decode(e.to_string())
        })?;

        Ok(decoded.into())
    }

    async fn list_models(&self, credential: Option<&str>) -> Result<Vec<ModelInfo>, ApiError> {
        let mut request = self.client.get(self.endpoint("models"));
        if let Some(credential) = credential {
            request = request.bearer_auth(credential);
        }

        let response = check_status(request.send().await?).await?;
        let body = response.text().await?;
        let list: ModelList =
            serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))?;

        tracing::debug!("[LLMClient] Listed {} models", list.data.len());
        Ok(list.data)
    }
}
