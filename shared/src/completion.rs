//! Chat completion client for the OpenAI-compatible completion API.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::Config;

/// Failures from a single completion call.
#[derive(Error, Debug)]
pub enum CompletionError {
    #[error("Rate limit exceeded")]
    RateLimited,
    #[error("Service unavailable")]
    Unavailable,
    #[error("Completion API returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Completion request failed: {0}")]
    Transport(String),
    #[error("No completion found or completion was empty")]
    Empty,
    #[error("Client does not support {0}")]
    Unsupported(&'static str),
}

impl CompletionError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            429 => CompletionError::RateLimited,
            503 => CompletionError::Unavailable,
            _ => CompletionError::Http { status, body },
        }
    }

    /// HTTP status behind this error, if the API answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            CompletionError::RateLimited => Some(429),
            CompletionError::Unavailable => Some(503),
            CompletionError::Http { status, .. } => Some(*status),
            CompletionError::Transport(_) | CompletionError::Empty | CompletionError::Unsupported(_) => None,
        }
    }
}

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// One role-tagged chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Request body for `/chat/completions`.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// Request body for `/embeddings`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbeddingRequest {
    pub model: String,
    pub input: String,
}

/// Anything that can turn a chat request into completion text.
///
/// Implementations return the trimmed text of the first choice, or
/// [`CompletionError::Empty`] when the API produced nothing usable.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError>;

    /// Embedding vector of `request.input`.
    async fn embed(&self, _request: &EmbeddingRequest) -> Result<Vec<f32>, CompletionError> {
        Err(CompletionError::Unsupported("embeddings"))
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// Client for the OpenAI chat completion endpoint.
pub struct OpenAiClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    /// Create a client against `base_url` (for example `https://api.openai.com/v1`).
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CompletionError> {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url,
            api_key: api_key.into(),
        })
    }

    /// Create a client from application configuration and a resolved key.
    pub fn from_config(config: &Config, api_key: String) -> Result<Self, CompletionError> {
        Self::new(&config.openai_base_url, api_key, config.completion_timeout)
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn embeddings_url(&self) -> String {
        format!("{}/embeddings", self.base_url)
    }

    async fn post<B: Serialize + Sync>(&self, url: String, body: &B) -> Result<reqwest::Response, CompletionError> {
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::from_status(status.as_u16(), body));
        }
        Ok(response)
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let response = self.post(self.completions_url(), request).await?;

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::Transport(format!("invalid response body: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(CompletionError::Empty)
    }

    async fn embed(&self, request: &EmbeddingRequest) -> Result<Vec<f32>, CompletionError> {
        let response = self.post(self.embeddings_url(), request).await?;

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::Transport(format!("invalid response body: {}", e)))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|data| data.embedding)
            .filter(|embedding| !embedding.is_empty())
            .ok_or(CompletionError::Empty)
    }
}
