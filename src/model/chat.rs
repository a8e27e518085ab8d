//! OpenAI-compatible chat completion backend

use super::token_estimator::{default_estimator, TokenEstimator};
use super::{LanguageModel, ModelSession};
use crate::config::ModelConfig;
use crate::error::{Result, SentinelError};
use crate::logging::preview;
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Chat completion model reached over HTTP
pub struct ChatCompletionModel {
    inner: Arc<ChatBackend>,
}

struct ChatBackend {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<SecretString>,
    temperature: f32,
    estimator: Arc<dyn TokenEstimator>,
}

impl ChatCompletionModel {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let estimator = default_estimator(config.use_tiktoken);
        Self::with_estimator(config, estimator)
    }

    pub fn with_estimator(config: &ModelConfig, estimator: Arc<dyn TokenEstimator>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.http_timeout())
            .build()
            .map_err(|e| SentinelError::Configuration(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(ChatBackend {
                client,
                endpoint: config.endpoint.clone(),
                model: config.model.clone(),
                api_key: config.resolve_api_key(),
                temperature: config.temperature,
                estimator,
            }),
        })
    }
}

#[async_trait]
impl LanguageModel for ChatCompletionModel {
    async fn create_session(&self, system_prompt: &str) -> Result<Box<dyn ModelSession>> {
        debug!("Opening chat session on {}", self.inner.model);
        Ok(Box::new(ChatSession {
            backend: self.inner.clone(),
            history: vec![ChatMessage::new("system", system_prompt)],
            destroyed: false,
        }))
    }

    fn name(&self) -> &'static str {
        "chat-completions"
    }
}

/// Conversation state kept client-side and replayed on every turn
pub struct ChatSession {
    backend: Arc<ChatBackend>,
    history: Vec<ChatMessage>,
    destroyed: bool,
}

impl ChatSession {
    /// Number of messages in the conversation, system prompt included
    pub fn turns(&self) -> usize {
        self.history.len()
    }
}

#[async_trait]
impl ModelSession for ChatSession {
    async fn fork(&self) -> Result<Box<dyn ModelSession>> {
        if self.destroyed {
            return Err(SentinelError::SessionUnavailable);
        }
        Ok(Box::new(ChatSession {
            backend: self.backend.clone(),
            history: self.history.clone(),
            destroyed: false,
        }))
    }

    async fn count_tokens(&self, text: &str) -> Result<usize> {
        Ok(self.backend.estimator.estimate(text))
    }

    async fn prompt(&mut self, text: &str) -> Result<String> {
        if self.destroyed {
            return Err(SentinelError::SessionUnavailable);
        }

        let mut messages = self.history.clone();
        messages.push(ChatMessage::new("user", text));

        let request = ChatCompletionRequest {
            model: self.backend.model.clone(),
            messages,
            temperature: Some(self.backend.temperature),
        };

        let mut req = self.backend.client.post(&self.backend.endpoint).json(&request);
        if let Some(ref api_key) = self.backend.api_key {
            req = req.bearer_auth(api_key.expose_secret());
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                SentinelError::Model(format!("HTTP timeout: {}", e))
            } else {
                SentinelError::Model(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SentinelError::Model(format!("HTTP {}: {}", status, body)));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| SentinelError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| SentinelError::InvalidResponse("No text content in response".to_string()))?;

        debug!("Model replied: {}", preview(&content));

        self.history.push(ChatMessage::new("user", text));
        self.history.push(ChatMessage::new("assistant", &content));

        Ok(content)
    }

    async fn destroy(&mut self) {
        self.history.clear();
        self.destroyed = true;
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

impl ChatMessage {
    fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}
