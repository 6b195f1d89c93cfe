pub mod anthropic;
pub mod breaker;
pub mod credentials;
pub mod local;
pub mod openai;
pub mod registry;
pub mod usage;

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Deadline for one non-streaming or streaming generation.
pub const GENERATION_TIMEOUT: Duration = Duration::from_secs(180);
/// Deadline for provider health probes and model listings.
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
/// Deadline for model pull streams.
pub const MODEL_PULL_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Local,
    Anthropic,
    OpenAi,
    Custom,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Local => "local",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Custom => "custom",
        }
    }

    pub fn is_cloud(&self) -> bool {
        !matches!(self, ProviderKind::Local)
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmMessage {
    pub role: MessageRole,
    pub content: String,
}

impl LlmMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub messages: Vec<LlmMessage>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub context_window: Option<u32>,
}

impl GenerationRequest {
    pub fn new(messages: Vec<LlmMessage>, model: impl Into<String>) -> Self {
        Self {
            messages,
            model: model.into(),
            temperature: 0.7,
            max_tokens: 2048,
            context_window: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub provider: ProviderKind,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// One element of a token stream. The final chunk carries `done = true`
/// and usage totals when the backend reports them.
#[derive(Debug, Clone, Default)]
pub struct LlmStreamChunk {
    pub content: String,
    pub done: bool,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub is_error: bool,
    pub error_type: Option<String>,
}

impl LlmStreamChunk {
    pub fn token(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn finished(input_tokens: Option<u64>, output_tokens: Option<u64>) -> Self {
        Self {
            done: true,
            input_tokens,
            output_tokens,
            ..Self::default()
        }
    }

    pub fn error(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            done: true,
            is_error: true,
            error_type: Some(kind.as_str().to_owned()),
            ..Self::default()
        }
    }
}

pub type LlmTokenStream = Pin<Box<dyn Stream<Item = LlmStreamChunk> + Send>>;

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub provider: ProviderKind,
    pub context_length: Option<u64>,
    pub size_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub provider: ProviderKind,
    pub connected: bool,
    pub healthy: bool,
    pub error: Option<String>,
    pub available_models: Vec<String>,
    pub breaker: breaker::BreakerStatus,
}

/// The uniform capability set every backend implements.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn generate(&self, request: GenerationRequest) -> Result<LlmResponse, AppError>;

    async fn stream(&self, request: GenerationRequest) -> Result<LlmTokenStream, AppError>;

    async fn health_check(&self) -> ProviderHealth;

    async fn list_models(&self) -> Result<Vec<ModelInfo>, AppError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    Transient,
    Timeout,
    Auth,
    RateLimit,
    InvalidRequest,
    Unknown,
}

impl LlmErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmErrorKind::Transient => "transient",
            LlmErrorKind::Timeout => "timeout",
            LlmErrorKind::Auth => "auth",
            LlmErrorKind::RateLimit => "rate_limit",
            LlmErrorKind::InvalidRequest => "invalid_request",
            LlmErrorKind::Unknown => "unknown",
        }
    }

    /// Whether the orchestrator may retry a job that failed this way.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmErrorKind::Transient | LlmErrorKind::Timeout | LlmErrorKind::RateLimit
        )
    }
}

/// Partition a failure into the retry taxonomy along with a user-safe
/// message.
pub fn classify_llm_error(error: &AppError) -> (LlmErrorKind, String) {
    match error {
        AppError::ProviderTimeout(_) => (
            LlmErrorKind::Timeout,
            "The model took too long to respond.".to_owned(),
        ),
        AppError::ProviderAuth(_) => (
            LlmErrorKind::Auth,
            "The configured model credentials were rejected.".to_owned(),
        ),
        AppError::ProviderRateLimit(_) => (
            LlmErrorKind::RateLimit,
            "The model backend is rate limiting requests.".to_owned(),
        ),
        AppError::ProviderTransport(_) | AppError::CircuitOpen { .. } => (
            LlmErrorKind::Transient,
            "The model backend is unreachable.".to_owned(),
        ),
        AppError::Validation(msg) => (LlmErrorKind::InvalidRequest, msg.clone()),
        AppError::Reqwest(err) if err.is_timeout() => (
            LlmErrorKind::Timeout,
            "The model took too long to respond.".to_owned(),
        ),
        AppError::Reqwest(err) if err.is_connect() => (
            LlmErrorKind::Transient,
            "The model backend is unreachable.".to_owned(),
        ),
        AppError::OpenAI(_) => (
            LlmErrorKind::Transient,
            "The model backend returned an error.".to_owned(),
        ),
        _ => (
            LlmErrorKind::Unknown,
            "The model request failed unexpectedly.".to_owned(),
        ),
    }
}

/// Map a reqwest failure to the provider error taxonomy.
pub(crate) fn transport_error(err: reqwest::Error) -> AppError {
    if err.is_timeout() {
        AppError::ProviderTimeout(err.to_string())
    } else if let Some(status) = err.status() {
        match status.as_u16() {
            401 | 403 => AppError::ProviderAuth(err.to_string()),
            429 => AppError::ProviderRateLimit(err.to_string()),
            400 | 404 | 422 => AppError::Validation(err.to_string()),
            _ => AppError::ProviderTransport(err.to_string()),
        }
    } else {
        AppError::ProviderTransport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_of_taxonomy_errors() {
        let (kind, _) = classify_llm_error(&AppError::ProviderTimeout("180s".into()));
        assert_eq!(kind, LlmErrorKind::Timeout);
        assert!(kind.is_retryable());

        let (kind, _) = classify_llm_error(&AppError::ProviderAuth("401".into()));
        assert_eq!(kind, LlmErrorKind::Auth);
        assert!(!kind.is_retryable());

        let (kind, _) = classify_llm_error(&AppError::ProviderRateLimit("429".into()));
        assert_eq!(kind, LlmErrorKind::RateLimit);
        assert!(kind.is_retryable());

        let (kind, _) = classify_llm_error(&AppError::Validation("unknown model".into()));
        assert_eq!(kind, LlmErrorKind::InvalidRequest);
        assert!(!kind.is_retryable());
    }

    #[test]
    fn test_classification_messages_are_user_safe() {
        let (_, message) =
            classify_llm_error(&AppError::ProviderTransport("tcp 10.0.0.3 refused".into()));
        assert!(!message.contains("10.0.0.3"));
    }
}
