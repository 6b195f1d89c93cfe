use std::sync::Arc;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        ChatCompletionStreamOptions, CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use tracing::error;

use crate::error::AppError;

use super::{
    breaker::CircuitBreaker, classify_llm_error, GenerationRequest, LlmProvider, LlmResponse,
    LlmStreamChunk, LlmTokenStream, MessageRole, ModelInfo, ProviderHealth, ProviderKind,
};

/// Models surfaced for the OpenAI backend; the Custom variant lists
/// whatever its server reports.
const OPENAI_MODELS: &[(&str, u64)] = &[
    ("gpt-4o", 128_000),
    ("gpt-4o-mini", 128_000),
    ("gpt-4.1", 1_047_576),
    ("gpt-4.1-mini", 1_047_576),
    ("o3-mini", 200_000),
];

/// Provider for OpenAI and OpenAI-compatible backends. `Custom` is the
/// same wire protocol pointed at a caller-supplied base URL.
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    kind: ProviderKind,
    breaker: Arc<CircuitBreaker>,
}

impl OpenAiProvider {
    pub fn new(api_key: &str, base_url: &str, kind: ProviderKind, breaker: Arc<CircuitBreaker>) -> Self {
        let client = Client::with_config(
            OpenAIConfig::new()
                .with_api_key(api_key)
                .with_api_base(base_url),
        );
        Self {
            client,
            kind,
            breaker,
        }
    }

    fn build_request(
        request: &GenerationRequest,
        streaming: bool,
    ) -> Result<CreateChatCompletionRequest, OpenAIError> {
        let mut messages: Vec<ChatCompletionRequestMessage> =
            Vec::with_capacity(request.messages.len());
        for message in &request.messages {
            let mapped = match message.role {
                MessageRole::System => {
                    ChatCompletionRequestSystemMessage::from(message.content.clone()).into()
                }
                MessageRole::User => {
                    ChatCompletionRequestUserMessage::from(message.content.clone()).into()
                }
                MessageRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(message.content.clone())
                    .build()?
                    .into(),
            };
            messages.push(mapped);
        }

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(&request.model)
            .messages(messages)
            .temperature(request.temperature)
            .max_tokens(request.max_tokens);
        if streaming {
            builder.stream(true).stream_options(ChatCompletionStreamOptions {
                include_usage: true,
            });
        }
        builder.build()
    }

    fn map_error(&self, err: OpenAIError) -> AppError {
        match &err {
            OpenAIError::ApiError(api) => {
                let kind = api.r#type.as_deref().unwrap_or_default();
                let message = api.message.to_lowercase();
                if kind == "authentication_error" || message.contains("api key") {
                    AppError::ProviderAuth(api.message.clone())
                } else if kind == "rate_limit_error" || message.contains("rate limit") {
                    AppError::ProviderRateLimit(api.message.clone())
                } else if kind == "invalid_request_error" {
                    AppError::Validation(api.message.clone())
                } else {
                    AppError::ProviderTransport(api.message.clone())
                }
            }
            OpenAIError::Reqwest(inner) if inner.is_timeout() => {
                AppError::ProviderTimeout(err.to_string())
            }
            OpenAIError::Reqwest(_) => AppError::ProviderTransport(err.to_string()),
            OpenAIError::InvalidArgument(message) => AppError::Validation(message.clone()),
            _ => AppError::OpenAI(err),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn generate(&self, request: GenerationRequest) -> Result<LlmResponse, AppError> {
        self.breaker.pre_request()?;

        let chat_request = Self::build_request(&request, false).map_err(AppError::OpenAI)?;
        match self.client.chat().create(chat_request).await {
            Ok(response) => {
                self.breaker.record_success();
                let content = response
                    .choices
                    .first()
                    .and_then(|choice| choice.message.content.clone())
                    .unwrap_or_default();
                let usage = response.usage;
                Ok(LlmResponse {
                    content,
                    model: request.model,
                    provider: self.kind,
                    input_tokens: usage.as_ref().map_or(0, |u| u64::from(u.prompt_tokens)),
                    output_tokens: usage
                        .as_ref()
                        .map_or(0, |u| u64::from(u.completion_tokens)),
                })
            }
            Err(err) => {
                let mapped = self.map_error(err);
                // Auth and invalid-request failures are the caller's problem,
                // not a sign the backend is down.
                if !matches!(
                    mapped,
                    AppError::ProviderAuth(_) | AppError::Validation(_)
                ) {
                    self.breaker.record_failure();
                }
                error!(provider = %self.kind, error = %mapped, "Generation failed");
                Err(mapped)
            }
        }
    }

    async fn stream(&self, request: GenerationRequest) -> Result<LlmTokenStream, AppError> {
        self.breaker.pre_request()?;

        let chat_request = Self::build_request(&request, true).map_err(AppError::OpenAI)?;
        let mut upstream = match self.client.chat().create_stream(chat_request).await {
            Ok(stream) => stream,
            Err(err) => {
                let mapped = self.map_error(err);
                if !matches!(
                    mapped,
                    AppError::ProviderAuth(_) | AppError::Validation(_)
                ) {
                    self.breaker.record_failure();
                }
                return Err(mapped);
            }
        };

        self.breaker.record_success();

        let token_stream = stream! {
            let mut input_tokens = None;
            let mut output_tokens = None;

            while let Some(next) = upstream.next().await {
                match next {
                    Ok(response) => {
                        if let Some(usage) = response.usage {
                            input_tokens = Some(u64::from(usage.prompt_tokens));
                            output_tokens = Some(u64::from(usage.completion_tokens));
                        }
                        let content = response
                            .choices
                            .first()
                            .and_then(|choice| choice.delta.content.clone())
                            .unwrap_or_default();
                        if !content.is_empty() {
                            yield LlmStreamChunk::token(content);
                        }
                    }
                    Err(err) => {
                        let app_error = AppError::OpenAI(err);
                        let (kind, message) = classify_llm_error(&app_error);
                        yield LlmStreamChunk::error(kind, message);
                        return;
                    }
                }
            }

            yield LlmStreamChunk::finished(input_tokens, output_tokens);
        };

        Ok(Box::pin(token_stream))
    }

    async fn health_check(&self) -> ProviderHealth {
        match self.client.models().list().await {
            Ok(listing) => {
                self.breaker.record_success();
                ProviderHealth {
                    provider: self.kind,
                    connected: true,
                    healthy: true,
                    error: None,
                    available_models: listing.data.into_iter().map(|m| m.id).collect(),
                    breaker: self.breaker.status(),
                }
            }
            Err(err) => {
                self.breaker.record_failure();
                ProviderHealth {
                    provider: self.kind,
                    connected: false,
                    healthy: false,
                    error: Some(err.to_string()),
                    available_models: Vec::new(),
                    breaker: self.breaker.status(),
                }
            }
        }
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, AppError> {
        if self.kind == ProviderKind::OpenAi {
            return Ok(OPENAI_MODELS
                .iter()
                .map(|(id, context)| ModelInfo {
                    id: (*id).to_owned(),
                    name: (*id).to_owned(),
                    provider: self.kind,
                    context_length: Some(*context),
                    size_bytes: None,
                })
                .collect());
        }

        let listing = self
            .client
            .models()
            .list()
            .await
            .map_err(|err| self.map_error(err))?;
        Ok(listing
            .data
            .into_iter()
            .map(|model| ModelInfo {
                id: model.id.clone(),
                name: model.id,
                provider: self.kind,
                context_length: None,
                size_bytes: None,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmMessage;

    #[test]
    fn test_build_request_maps_roles_and_options() {
        let request = GenerationRequest {
            messages: vec![
                LlmMessage::system("sys"),
                LlmMessage::user("question"),
                LlmMessage::assistant("earlier answer"),
            ],
            model: "gpt-4o-mini".into(),
            temperature: 0.3,
            max_tokens: 512,
            context_window: None,
        };

        let chat_request =
            OpenAiProvider::build_request(&request, true).expect("request should build");
        assert_eq!(chat_request.model, "gpt-4o-mini");
        assert_eq!(chat_request.messages.len(), 3);
        assert_eq!(chat_request.stream, Some(true));
        assert_eq!(chat_request.max_tokens, Some(512));
    }

    #[tokio::test]
    async fn test_open_breaker_rejects_before_request() {
        let breaker = Arc::new(CircuitBreaker::new(
            "openai",
            1,
            std::time::Duration::from_secs(60),
        ));
        breaker.record_failure();

        let provider = OpenAiProvider::new(
            "test-key",
            "http://127.0.0.1:9/v1",
            ProviderKind::OpenAi,
            breaker,
        );
        let request = GenerationRequest::new(vec![LlmMessage::user("hi")], "gpt-4o-mini");
        let err = provider.generate(request).await.expect_err("must fail");
        assert!(matches!(err, AppError::CircuitOpen { .. }));
    }
}
