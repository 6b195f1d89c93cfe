use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error};

use crate::error::AppError;

use super::{
    breaker::CircuitBreaker, classify_llm_error, transport_error, GenerationRequest, LlmProvider,
    LlmResponse, LlmStreamChunk, LlmTokenStream, MessageRole, ModelInfo, ProviderHealth,
    ProviderKind, GENERATION_TIMEOUT, HEALTH_TIMEOUT,
};

const API_BASE: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

/// Static Anthropic model catalog; the Messages API has no listing call
/// on the key tier this backend targets.
const ANTHROPIC_MODELS: &[(&str, &str, u64)] = &[
    ("claude-sonnet-4-20250514", "Claude Sonnet 4", 200_000),
    ("claude-opus-4-0520", "Claude Opus 4", 200_000),
    ("claude-haiku-4-5-20251001", "Claude Haiku 4.5", 200_000),
    ("claude-sonnet-4-5-20250929", "Claude Sonnet 4.5", 200_000),
];

pub struct AnthropicProvider {
    api_key: String,
    base_url: String,
    http: reqwest::Client,
    probe: reqwest::Client,
    breaker: Arc<CircuitBreaker>,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Default, Clone, Copy)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    kind: String,
    delta: Option<StreamDelta>,
    message: Option<StreamMessage>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct StreamDelta {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct StreamMessage {
    usage: Option<Usage>,
}

impl AnthropicProvider {
    pub fn new(api_key: &str, breaker: Arc<CircuitBreaker>) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(GENERATION_TIMEOUT)
            .build()
            .map_err(|e| AppError::ProviderTransport(e.to_string()))?;
        let probe = reqwest::Client::builder()
            .timeout(HEALTH_TIMEOUT)
            .build()
            .map_err(|e| AppError::ProviderTransport(e.to_string()))?;

        Ok(Self {
            api_key: api_key.to_owned(),
            base_url: API_BASE.to_owned(),
            http,
            probe,
            breaker,
        })
    }

    /// The Messages API takes the system prompt out of band; remaining
    /// turns alternate user/assistant.
    fn prepare_messages(request: &GenerationRequest) -> (String, Vec<serde_json::Value>) {
        let mut system_prompt = String::new();
        let mut messages = Vec::new();

        for message in &request.messages {
            match message.role {
                MessageRole::System => {
                    if !system_prompt.is_empty() {
                        system_prompt.push('\n');
                    }
                    system_prompt.push_str(&message.content);
                }
                MessageRole::User | MessageRole::Assistant => {
                    messages.push(json!({
                        "role": message.role.as_str(),
                        "content": message.content,
                    }));
                }
            }
        }

        if messages.is_empty() {
            messages.push(json!({ "role": "user", "content": "Hello" }));
        }

        (system_prompt.trim().to_owned(), messages)
    }

    fn request_body(request: &GenerationRequest, streaming: bool) -> serde_json::Value {
        let (system_prompt, messages) = Self::prepare_messages(request);
        let mut body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": messages,
            "stream": streaming,
        });
        if !system_prompt.is_empty() {
            body["system"] = json!(system_prompt);
        }
        body
    }

    fn map_status(status: reqwest::StatusCode, body: String) -> AppError {
        match status.as_u16() {
            401 | 403 => AppError::ProviderAuth(body),
            429 => AppError::ProviderRateLimit(body),
            400 | 404 | 422 => AppError::Validation(body),
            _ => AppError::ProviderTransport(body),
        }
    }

    async fn post_messages(
        &self,
        body: serde_json::Value,
    ) -> Result<reqwest::Response, AppError> {
        let response = self
            .http
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Self::map_status(status, text));
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    async fn generate(&self, request: GenerationRequest) -> Result<LlmResponse, AppError> {
        self.breaker.pre_request()?;

        let body = Self::request_body(&request, false);
        let result = async {
            let response = self.post_messages(body).await?;
            let parsed: MessagesResponse = response.json().await.map_err(transport_error)?;
            Ok::<MessagesResponse, AppError>(parsed)
        }
        .await;

        match result {
            Ok(parsed) => {
                self.breaker.record_success();
                let content: String = parsed
                    .content
                    .iter()
                    .filter(|block| block.kind == "text")
                    .map(|block| block.text.as_str())
                    .collect();
                let usage = parsed.usage.unwrap_or_default();
                Ok(LlmResponse {
                    content,
                    model: request.model,
                    provider: ProviderKind::Anthropic,
                    input_tokens: usage.input_tokens,
                    output_tokens: usage.output_tokens,
                })
            }
            Err(err) => {
                if !matches!(
                    err,
                    AppError::ProviderAuth(_) | AppError::Validation(_)
                ) {
                    self.breaker.record_failure();
                }
                error!(error = %err, "Anthropic generation failed");
                Err(err)
            }
        }
    }

    async fn stream(&self, request: GenerationRequest) -> Result<LlmTokenStream, AppError> {
        self.breaker.pre_request()?;

        let body = Self::request_body(&request, true);
        let response = match self.post_messages(body).await {
            Ok(response) => response,
            Err(err) => {
                if !matches!(
                    err,
                    AppError::ProviderAuth(_) | AppError::Validation(_)
                ) {
                    self.breaker.record_failure();
                }
                return Err(err);
            }
        };

        self.breaker.record_success();

        // Server-sent events: only `data: {...}` lines matter here.
        let breaker = Arc::clone(&self.breaker);
        let token_stream = stream! {
            let mut bytes = response.bytes_stream();
            let mut buffer = String::new();
            let mut input_tokens = None;
            let mut output_tokens = None;

            while let Some(next) = bytes.next().await {
                match next {
                    Ok(chunk) => {
                        buffer.push_str(&String::from_utf8_lossy(&chunk));

                        while let Some(newline) = buffer.find('\n') {
                            let line = buffer[..newline].trim().to_owned();
                            buffer.drain(..=newline);

                            let Some(payload) = line.strip_prefix("data:") else {
                                continue;
                            };
                            let Ok(event) = serde_json::from_str::<StreamEvent>(payload.trim())
                            else {
                                debug!(line, "Skipping malformed SSE line");
                                continue;
                            };

                            match event.kind.as_str() {
                                "message_start" => {
                                    if let Some(usage) =
                                        event.message.and_then(|m| m.usage)
                                    {
                                        input_tokens = Some(usage.input_tokens);
                                    }
                                }
                                "content_block_delta" => {
                                    if let Some(delta) = event.delta {
                                        if !delta.text.is_empty() {
                                            yield LlmStreamChunk::token(delta.text);
                                        }
                                    }
                                }
                                "message_delta" => {
                                    if let Some(usage) = event.usage {
                                        output_tokens = Some(usage.output_tokens);
                                    }
                                }
                                "message_stop" => {
                                    yield LlmStreamChunk::finished(input_tokens, output_tokens);
                                    return;
                                }
                                _ => {}
                            }
                        }
                    }
                    Err(err) => {
                        breaker.record_failure();
                        let app_error = transport_error(err);
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
        // Minimal paid probe: a one-token generation against the cheapest model.
        let body = json!({
            "model": "claude-haiku-4-5-20251001",
            "max_tokens": 1,
            "messages": [{ "role": "user", "content": "Hi" }],
        });

        let result = self
            .probe
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                self.breaker.record_success();
                ProviderHealth {
                    provider: ProviderKind::Anthropic,
                    connected: true,
                    healthy: true,
                    error: None,
                    available_models: ANTHROPIC_MODELS
                        .iter()
                        .map(|(id, _, _)| (*id).to_owned())
                        .collect(),
                    breaker: self.breaker.status(),
                }
            }
            Ok(response) => {
                let status = response.status();
                if !matches!(status.as_u16(), 401 | 403) {
                    self.breaker.record_failure();
                }
                ProviderHealth {
                    provider: ProviderKind::Anthropic,
                    connected: true,
                    healthy: false,
                    error: Some(format!("status {status}")),
                    available_models: Vec::new(),
                    breaker: self.breaker.status(),
                }
            }
            Err(err) => {
                self.breaker.record_failure();
                ProviderHealth {
                    provider: ProviderKind::Anthropic,
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
        Ok(ANTHROPIC_MODELS
            .iter()
            .map(|(id, name, context)| ModelInfo {
                id: (*id).to_owned(),
                name: (*name).to_owned(),
                provider: ProviderKind::Anthropic,
                context_length: Some(*context),
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
    fn test_prepare_messages_extracts_system_prompt() {
        let request = GenerationRequest::new(
            vec![
                LlmMessage::system("first rule"),
                LlmMessage::system("second rule"),
                LlmMessage::user("question"),
                LlmMessage::assistant("answer"),
            ],
            "claude-sonnet-4-20250514",
        );

        let (system, messages) = AnthropicProvider::prepare_messages(&request);
        assert_eq!(system, "first rule\nsecond rule");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[1]["role"], "assistant");
    }

    #[test]
    fn test_prepare_messages_guarantees_a_user_turn() {
        let request = GenerationRequest::new(
            vec![LlmMessage::system("only a system prompt")],
            "claude-sonnet-4-20250514",
        );
        let (_, messages) = AnthropicProvider::prepare_messages(&request);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
    }

    #[test]
    fn test_status_mapping() {
        let auth = AnthropicProvider::map_status(reqwest::StatusCode::UNAUTHORIZED, "no".into());
        assert!(matches!(auth, AppError::ProviderAuth(_)));

        let rate =
            AnthropicProvider::map_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow".into());
        assert!(matches!(rate, AppError::ProviderRateLimit(_)));

        let invalid = AnthropicProvider::map_status(reqwest::StatusCode::BAD_REQUEST, "bad".into());
        assert!(matches!(invalid, AppError::Validation(_)));
    }
}
