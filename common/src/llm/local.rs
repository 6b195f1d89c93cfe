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
    LlmResponse, LlmStreamChunk, LlmTokenStream, ModelInfo, ProviderHealth, ProviderKind,
    GENERATION_TIMEOUT, HEALTH_TIMEOUT,
};

/// Provider for the local model server's `/api/chat` protocol.
///
/// The breaker is shared process-wide so every caller observes the same
/// availability picture.
pub struct LocalProvider {
    host: String,
    http: reqwest::Client,
    probe: reqwest::Client,
    breaker: Arc<CircuitBreaker>,
}

#[derive(Deserialize, Default)]
struct ChatChunk {
    #[serde(default)]
    message: ChatChunkMessage,
    #[serde(default)]
    done: bool,
    prompt_eval_count: Option<u64>,
    eval_count: Option<u64>,
}

#[derive(Deserialize, Default)]
struct ChatChunkMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    #[serde(default)]
    name: String,
    size: Option<u64>,
}

impl LocalProvider {
    pub fn new(host: &str, breaker: Arc<CircuitBreaker>) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(GENERATION_TIMEOUT)
            .build()
            .map_err(|e| AppError::ProviderTransport(e.to_string()))?;
        let probe = reqwest::Client::builder()
            .timeout(HEALTH_TIMEOUT)
            .build()
            .map_err(|e| AppError::ProviderTransport(e.to_string()))?;

        Ok(Self {
            host: host.trim_end_matches('/').to_owned(),
            http,
            probe,
            breaker,
        })
    }

    fn chat_body(request: &GenerationRequest, streaming: bool) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();

        let mut options = json!({
            "temperature": request.temperature,
            "num_predict": request.max_tokens,
        });
        if let Some(context_window) = request.context_window {
            options["num_ctx"] = json!(context_window);
        }

        json!({
            "model": request.model,
            "messages": messages,
            "stream": streaming,
            "options": options,
        })
    }
}

#[async_trait]
impl LlmProvider for LocalProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    async fn generate(&self, request: GenerationRequest) -> Result<LlmResponse, AppError> {
        self.breaker.pre_request()?;

        let body = Self::chat_body(&request, false);
        let result = async {
            let response = self
                .http
                .post(format!("{}/api/chat", self.host))
                .json(&body)
                .send()
                .await
                .map_err(transport_error)?
                .error_for_status()
                .map_err(transport_error)?;
            let chunk: ChatChunk = response.json().await.map_err(transport_error)?;
            Ok::<ChatChunk, AppError>(chunk)
        }
        .await;

        match result {
            Ok(chunk) => {
                self.breaker.record_success();
                Ok(LlmResponse {
                    content: chunk.message.content,
                    model: request.model,
                    provider: ProviderKind::Local,
                    input_tokens: chunk.prompt_eval_count.unwrap_or(0),
                    output_tokens: chunk.eval_count.unwrap_or(0),
                })
            }
            Err(err) => {
                // A rejected request never counts against the breaker twice
                if !matches!(err, AppError::CircuitOpen { .. }) {
                    self.breaker.record_failure();
                }
                error!(error = %err, "Local generation failed");
                Err(err)
            }
        }
    }

    async fn stream(&self, request: GenerationRequest) -> Result<LlmTokenStream, AppError> {
        self.breaker.pre_request()?;

        let body = Self::chat_body(&request, true);
        let response = self
            .http
            .post(format!("{}/api/chat", self.host))
            .json(&body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| {
                self.breaker.record_failure();
                transport_error(err)
            })?;

        self.breaker.record_success();

        // Newline-delimited JSON chunks, consumed lazily by one reader.
        let breaker = Arc::clone(&self.breaker);
        let token_stream = stream! {
            let mut bytes = response.bytes_stream();
            let mut buffer = String::new();
            let mut finished = false;

            while let Some(next) = bytes.next().await {
                match next {
                    Ok(chunk) => {
                        buffer.push_str(&String::from_utf8_lossy(&chunk));

                        while let Some(newline) = buffer.find('\n') {
                            let line = buffer[..newline].trim().to_owned();
                            buffer.drain(..=newline);
                            if line.is_empty() {
                                continue;
                            }

                            let Ok(parsed) = serde_json::from_str::<ChatChunk>(&line) else {
                                debug!(line, "Skipping malformed stream line");
                                continue;
                            };

                            if parsed.done {
                                finished = true;
                                yield LlmStreamChunk::finished(
                                    parsed.prompt_eval_count,
                                    parsed.eval_count,
                                );
                                break;
                            }
                            if !parsed.message.content.is_empty() {
                                yield LlmStreamChunk::token(parsed.message.content);
                            }
                        }

                        if finished {
                            break;
                        }
                    }
                    Err(err) => {
                        breaker.record_failure();
                        let app_error = transport_error(err);
                        let (kind, message) = classify_llm_error(&app_error);
                        yield LlmStreamChunk::error(kind, message);
                        finished = true;
                        break;
                    }
                }
            }

            if !finished {
                yield LlmStreamChunk::finished(None, None);
            }
        };

        Ok(Box::pin(token_stream))
    }

    async fn health_check(&self) -> ProviderHealth {
        let result = self
            .probe
            .get(format!("{}/api/tags", self.host))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);

        match result {
            Ok(response) => {
                let models = response
                    .json::<TagsResponse>()
                    .await
                    .map(|tags| tags.models.into_iter().map(|m| m.name).collect())
                    .unwrap_or_default();
                self.breaker.record_success();
                ProviderHealth {
                    provider: ProviderKind::Local,
                    connected: true,
                    healthy: true,
                    error: None,
                    available_models: models,
                    breaker: self.breaker.status(),
                }
            }
            Err(err) => {
                self.breaker.record_failure();
                ProviderHealth {
                    provider: ProviderKind::Local,
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
        let response = self
            .probe
            .get(format!("{}/api/tags", self.host))
            .send()
            .await
            .map_err(transport_error)?
            .error_for_status()
            .map_err(transport_error)?;
        let tags: TagsResponse = response.json().await.map_err(transport_error)?;

        Ok(tags
            .models
            .into_iter()
            .map(|model| ModelInfo {
                id: model.name.clone(),
                name: model.name,
                provider: ProviderKind::Local,
                context_length: None,
                size_bytes: model.size,
            })
            .collect())
    }
}
