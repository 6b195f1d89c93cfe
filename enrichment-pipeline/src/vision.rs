use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use common::{error::AppError, llm::breaker::CircuitBreaker};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

/// Deadline for a vision call; OCR over page images is slow.
const VISION_TIMEOUT: Duration = Duration::from_secs(180);

/// Vision calls against the local model server's `/api/chat`, with the
/// image attached as base64. Shares the local provider's breaker so OCR
/// load counts toward the same availability picture.
pub struct VisionClient {
    host: String,
    model: String,
    http: reqwest::Client,
    breaker: Arc<CircuitBreaker>,
}

#[derive(Deserialize, Default)]
struct VisionResponse {
    #[serde(default)]
    message: VisionMessage,
}

#[derive(Deserialize, Default)]
struct VisionMessage {
    #[serde(default)]
    content: String,
}

impl VisionClient {
    pub fn new(host: &str, model: &str, breaker: Arc<CircuitBreaker>) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(VISION_TIMEOUT)
            .build()
            .map_err(|e| AppError::ProviderTransport(e.to_string()))?;
        Ok(Self {
            host: host.trim_end_matches('/').to_owned(),
            model: model.to_owned(),
            http,
            breaker,
        })
    }

    /// Run a prompt against one image file.
    pub async fn analyze_file(&self, path: &Path, prompt: &str) -> Result<String, AppError> {
        self.breaker.pre_request()?;

        let bytes = std::fs::read(path)?;
        let encoded = BASE64.encode(bytes);

        let body = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": prompt,
                "images": [encoded],
            }],
            "stream": false,
        });

        let result = async {
            let response = self
                .http
                .post(format!("{}/api/chat", self.host))
                .json(&body)
                .send()
                .await
                .map_err(|e| AppError::ProviderTransport(e.to_string()))?
                .error_for_status()
                .map_err(|e| AppError::ProviderTransport(e.to_string()))?;
            let parsed: VisionResponse = response
                .json()
                .await
                .map_err(|e| AppError::ProviderTransport(e.to_string()))?;
            Ok::<String, AppError>(parsed.message.content)
        }
        .await;

        match result {
            Ok(content) if !content.trim().is_empty() => {
                self.breaker.record_success();
                info!(chars = content.len(), "Vision analysis complete");
                Ok(content)
            }
            Ok(_) => {
                self.breaker.record_success();
                Err(AppError::LLMParsing("Vision model returned no text".into()))
            }
            Err(err) => {
                if !matches!(err, AppError::CircuitOpen { .. }) {
                    self.breaker.record_failure();
                }
                Err(err)
            }
        }
    }

    /// OCR fallback for scanned documents: read the raw file as an image
    /// and transcribe whatever text is visible.
    pub async fn ocr_file(&self, path: &Path) -> Result<String, AppError> {
        self.analyze_file(
            path,
            "Transcribe all text visible in this document image. Output the \
             text only, preserving paragraph breaks.",
        )
        .await
    }
}
