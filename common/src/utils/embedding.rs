use async_openai::types::CreateEmbeddingRequestArgs;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, warn};

use crate::{
    error::AppError,
    utils::config::{AppConfig, EmbeddingBackend},
};

/// Hard deadline for one embedding request.
const EMBED_TIMEOUT: Duration = Duration::from_secs(30);

/// Dense-vector source for notes, chunks, images and brain files.
///
/// `ModelServer` talks to the local model server's `/api/embeddings`
/// endpoint; `OpenAi` goes through the OpenAI-compatible API; `Hashed` is a
/// deterministic offline backend used in tests.
pub enum EmbeddingProvider {
    ModelServer {
        http: reqwest::Client,
        host: String,
        model: String,
        dimensions: usize,
        max_chars: usize,
    },
    OpenAi {
        client: async_openai::Client<async_openai::config::OpenAIConfig>,
        model: String,
        dimensions: usize,
        max_chars: usize,
    },
    Hashed {
        dimensions: usize,
        max_chars: usize,
    },
}

#[derive(Deserialize)]
struct ModelServerEmbeddingResponse {
    embedding: Vec<f32>,
}

impl EmbeddingProvider {
    pub fn from_config(
        config: &AppConfig,
        openai_client: Option<async_openai::Client<async_openai::config::OpenAIConfig>>,
    ) -> Result<Self, AppError> {
        match config.embedding_backend {
            EmbeddingBackend::ModelServer => {
                let http = reqwest::Client::builder()
                    .timeout(EMBED_TIMEOUT)
                    .build()
                    .map_err(|e| AppError::Embedding(e.to_string()))?;
                Ok(Self::ModelServer {
                    http,
                    host: config.model_server_url.trim_end_matches('/').to_owned(),
                    model: config.embedding_model.clone(),
                    dimensions: config.embedding_dimensions as usize,
                    max_chars: config.max_embedding_chars,
                })
            }
            EmbeddingBackend::OpenAi => {
                let client = openai_client.ok_or_else(|| {
                    AppError::Embedding("OpenAI embedding backend requires a client".into())
                })?;
                Ok(Self::OpenAi {
                    client,
                    model: config.embedding_model.clone(),
                    dimensions: config.embedding_dimensions as usize,
                    max_chars: config.max_embedding_chars,
                })
            }
        }
    }

    /// Deterministic embeddings for tests, no network involved.
    pub fn new_hashed(dimensions: usize) -> Result<Self, AppError> {
        if dimensions == 0 {
            return Err(AppError::Validation(
                "Embedding dimension must be positive".into(),
            ));
        }
        Ok(Self::Hashed {
            dimensions,
            max_chars: 2000,
        })
    }

    pub fn dimensions(&self) -> usize {
        match self {
            Self::ModelServer { dimensions, .. }
            | Self::OpenAi { dimensions, .. }
            | Self::Hashed { dimensions, .. } => *dimensions,
        }
    }

    fn max_chars(&self) -> usize {
        match self {
            Self::ModelServer { max_chars, .. }
            | Self::OpenAi { max_chars, .. }
            | Self::Hashed { max_chars, .. } => *max_chars,
        }
    }

    /// Embed one text, truncated to the configured character limit.
    ///
    /// Transport failures surface as `AppError::Embedding`; callers treat a
    /// missing embedding as a skip signal rather than a hard failure.
    pub async fn embed(&self, input: &str) -> Result<Vec<f32>, AppError> {
        let truncated: String = input.chars().take(self.max_chars()).collect();
        let text = truncated.trim();
        if text.is_empty() {
            return Err(AppError::Validation(
                "Cannot embed empty text".into(),
            ));
        }

        match self {
            Self::ModelServer {
                http,
                host,
                model,
                dimensions,
                ..
            } => {
                let response = http
                    .post(format!("{host}/api/embeddings"))
                    .json(&serde_json::json!({ "model": model, "prompt": text }))
                    .send()
                    .await
                    .map_err(|e| AppError::Embedding(e.to_string()))?;
                let response = response
                    .error_for_status()
                    .map_err(|e| AppError::Embedding(e.to_string()))?;
                let body: ModelServerEmbeddingResponse = response
                    .json()
                    .await
                    .map_err(|e| AppError::Embedding(e.to_string()))?;

                if body.embedding.len() != *dimensions {
                    return Err(AppError::Embedding(format!(
                        "Unexpected embedding dimension {} (expected {dimensions})",
                        body.embedding.len()
                    )));
                }
                debug!(chars = text.len(), "Generated model-server embedding");
                Ok(body.embedding)
            }
            Self::OpenAi {
                client,
                model,
                dimensions,
                ..
            } => {
                let request = CreateEmbeddingRequestArgs::default()
                    .model(model.clone())
                    .dimensions(*dimensions as u32)
                    .input([text])
                    .build()
                    .map_err(|e| AppError::Embedding(e.to_string()))?;

                let response = client
                    .embeddings()
                    .create(request)
                    .await
                    .map_err(|e| AppError::Embedding(e.to_string()))?;

                let embedding = response
                    .data
                    .first()
                    .ok_or_else(|| AppError::Embedding("No embedding data received".into()))?
                    .embedding
                    .clone();
                Ok(embedding)
            }
            Self::Hashed { dimensions, .. } => Ok(hashed_embedding(text, *dimensions)),
        }
    }

    /// Embed several texts sequentially (the model server has no batch API).
    /// Failed inputs come back as `None` instead of aborting the batch.
    pub async fn batch_embed(&self, inputs: &[String]) -> Vec<Option<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(inputs.len());
        for (index, input) in inputs.iter().enumerate() {
            match self.embed(input).await {
                Ok(embedding) => embeddings.push(Some(embedding)),
                Err(err) => {
                    warn!(index, error = %err, "Batch embedding entry failed");
                    embeddings.push(None);
                }
            }
        }
        embeddings
    }
}

/// Token-hash embedding: stable across runs, unrelated texts land far
/// apart, overlapping texts nearby. Test backend only.
fn hashed_embedding(text: &str, dimensions: usize) -> Vec<f32> {
    let mut vector = vec![0.0_f32; dimensions];
    for token in text.to_lowercase().split_whitespace() {
        let digest = Sha256::digest(token.as_bytes());
        let bucket = u64::from_le_bytes([
            digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
        ]) as usize
            % dimensions;
        let sign = if digest[8] % 2 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

/// Cosine similarity for in-memory comparisons. Database-side similarity
/// uses the vector index's native distance instead.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_basic_geometry() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_handles_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn test_hashed_embeddings_are_deterministic() {
        let provider = EmbeddingProvider::new_hashed(64).expect("provider");
        let a = provider.embed("docker bridge network").await.expect("embed");
        let b = provider.embed("docker bridge network").await.expect("embed");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_hashed_embeddings_separate_unrelated_texts() {
        let provider = EmbeddingProvider::new_hashed(128).expect("provider");
        let docker = provider
            .embed("docker bridge network container")
            .await
            .expect("embed");
        let docker_related = provider
            .embed("docker network configuration")
            .await
            .expect("embed");
        let cooking = provider
            .embed("pasta sauce simmer recipe")
            .await
            .expect("embed");

        let related = cosine_similarity(&docker, &docker_related);
        let unrelated = cosine_similarity(&docker, &cooking);
        assert!(related > unrelated);
    }

    #[tokio::test]
    async fn test_empty_text_is_a_validation_error() {
        let provider = EmbeddingProvider::new_hashed(16).expect("provider");
        let result = provider.embed("   ").await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_batch_embed_keeps_failures_positional() {
        let provider = EmbeddingProvider::new_hashed(16).expect("provider");
        let results = provider
            .batch_embed(&["hello".to_owned(), "  ".to_owned(), "world".to_owned()])
            .await;
        assert_eq!(results.len(), 3);
        assert!(results[0].is_some());
        assert!(results[1].is_none());
        assert!(results[2].is_some());
    }
}
