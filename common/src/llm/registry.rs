use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::{
    error::AppError,
    storage::{db::SurrealDbClient, types::user_api_key::UserApiKey},
    utils::config::AppConfig,
};

use super::{
    anthropic::AnthropicProvider, breaker::CircuitBreaker, credentials, local::LocalProvider,
    openai::OpenAiProvider, GenerationRequest, LlmProvider, LlmResponse, LlmTokenStream,
    ProviderKind,
};

/// Process-wide provider registry.
///
/// Breakers live here, one per provider kind, so every request observes
/// the same availability state. Cloud providers themselves are cheap to
/// construct and are built per request with the caller's decrypted
/// credentials.
pub struct ProviderRegistry {
    config: AppConfig,
    local: Arc<dyn LlmProvider>,
    breakers: HashMap<ProviderKind, Arc<CircuitBreaker>>,
}

impl ProviderRegistry {
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let recovery = Duration::from_secs(config.circuit_recovery_secs);
        let mut breakers = HashMap::new();
        for kind in [
            ProviderKind::Local,
            ProviderKind::Anthropic,
            ProviderKind::OpenAi,
            ProviderKind::Custom,
        ] {
            breakers.insert(
                kind,
                Arc::new(CircuitBreaker::new(
                    kind.as_str(),
                    config.circuit_failure_threshold,
                    recovery,
                )),
            );
        }

        let local_breaker = Arc::clone(
            breakers
                .get(&ProviderKind::Local)
                .ok_or_else(|| AppError::InternalError("Local breaker missing".into()))?,
        );
        let local: Arc<dyn LlmProvider> =
            Arc::new(LocalProvider::new(&config.model_server_url, local_breaker)?);

        Ok(Self {
            config: config.clone(),
            local,
            breakers,
        })
    }

    pub fn local(&self) -> Arc<dyn LlmProvider> {
        Arc::clone(&self.local)
    }

    pub fn breaker(&self, kind: ProviderKind) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(&kind).map(Arc::clone)
    }

    /// Manual breaker reset, used by operators after fixing a backend.
    pub fn reset_breaker(&self, kind: ProviderKind) {
        if let Some(breaker) = self.breakers.get(&kind) {
            breaker.reset();
        }
    }

    /// The API key for a cloud provider: the user's sealed key when one is
    /// stored, otherwise the process-wide configured key.
    async fn api_key_for(
        &self,
        kind: ProviderKind,
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<String, AppError> {
        if let Some(stored) = UserApiKey::get_for_user(user_id, kind.as_str(), db).await? {
            return credentials::unseal(
                &stored.sealed_key,
                &stored.nonce,
                &self.config.credential_encryption_key,
            );
        }

        let configured = match kind {
            ProviderKind::Anthropic => &self.config.anthropic_api_key,
            ProviderKind::OpenAi => &self.config.openai_api_key,
            ProviderKind::Custom => &self.config.custom_api_key,
            ProviderKind::Local => return Ok(String::new()),
        };
        if configured.is_empty() {
            return Err(AppError::Validation(format!(
                "No API key configured for provider '{kind}'"
            )));
        }
        Ok(configured.clone())
    }

    /// Build the provider instance that will serve one request.
    pub async fn resolve(
        &self,
        kind: ProviderKind,
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Arc<dyn LlmProvider>, AppError> {
        let breaker = self
            .breaker(kind)
            .ok_or_else(|| AppError::InternalError(format!("No breaker for provider '{kind}'")))?;

        match kind {
            ProviderKind::Local => Ok(self.local()),
            ProviderKind::Anthropic => {
                let api_key = self.api_key_for(kind, user_id, db).await?;
                Ok(Arc::new(AnthropicProvider::new(&api_key, breaker)?))
            }
            ProviderKind::OpenAi => {
                let api_key = self.api_key_for(kind, user_id, db).await?;
                Ok(Arc::new(OpenAiProvider::new(
                    &api_key,
                    &self.config.openai_base_url,
                    kind,
                    breaker,
                )))
            }
            ProviderKind::Custom => {
                let api_key = self.api_key_for(kind, user_id, db).await?;
                let base_url = self.config.custom_base_url.as_deref().ok_or_else(|| {
                    AppError::Validation("custom_base_url is not configured".into())
                })?;
                Ok(Arc::new(OpenAiProvider::new(
                    &api_key, base_url, kind, breaker,
                )))
            }
        }
    }

    /// Non-streaming generation with transparent local fallback.
    ///
    /// Returns the response plus whether a fallback happened. The response's
    /// `provider` field always names the backend that actually produced the
    /// tokens, which is the one usage accounting bills.
    pub async fn generate_with_fallback(
        &self,
        kind: ProviderKind,
        request: GenerationRequest,
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(LlmResponse, bool), AppError> {
        if kind == ProviderKind::Local {
            let response = self.local.generate(request).await?;
            return Ok((response, false));
        }

        match self.resolve(kind, user_id, db).await {
            Ok(provider) => match provider.generate(request.clone()).await {
                Ok(response) => Ok((response, false)),
                Err(err) => {
                    warn!(provider = %kind, error = %err, "Cloud generation failed, falling back to local");
                    let mut fallback_request = request;
                    fallback_request.model = self.config.default_text_model.clone();
                    let response = self.local.generate(fallback_request).await?;
                    Ok((response, true))
                }
            },
            Err(err) => {
                warn!(provider = %kind, error = %err, "Cloud provider unavailable, falling back to local");
                let mut fallback_request = request;
                fallback_request.model = self.config.default_text_model.clone();
                let response = self.local.generate(fallback_request).await?;
                Ok((response, true))
            }
        }
    }

    /// Streaming generation with transparent local fallback on stream
    /// creation failure. A failure mid-stream is reported in-band as an
    /// error chunk instead.
    pub async fn stream_with_fallback(
        &self,
        kind: ProviderKind,
        request: GenerationRequest,
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(LlmTokenStream, ProviderKind, bool), AppError> {
        if kind == ProviderKind::Local {
            let stream = self.local.stream(request).await?;
            return Ok((stream, ProviderKind::Local, false));
        }

        let cloud_attempt = match self.resolve(kind, user_id, db).await {
            Ok(provider) => provider.stream(request.clone()).await,
            Err(err) => Err(err),
        };

        match cloud_attempt {
            Ok(stream) => Ok((stream, kind, false)),
            Err(err) => {
                info!(provider = %kind, error = %err, "Cloud stream failed, serving from local model");
                let mut fallback_request = request;
                fallback_request.model = self.config.default_text_model.clone();
                let stream = self.local.stream(fallback_request).await?;
                Ok((stream, ProviderKind::Local, true))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn registry() -> ProviderRegistry {
        ProviderRegistry::from_config(&AppConfig::default()).expect("registry")
    }

    #[tokio::test]
    async fn test_resolve_local_is_always_available() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("db");
        let registry = registry();
        let provider = registry
            .resolve(ProviderKind::Local, "user1", &db)
            .await
            .expect("local resolves");
        assert_eq!(provider.kind(), ProviderKind::Local);
    }

    #[tokio::test]
    async fn test_resolve_cloud_without_key_is_validation_error() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("db");
        let registry = registry();
        let result = registry.resolve(ProviderKind::Anthropic, "user1", &db).await;
        match result {
            Err(err) => assert!(matches!(err, AppError::Validation(_))),
            Ok(_) => panic!("no key configured"),
        }
    }

    #[tokio::test]
    async fn test_resolve_prefers_user_sealed_key() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("db");
        let config = AppConfig::default();
        let registry = ProviderRegistry::from_config(&config).expect("registry");

        let (sealed, nonce) = credentials::seal("sk-user-key", &config.credential_encryption_key)
            .expect("seal key");
        UserApiKey::new("user1".into(), "anthropic".into(), sealed, nonce)
            .store_replacing(&db)
            .await
            .expect("store key");

        let provider = registry
            .resolve(ProviderKind::Anthropic, "user1", &db)
            .await
            .expect("resolves with user key");
        assert_eq!(provider.kind(), ProviderKind::Anthropic);
    }

    #[test]
    fn test_each_kind_has_its_own_breaker() {
        let registry = registry();
        let local = registry.breaker(ProviderKind::Local).expect("local breaker");
        let cloud = registry
            .breaker(ProviderKind::Anthropic)
            .expect("anthropic breaker");
        local.record_failure();
        assert_eq!(local.failure_count(), 1);
        assert_eq!(cloud.failure_count(), 0);
    }
}
