use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use url::Url;

#[derive(Clone, Deserialize, Debug)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Local model server speaking the /api/embeddings protocol.
    ModelServer,
    /// OpenAI-compatible embeddings endpoint.
    OpenAi,
}

fn default_embedding_backend() -> EmbeddingBackend {
    EmbeddingBackend::ModelServer
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default = "default_model_server_url")]
    pub model_server_url: String,
    #[serde(default = "default_text_model")]
    pub default_text_model: String,
    #[serde(default = "default_context_length")]
    pub default_context_length: u32,
    #[serde(default = "default_brain_model")]
    pub brain_model: String,
    #[serde(default = "default_temperature")]
    pub rag_temperature: f32,
    #[serde(default = "default_temperature")]
    pub brain_temperature: f32,
    #[serde(default = "default_rag_context_budget")]
    pub rag_context_budget: usize,
    #[serde(default = "default_brain_context_budget")]
    pub brain_context_budget: usize,

    #[serde(default = "default_embedding_backend")]
    pub embedding_backend: EmbeddingBackend,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    #[serde(default = "default_max_embedding_chars")]
    pub max_embedding_chars: usize,

    #[serde(default = "default_semantic_edge_threshold")]
    pub semantic_edge_threshold: f32,
    #[serde(default = "default_missing_link_threshold")]
    pub missing_link_threshold: f32,

    #[serde(default = "default_circuit_failure_threshold")]
    pub circuit_failure_threshold: u32,
    #[serde(default = "default_circuit_recovery_secs")]
    pub circuit_recovery_secs: u64,

    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,
    #[serde(default)]
    pub anthropic_api_key: String,
    #[serde(default)]
    pub custom_api_key: String,
    #[serde(default)]
    pub custom_base_url: Option<String>,
    #[serde(default = "default_encryption_key")]
    pub credential_encryption_key: String,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    #[serde(default = "default_max_memory_chars")]
    pub max_memory_chars: usize,
    #[serde(default = "default_stuck_task_interval_secs")]
    pub stuck_task_interval_secs: u64,
    #[serde(default = "default_stuck_task_threshold_secs")]
    pub stuck_task_threshold_secs: u64,
    #[serde(default)]
    pub consolidation_interval_secs: Option<u64>,
}

fn default_http_port() -> u16 {
    3000
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_model_server_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_text_model() -> String {
    "llama3.2:3b".to_string()
}

fn default_context_length() -> u32 {
    8192
}

fn default_brain_model() -> String {
    "llama3.2:3b".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_rag_context_budget() -> usize {
    8000
}

fn default_brain_context_budget() -> usize {
    6000
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_embedding_dimensions() -> u32 {
    768
}

fn default_max_embedding_chars() -> usize {
    2000
}

fn default_semantic_edge_threshold() -> f32 {
    0.7
}

fn default_missing_link_threshold() -> f32 {
    0.75
}

fn default_circuit_failure_threshold() -> u32 {
    3
}

fn default_circuit_recovery_secs() -> u64 {
    30
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_encryption_key() -> String {
    "change-me".to_string()
}

fn default_max_upload_bytes() -> u64 {
    52_428_800
}

fn default_max_memory_chars() -> usize {
    3000
}

fn default_stuck_task_interval_secs() -> u64 {
    900
}

fn default_stuck_task_threshold_secs() -> u64 {
    600
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;
    validate(&app_config)?;
    Ok(app_config)
}

/// Reject configurations that would only fail later at request time.
fn validate(config: &AppConfig) -> Result<(), ConfigError> {
    Url::parse(&config.model_server_url).map_err(|e| {
        ConfigError::Message(format!(
            "model_server_url '{}' is not a valid URL: {e}",
            config.model_server_url
        ))
    })?;
    Url::parse(&config.openai_base_url).map_err(|e| {
        ConfigError::Message(format!(
            "openai_base_url '{}' is not a valid URL: {e}",
            config.openai_base_url
        ))
    })?;

    if config.embedding_dimensions == 0 {
        return Err(ConfigError::Message(
            "embedding_dimensions must be positive".into(),
        ));
    }
    if config.max_embedding_chars == 0 {
        return Err(ConfigError::Message(
            "max_embedding_chars must be positive".into(),
        ));
    }
    if !(0.0..=1.0).contains(&config.semantic_edge_threshold) {
        return Err(ConfigError::Message(
            "semantic_edge_threshold must be within [0, 1]".into(),
        ));
    }
    if !(0.0..=1.0).contains(&config.missing_link_threshold) {
        return Err(ConfigError::Message(
            "missing_link_threshold must be within [0, 1]".into(),
        ));
    }
    if config.circuit_failure_threshold == 0 {
        return Err(ConfigError::Message(
            "circuit_failure_threshold must be positive".into(),
        ));
    }
    if config.credential_encryption_key.is_empty() {
        return Err(ConfigError::Message(
            "credential_encryption_key cannot be empty".into(),
        ));
    }

    Ok(())
}

#[cfg(any(test, feature = "test-utils"))]
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            surrealdb_address: "mem://".into(),
            surrealdb_username: "root".into(),
            surrealdb_password: "root".into(),
            surrealdb_namespace: "test".into(),
            surrealdb_database: "test".into(),
            http_port: default_http_port(),
            data_dir: default_data_dir(),
            // Nothing listens on the discard port; tests that reach for
            // the model server fail fast instead of finding a real one.
            model_server_url: "http://127.0.0.1:9".into(),
            default_text_model: default_text_model(),
            default_context_length: default_context_length(),
            brain_model: default_brain_model(),
            rag_temperature: default_temperature(),
            brain_temperature: default_temperature(),
            rag_context_budget: default_rag_context_budget(),
            brain_context_budget: default_brain_context_budget(),
            embedding_backend: default_embedding_backend(),
            embedding_model: default_embedding_model(),
            embedding_dimensions: default_embedding_dimensions(),
            max_embedding_chars: default_max_embedding_chars(),
            semantic_edge_threshold: default_semantic_edge_threshold(),
            missing_link_threshold: default_missing_link_threshold(),
            circuit_failure_threshold: default_circuit_failure_threshold(),
            circuit_recovery_secs: default_circuit_recovery_secs(),
            openai_api_key: String::new(),
            openai_base_url: default_openai_base_url(),
            anthropic_api_key: String::new(),
            custom_api_key: String::new(),
            custom_base_url: None,
            credential_encryption_key: default_encryption_key(),
            max_upload_bytes: default_max_upload_bytes(),
            max_memory_chars: default_max_memory_chars(),
            stuck_task_interval_secs: default_stuck_task_interval_secs(),
            stuck_task_threshold_secs: default_stuck_task_threshold_secs(),
            consolidation_interval_secs: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_bad_url() {
        let mut config = AppConfig::default();
        config.model_server_url = "not a url".into();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_threshold() {
        let mut config = AppConfig::default();
        config.semantic_edge_threshold = 1.5;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_validate_accepts_defaults() {
        let config = AppConfig::default();
        assert!(validate(&config).is_ok());
    }
}
