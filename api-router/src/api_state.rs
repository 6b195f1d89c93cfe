use std::sync::Arc;

use brain_pipeline::BrainPipeline;
use common::{
    llm::registry::ProviderRegistry,
    storage::db::SurrealDbClient,
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};
use nexus_pipeline::NexusPipeline;

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
    pub nexus: Arc<NexusPipeline>,
    pub brain: Arc<BrainPipeline>,
}

impl ApiState {
    pub fn new(
        db: Arc<SurrealDbClient>,
        registry: Arc<ProviderRegistry>,
        embedder: Arc<EmbeddingProvider>,
        config: AppConfig,
    ) -> Self {
        let nexus = Arc::new(NexusPipeline::new(
            Arc::clone(&db),
            Arc::clone(&registry),
            Arc::clone(&embedder),
            config.clone(),
        ));
        let brain = Arc::new(BrainPipeline::new(
            Arc::clone(&db),
            registry,
            embedder,
            config.clone(),
        ));

        Self {
            db,
            config,
            nexus,
            brain,
        }
    }
}
