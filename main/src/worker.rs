use std::sync::Arc;

use common::{
    llm::registry::ProviderRegistry,
    storage::db::SurrealDbClient,
    utils::{config::get_config, embedding::EmbeddingProvider},
};
use enrichment_pipeline::{run_worker_loop, EnrichmentPipeline};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );
    db.ensure_initialized(config.embedding_dimensions as usize)
        .await?;

    let registry = Arc::new(ProviderRegistry::from_config(&config)?);
    let embedder = Arc::new(EmbeddingProvider::from_config(&config, None)?);

    let pipeline = Arc::new(EnrichmentPipeline::new(
        Arc::clone(&db),
        registry,
        embedder,
        config,
    )?);

    run_worker_loop(db, pipeline).await
}
