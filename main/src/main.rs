use api_router::{api_routes_v1, api_state::ApiState};
use axum::{extract::FromRef, Router};
use common::{
    llm::registry::ProviderRegistry,
    storage::db::SurrealDbClient,
    utils::{config::get_config, embedding::EmbeddingProvider},
};
use enrichment_pipeline::{recovery::recover_stuck_entities, run_worker_loop, EnrichmentPipeline};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use common::storage::types::background_task::{BackgroundTask, TaskPayload, TaskStatus};
use common::storage::types::user::User;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    // Invalid configuration fails here, loudly, before anything starts
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
    info!(
        embedding_dimensions = embedder.dimensions(),
        model_server = %config.model_server_url,
        "Providers initialized"
    );

    let api_state = ApiState::new(
        Arc::clone(&db),
        Arc::clone(&registry),
        Arc::clone(&embedder),
        config.clone(),
    );

    let app = Router::new()
        .nest("/api/v1", api_routes_v1(&api_state))
        .with_state(AppState { api_state });

    info!("Starting server listening on 0.0.0.0:{}", config.http_port);
    let serve_address = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Server error: {}", e);
        }
    });

    // Background worker over the durable task queue
    let pipeline = Arc::new(EnrichmentPipeline::new(
        Arc::clone(&db),
        Arc::clone(&registry),
        Arc::clone(&embedder),
        config.clone(),
    )?);
    let worker_db = Arc::clone(&db);
    let worker = tokio::spawn(async move {
        info!("Starting worker process");
        if let Err(e) = run_worker_loop(worker_db, pipeline).await {
            error!("Worker process error: {}", e);
        }
    });

    // Stuck-task recovery on a fixed cadence
    let recovery_db = Arc::clone(&db);
    let recovery_interval = Duration::from_secs(config.stuck_task_interval_secs);
    let stuck_threshold = chrono::Duration::seconds(config.stuck_task_threshold_secs as i64);
    let recovery = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(recovery_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = recover_stuck_entities(&recovery_db, stuck_threshold).await {
                error!("Stuck-task recovery error: {}", e);
            }
        }
    });

    // Optional scheduled consolidation for every user
    let consolidation = config.consolidation_interval_secs.map(|secs| {
        let db = Arc::clone(&db);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(secs));
            loop {
                ticker.tick().await;
                if let Err(e) = enqueue_consolidation_for_all(&db).await {
                    error!("Consolidation scheduling error: {}", e);
                }
            }
        })
    });

    server.await?;
    worker.abort();
    recovery.abort();
    if let Some(handle) = consolidation {
        handle.abort();
    }

    Ok(())
}

/// Enqueue one consolidation task per user, skipping users that already
/// have one pending.
async fn enqueue_consolidation_for_all(
    db: &SurrealDbClient,
) -> Result<(), common::error::AppError> {
    let users: Vec<User> = db.get_all_stored_items().await?;
    for user in users {
        let mut response = db
            .query(
                "SELECT VALUE record::id(id) FROM background_task WHERE user_id = $user_id AND \
                 payload.kind = 'consolidation' AND \
                 (status = $pending OR status = $processing) LIMIT 1",
            )
            .bind(("user_id", user.id.clone()))
            .bind(("pending", TaskStatus::Pending))
            .bind(("processing", TaskStatus::Processing))
            .await?;
        let existing: Vec<String> = response.take(0)?;
        if existing.is_empty() {
            BackgroundTask::enqueue(TaskPayload::Consolidation, &user.id, db).await?;
        }
    }
    Ok(())
}

#[derive(Clone, FromRef)]
struct AppState {
    api_state: ApiState,
}
