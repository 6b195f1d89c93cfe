use tracing::{error, info, instrument, warn};

use brain_pipeline::{
    builder::BrainBuilder,
    incremental::{incremental_update, mark_brain_stale},
    memory::evolve_memory,
    summarizer::{should_update_summary, update_conversation_summary},
};
use common::{
    error::AppError,
    storage::types::{
        background_task::{BackgroundTask, NoteChange, TaskPayload},
        brain_build_log::{BrainBuildLog, BuildStatus},
        brain_conversation::BrainConversation,
    },
};

use crate::EnrichmentPipeline;

fn builder_for(pipeline: &EnrichmentPipeline) -> BrainBuilder {
    BrainBuilder::new(
        std::sync::Arc::clone(&pipeline.db),
        pipeline.registry.local(),
        std::sync::Arc::clone(&pipeline.embedder),
        pipeline.config.brain_model.clone(),
        pipeline.config.brain_temperature,
    )
}

/// Full or partial brain rebuild, with a persistent build log.
#[instrument(skip(pipeline), fields(user_id, build_type))]
pub async fn build(
    pipeline: &EnrichmentPipeline,
    user_id: &str,
    build_type: &str,
) -> Result<(), AppError> {
    let build_log = BrainBuildLog::start(user_id.to_owned(), build_type.to_owned());
    pipeline.db.store_item(build_log.clone()).await?;

    let builder = builder_for(pipeline);
    match builder.build(user_id, &build_log).await {
        Ok(()) => Ok(()),
        Err(err) => {
            error!(error = %err, "Brain build failed");
            BrainBuildLog::finish(
                &build_log.id,
                BuildStatus::Failed,
                Some(err.to_string()),
                &pipeline.db,
            )
            .await?;
            Err(err)
        }
    }
}

/// Incremental topic update; any failure degrades to the mark-stale
/// fallback so the brain stays eventually consistent.
#[instrument(skip(pipeline), fields(user_id, note_id, change = ?change))]
pub async fn incremental(
    pipeline: &EnrichmentPipeline,
    user_id: &str,
    note_id: &str,
    change: NoteChange,
) -> Result<(), AppError> {
    let builder = builder_for(pipeline);
    match incremental_update(&builder, user_id, note_id, change).await {
        Ok(report) => {
            info!(status = report.status, topics = ?report.topics_updated, "Incremental update done");
            Ok(())
        }
        Err(err) => {
            warn!(error = %err, "Incremental update failed, falling back to stale marking");
            BackgroundTask::enqueue(
                TaskPayload::BrainMarkStale {
                    note_id: Some(note_id.to_owned()),
                },
                user_id,
                &pipeline.db,
            )
            .await?;
            Ok(())
        }
    }
}

pub async fn mark_stale(
    pipeline: &EnrichmentPipeline,
    user_id: &str,
    note_id: Option<&str>,
) -> Result<(), AppError> {
    mark_brain_stale(&pipeline.db, user_id, note_id).await
}

/// Post-conversation memory evolution.
pub async fn memory_evolve(
    pipeline: &EnrichmentPipeline,
    user_id: &str,
    conversation_id: &str,
) -> Result<(), AppError> {
    let provider = pipeline.registry.local();
    evolve_memory(
        &pipeline.db,
        &provider,
        &pipeline.config.brain_model,
        user_id,
        conversation_id,
        pipeline.config.max_memory_chars,
    )
    .await?;
    Ok(())
}

/// Rolling conversation summary update.
pub async fn conversation_summary(
    pipeline: &EnrichmentPipeline,
    conversation_id: &str,
) -> Result<(), AppError> {
    let conversation: Option<BrainConversation> =
        pipeline.db.get_item(conversation_id).await?;
    let Some(conversation) = conversation else {
        return Err(AppError::NotFound(format!(
            "Brain conversation {conversation_id} not found"
        )));
    };

    if should_update_summary(&conversation) {
        let provider = pipeline.registry.local();
        update_conversation_summary(
            &pipeline.db,
            &provider,
            &pipeline.config.brain_model,
            &conversation,
        )
        .await?;
    }
    Ok(())
}
