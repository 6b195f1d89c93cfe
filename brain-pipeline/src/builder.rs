use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use common::{
    error::AppError,
    llm::LlmProvider,
    storage::{
        db::SurrealDbClient,
        types::{
            brain_build_log::{BrainBuildLog, BuildStatus},
            brain_file::{BrainFile, BrainFileKind},
            note::Note,
        },
    },
    utils::embedding::EmbeddingProvider,
};
use consolidation_pipeline::communities;

use crate::{
    content_hash,
    core_files::{
        default_memory, default_soul, generate_askimap, generate_overview, generate_user_profile,
    },
    topics::{compress_topic, generate_topic, NoteInput, TopicDraft},
};

const MIN_NOTES: usize = 3;

/// Dependencies a brain build needs, bundled for reuse by the
/// incremental updater.
pub struct BrainBuilder {
    pub db: Arc<SurrealDbClient>,
    pub provider: Arc<dyn LlmProvider>,
    pub embedder: Arc<EmbeddingProvider>,
    pub model: String,
    pub temperature: f32,
}

impl BrainBuilder {
    pub fn new(
        db: Arc<SurrealDbClient>,
        provider: Arc<dyn LlmProvider>,
        embedder: Arc<EmbeddingProvider>,
        model: String,
        temperature: f32,
    ) -> Self {
        Self {
            db,
            provider,
            embedder,
            model,
            temperature,
        }
    }

    pub async fn build(&self, user_id: &str, build_log: &BrainBuildLog) -> Result<(), AppError> {
        build_brain(
            &self.db,
            &self.provider,
            &self.embedder,
            &self.model,
            self.temperature,
            user_id,
            build_log,
        )
        .await
    }
}

/// Full brain build: collect, cluster, group, synthesize, compress,
/// generate core files, persist. Progress lands on the build log after
/// every stage.
#[instrument(skip_all, fields(user_id, build_id = %build_log.id))]
#[allow(clippy::too_many_lines)]
pub async fn build_brain(
    db: &Arc<SurrealDbClient>,
    provider: &Arc<dyn LlmProvider>,
    embedder: &Arc<EmbeddingProvider>,
    model: &str,
    temperature: f32,
    user_id: &str,
    build_log: &BrainBuildLog,
) -> Result<(), AppError> {
    BrainBuildLog::update_progress(&build_log.id, 5, "Collecting notes", db).await?;
    let notes = Note::live_for_user(user_id, db).await?;

    if notes.len() < MIN_NOTES {
        BrainBuildLog::finish(
            &build_log.id,
            BuildStatus::Failed,
            Some(format!(
                "Need at least {MIN_NOTES} notes (found {})",
                notes.len()
            )),
            db,
        )
        .await?;
        return Ok(());
    }

    // Community detection; a graph too small to cluster is not fatal
    BrainBuildLog::update_progress(&build_log.id, 15, "Detecting communities", db).await?;
    match communities::refresh_communities(db, user_id).await {
        Ok(_) => {}
        Err(AppError::Clustering(reason)) => {
            warn!(reason, "Community detection skipped");
        }
        Err(err) => return Err(err),
    }
    // Re-fetch with updated community assignments
    let notes = Note::live_for_user(user_id, db).await?;

    BrainBuildLog::update_progress(&build_log.id, 25, "Grouping notes by topic", db).await?;
    let groups = group_notes_by_community(&notes);
    let community_count = groups.len();

    BrainBuildLog::update_progress(&build_log.id, 30, "Generating topic files", db).await?;
    let mut drafts: Vec<TopicDraft> = Vec::new();
    let total_groups = groups.len().max(1);
    for (position, (community_id, group)) in groups.into_iter().enumerate() {
        let pct = 30 + ((position * 30) / total_groups) as u8;
        BrainBuildLog::update_progress(
            &build_log.id,
            pct,
            &format!("Generating topic {}", drafts.len() + 1),
            db,
        )
        .await?;

        if let Some(draft) = generate_topic(
            provider,
            model,
            temperature,
            community_id,
            drafts.len(),
            &group,
        )
        .await
        {
            drafts.push(draft);
        }
    }

    BrainBuildLog::update_progress(&build_log.id, 60, "Compressing topics", db).await?;
    for draft in &mut drafts {
        compress_topic(provider, model, temperature, draft).await;
    }

    BrainBuildLog::update_progress(&build_log.id, 65, "Generating askimap", db).await?;
    let askimap = generate_askimap(provider, model, temperature, user_id, &drafts).await;

    BrainBuildLog::update_progress(&build_log.id, 70, "Generating knowledge map", db).await?;
    let overview = generate_overview(
        provider,
        model,
        temperature,
        user_id,
        &drafts,
        notes.len(),
        community_count,
    )
    .await;

    BrainBuildLog::update_progress(&build_log.id, 75, "Generating user profile", db).await?;
    let sample: Vec<NoteInput> = notes.iter().take(15).map(NoteInput::from).collect();
    let profile =
        generate_user_profile(provider, model, temperature, user_id, &drafts, &sample).await;

    BrainBuildLog::update_progress(&build_log.id, 85, "Saving brain files", db).await?;
    let mut total_tokens = 0u32;
    let mut topic_keys: Vec<String> = Vec::new();
    for draft in &drafts {
        total_tokens += draft.token_count_approx;
        topic_keys.push(draft.file_key.clone());
        let file = draft_to_file(user_id, draft, embedder).await;
        BrainFile::upsert(file, db).await?;
    }
    for core in [askimap, overview, profile] {
        total_tokens += core.token_count_approx;
        BrainFile::upsert(core, db).await?;
    }

    // soul and memory are created once and never clobbered: upsert leaves
    // user-edited cores alone, and memory only materializes when absent
    if BrainFile::get_by_key(user_id, "soul", db).await?.is_none() {
        BrainFile::upsert(default_soul(user_id), db).await?;
    }
    if BrainFile::get_by_key(user_id, "memory", db).await?.is_none() {
        BrainFile::upsert(default_memory(user_id), db).await?;
    }

    BrainBuildLog::update_progress(&build_log.id, 95, "Cleaning up old topics", db).await?;
    BrainFile::delete_topics_not_in(user_id, &topic_keys, db).await?;
    BrainFile::clear_stale_flags(user_id, db).await?;

    BrainBuildLog::set_counts(
        &build_log.id,
        notes.len() as u32,
        community_count as u32,
        drafts.len() as u32,
        total_tokens,
        db,
    )
    .await?;
    BrainBuildLog::update_progress(&build_log.id, 100, "Complete", db).await?;
    BrainBuildLog::finish(&build_log.id, BuildStatus::Completed, None, db).await?;

    info!(
        topics = drafts.len(),
        tokens = total_tokens,
        "Brain build complete"
    );
    Ok(())
}

/// Bucket notes by community; orphans (community -1 or unassigned)
/// cluster together.
pub fn group_notes_by_community(notes: &[Note]) -> BTreeMap<i64, Vec<NoteInput>> {
    let mut groups: BTreeMap<i64, Vec<NoteInput>> = BTreeMap::new();
    for note in notes {
        let community = note.community_id.unwrap_or(-1);
        groups.entry(community).or_default().push(NoteInput::from(note));
    }
    groups
}

/// Materialize a draft as a `BrainFile`, attaching an embedding of the
/// first ~2000 chars when the embedder is reachable.
pub async fn draft_to_file(
    user_id: &str,
    draft: &TopicDraft,
    embedder: &Arc<EmbeddingProvider>,
) -> BrainFile {
    let mut file = BrainFile::new(
        user_id.to_owned(),
        draft.file_key.clone(),
        BrainFileKind::Topic,
        draft.title.clone(),
        draft.content.clone(),
        content_hash(&draft.content),
        draft.token_count_approx,
    );
    file.compressed_content = draft.compressed_content.clone();
    file.compressed_token_count = draft.compressed_token_count;
    file.community_id = Some(draft.community_id);
    file.topic_keywords = draft.keywords.clone();
    file.source_note_ids = draft.source_note_ids.clone();

    let head: String = draft.content.chars().take(2000).collect();
    match embedder.embed(&head).await {
        Ok(embedding) => file.embedding = Some(embedding),
        Err(err) => warn!(error = %err, file_key = %draft.file_key, "Topic embedding skipped"),
    }

    file
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::note::NoteOrigin;

    #[test]
    fn test_grouping_buckets_orphans_together() {
        let mut a = Note::new("u".into(), "A".into(), String::new(), NoteOrigin::Manual);
        a.community_id = Some(0);
        let mut b = Note::new("u".into(), "B".into(), String::new(), NoteOrigin::Manual);
        b.community_id = Some(0);
        let mut orphan1 = Note::new("u".into(), "O1".into(), String::new(), NoteOrigin::Manual);
        orphan1.community_id = Some(-1);
        let orphan2 = Note::new("u".into(), "O2".into(), String::new(), NoteOrigin::Manual);

        let groups = group_notes_by_community(&[a, b, orphan1, orphan2]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[&0].len(), 2);
        assert_eq!(groups[&-1].len(), 2);
    }
}
