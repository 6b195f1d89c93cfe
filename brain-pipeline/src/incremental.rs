use std::collections::HashSet;

use tracing::{info, instrument, warn};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            background_task::NoteChange,
            brain_file::{BrainFile, BrainFileKind},
            note::Note,
        },
    },
};

use crate::{
    builder::{draft_to_file, BrainBuilder},
    content_hash,
    core_files::generate_overview,
    estimate_tokens,
    topics::{compress_topic, generate_topic, NoteInput, TopicDraft},
};

/// Keyword-overlap bar for folding a new note into an existing topic.
const MATCH_THRESHOLD: f32 = 0.3;
/// Single-note topics tolerated before a full rebuild is recommended.
const MICRO_TOPIC_LIMIT: usize = 5;

#[derive(Debug, Clone)]
pub struct IncrementalReport {
    pub status: &'static str,
    pub topics_updated: Vec<String>,
}

/// Map one note change onto the minimal set of topic regenerations.
#[instrument(skip_all, fields(user_id, note_id, change = ?change))]
pub async fn incremental_update(
    builder: &BrainBuilder,
    user_id: &str,
    note_id: &str,
    change: NoteChange,
) -> Result<IncrementalReport, AppError> {
    let topics = BrainFile::topics_for_user(user_id, &builder.db).await?;
    if topics.is_empty() {
        info!("No brain topics yet, incremental update skipped");
        return Ok(IncrementalReport {
            status: "skipped",
            topics_updated: Vec::new(),
        });
    }

    let affected: Vec<BrainFile> = topics
        .iter()
        .filter(|topic| topic.source_note_ids.iter().any(|id| id == note_id))
        .cloned()
        .collect();

    let updated = match change {
        NoteChange::Created => handle_created(builder, user_id, note_id, affected, &topics).await?,
        NoteChange::Updated => {
            let mut updated = Vec::new();
            for topic in affected {
                if regenerate_topic(builder, user_id, &topic).await? {
                    updated.push(topic.file_key);
                }
            }
            updated
        }
        NoteChange::Deleted => handle_deleted(builder, user_id, note_id, affected).await?,
    };

    if !updated.is_empty() {
        update_master_map(builder, user_id).await?;
        check_rebuild_recommendation(&builder.db, user_id).await?;
    }

    Ok(IncrementalReport {
        status: "updated",
        topics_updated: updated,
    })
}

async fn handle_created(
    builder: &BrainBuilder,
    user_id: &str,
    note_id: &str,
    mut affected: Vec<BrainFile>,
    topics: &[BrainFile],
) -> Result<Vec<String>, AppError> {
    if affected.is_empty() {
        let Some(note) = load_live_note(&builder.db, user_id, note_id).await? else {
            return Ok(Vec::new());
        };

        match find_best_matching_topic(&note, topics) {
            Some(best) => {
                add_note_to_topic(&builder.db, best, note_id).await?;
                let mut refreshed = best.clone();
                refreshed.source_note_ids.push(note_id.to_owned());
                affected = vec![refreshed];
            }
            None => {
                create_micro_topic(builder, user_id, &note).await?;
                return Ok(vec!["micro_topic_created".to_owned()]);
            }
        }
    }

    let mut updated = Vec::new();
    for topic in affected {
        if regenerate_topic(builder, user_id, &topic).await? {
            updated.push(topic.file_key);
        }
    }
    Ok(updated)
}

async fn handle_deleted(
    builder: &BrainBuilder,
    user_id: &str,
    note_id: &str,
    affected: Vec<BrainFile>,
) -> Result<Vec<String>, AppError> {
    let mut updated = Vec::new();
    for mut topic in affected {
        topic.source_note_ids.retain(|id| id != note_id);

        if topic.source_note_ids.is_empty() {
            builder.db.delete_item::<BrainFile>(&topic.id).await?;
            updated.push(format!("{}_deleted", topic.file_key));
            continue;
        }

        remove_note_from_topic(&builder.db, &topic, note_id).await?;
        if regenerate_topic(builder, user_id, &topic).await? {
            updated.push(topic.file_key);
        }
    }
    Ok(updated)
}

async fn load_live_note(
    db: &SurrealDbClient,
    user_id: &str,
    note_id: &str,
) -> Result<Option<NoteInput>, AppError> {
    let note: Option<Note> = db.get_item(note_id).await?;
    Ok(note
        .filter(|note| note.user_id == user_id && !note.is_trashed)
        .map(|note| NoteInput::from(&note)))
}

/// The existing topic whose keywords best overlap the note, if any clears
/// the threshold.
fn find_best_matching_topic<'a>(
    note: &NoteInput,
    topics: &'a [BrainFile],
) -> Option<&'a BrainFile> {
    let head: String = note.content.chars().take(300).collect();
    let text = format!("{} {head}", note.title).to_lowercase();
    let note_words: HashSet<String> = text
        .split_whitespace()
        .map(|word| {
            word.trim_matches(|c: char| !c.is_alphanumeric())
                .to_owned()
        })
        .filter(|word| word.len() > 2)
        .collect();

    let mut best: Option<(&BrainFile, f32)> = None;
    for topic in topics {
        if topic.topic_keywords.is_empty() {
            continue;
        }
        let keywords: HashSet<String> = topic
            .topic_keywords
            .iter()
            .map(|keyword| keyword.to_lowercase())
            .collect();
        let mut score =
            note_words.intersection(&keywords).count() as f32 / keywords.len().max(1) as f32;

        let title_words: HashSet<String> = topic
            .title
            .to_lowercase()
            .split_whitespace()
            .map(str::to_owned)
            .collect();
        score += note_words.intersection(&title_words).count() as f32 * 0.3;

        let better = match best {
            Some((_, best_score)) => score > best_score,
            None => true,
        };
        if better {
            best = Some((topic, score));
        }
    }

    best.filter(|(_, score)| *score >= MATCH_THRESHOLD)
        .map(|(topic, _)| topic)
}

async fn add_note_to_topic(
    db: &SurrealDbClient,
    topic: &BrainFile,
    note_id: &str,
) -> Result<(), AppError> {
    if topic.source_note_ids.iter().any(|id| id == note_id) {
        return Ok(());
    }
    db.client
        .query(
            "UPDATE type::thing('brain_file', $id) SET \
             source_note_ids += $note_id, updated_at = time::now()",
        )
        .bind(("id", topic.id.clone()))
        .bind(("note_id", note_id.to_owned()))
        .await?;
    Ok(())
}

async fn remove_note_from_topic(
    db: &SurrealDbClient,
    topic: &BrainFile,
    note_id: &str,
) -> Result<(), AppError> {
    db.client
        .query(
            "UPDATE type::thing('brain_file', $id) SET \
             source_note_ids -= $note_id, updated_at = time::now()",
        )
        .bind(("id", topic.id.clone()))
        .bind(("note_id", note_id.to_owned()))
        .await?;
    Ok(())
}

/// Regenerate one topic from its current live source notes. A failing
/// generation marks the topic stale instead of deleting anything.
pub async fn regenerate_topic(
    builder: &BrainBuilder,
    user_id: &str,
    topic: &BrainFile,
) -> Result<bool, AppError> {
    if topic.source_note_ids.is_empty() {
        return Ok(false);
    }

    let things: Vec<surrealdb::sql::Thing> = topic
        .source_note_ids
        .iter()
        .map(|id| surrealdb::sql::Thing::from(("note", id.as_str())))
        .collect();
    let mut response = builder
        .db
        .query(
            "SELECT * FROM note WHERE id IN $things AND user_id = $user_id \
             AND is_trashed = false",
        )
        .bind(("things", things))
        .bind(("user_id", user_id.to_owned()))
        .await?;
    let notes: Vec<Note> = response.take(0)?;
    if notes.is_empty() {
        return Ok(false);
    }

    let inputs: Vec<NoteInput> = notes.iter().map(NoteInput::from).collect();
    let topic_index = topic_index_of(&topic.file_key);

    let Some(mut draft) = generate_topic(
        &builder.provider,
        &builder.model,
        builder.temperature,
        topic.community_id.unwrap_or(-1),
        topic_index,
        &inputs,
    )
    .await
    else {
        warn!(file_key = %topic.file_key, "Topic regeneration failed, marking stale");
        BrainFile::mark_stale(user_id, &[topic.file_key.clone()], &builder.db).await?;
        return Ok(false);
    };
    compress_topic(
        &builder.provider,
        &builder.model,
        builder.temperature,
        &mut draft,
    )
    .await;
    draft.file_key = topic.file_key.clone();

    let file = draft_to_file(user_id, &draft, &builder.embedder).await;
    BrainFile::upsert(file, &builder.db).await?;
    Ok(true)
}

fn topic_index_of(file_key: &str) -> usize {
    file_key
        .rsplit('_')
        .next()
        .and_then(|suffix| suffix.parse().ok())
        .unwrap_or(0)
}

/// Create a single-note topic with a fresh file key. When the model is
/// unreachable the note's own head stands in for the synthesis.
pub async fn create_micro_topic(
    builder: &BrainBuilder,
    user_id: &str,
    note: &NoteInput,
) -> Result<(), AppError> {
    let topics = BrainFile::topics_for_user(user_id, &builder.db).await?;
    let next_index = topics
        .iter()
        .map(|topic| topic_index_of(&topic.file_key))
        .max()
        .map_or(0, |max| max + 1);

    match generate_topic(
        &builder.provider,
        &builder.model,
        builder.temperature,
        -1,
        next_index,
        std::slice::from_ref(note),
    )
    .await
    {
        Some(mut draft) => {
            compress_topic(
                &builder.provider,
                &builder.model,
                builder.temperature,
                &mut draft,
            )
            .await;
            let file = draft_to_file(user_id, &draft, &builder.embedder).await;
            BrainFile::upsert(file, &builder.db).await?;
        }
        None => {
            let head: String = note.content.chars().take(800).collect();
            let content = format!("# {}\n\n{head}", note.title);
            let mut file = BrainFile::new(
                user_id.to_owned(),
                format!("topic_{next_index}"),
                BrainFileKind::Topic,
                note.title.clone(),
                content.clone(),
                content_hash(&content),
                estimate_tokens(&content) as u32,
            );
            file.community_id = Some(-1);
            file.source_note_ids = vec![note.id.clone()];
            BrainFile::upsert(file, &builder.db).await?;
        }
    }

    info!(topic_index = next_index, "Micro-topic created");
    Ok(())
}

/// Rewrite the mnemosyne master map from the current topic summaries.
pub async fn update_master_map(builder: &BrainBuilder, user_id: &str) -> Result<(), AppError> {
    let topics = BrainFile::topics_for_user(user_id, &builder.db).await?;
    if topics.is_empty() {
        return Ok(());
    }

    let drafts: Vec<TopicDraft> = topics
        .iter()
        .map(|topic| TopicDraft {
            file_key: topic.file_key.clone(),
            title: topic.title.clone(),
            content: topic.content.clone(),
            community_id: topic.community_id.unwrap_or(-1),
            keywords: topic.topic_keywords.clone(),
            source_note_ids: topic.source_note_ids.clone(),
            token_count_approx: topic.token_count_approx,
            compressed_content: topic.compressed_content.clone(),
            compressed_token_count: topic.compressed_token_count,
        })
        .collect();

    let note_count = Note::live_for_user(user_id, &builder.db).await?.len();
    let overview = generate_overview(
        &builder.provider,
        &builder.model,
        builder.temperature,
        user_id,
        &drafts,
        note_count,
        drafts.len(),
    )
    .await;
    BrainFile::upsert(overview, &builder.db).await?;
    Ok(())
}

/// Too many single-note topics means clustering drift; a full rebuild is
/// recommended but never auto-triggered.
async fn check_rebuild_recommendation(
    db: &SurrealDbClient,
    user_id: &str,
) -> Result<(), AppError> {
    let topics = BrainFile::topics_for_user(user_id, db).await?;
    let micro_count = topics
        .iter()
        .filter(|topic| topic.source_note_ids.len() <= 1)
        .count();
    if micro_count > MICRO_TOPIC_LIMIT {
        info!(
            micro_count,
            "Many micro-topics accumulated; a full brain rebuild is recommended"
        );
    }
    Ok(())
}

/// Fallback when incremental logic itself errors: flag the affected
/// topics (or all of them) stale so a later build reconciles.
pub async fn mark_brain_stale(
    db: &SurrealDbClient,
    user_id: &str,
    note_id: Option<&str>,
) -> Result<(), AppError> {
    match note_id {
        Some(note_id) => {
            let topics = BrainFile::topics_for_user(user_id, db).await?;
            let keys: Vec<String> = topics
                .into_iter()
                .filter(|topic| topic.source_note_ids.iter().any(|id| id == note_id))
                .map(|topic| topic.file_key)
                .chain(["askimap".to_owned(), "mnemosyne".to_owned()])
                .collect();
            BrainFile::mark_stale(user_id, &keys, db).await
        }
        None => BrainFile::mark_all_topics_stale(user_id, db).await,
    }
}
