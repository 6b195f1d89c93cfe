use tracing::{info, instrument, warn};

use common::{
    error::AppError,
    storage::types::{note::Note, note_chunk::NoteChunk, note_link::NoteLink},
    utils::wikilink::extract_wikilinks,
};

use crate::{
    chunker::{chunk_text, DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP},
    EnrichmentPipeline,
};

/// Note-level embedding, re-chunking and wikilink resolution. Runs on
/// every note create and update.
#[instrument(skip(pipeline), fields(note_id))]
pub async fn embed(pipeline: &EnrichmentPipeline, note_id: &str) -> Result<(), AppError> {
    let note: Note = pipeline
        .db
        .get_item(note_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Note {note_id} not found")))?;

    if note.is_trashed {
        info!(note_id, "Note is trashed, skipping embedding");
        return Ok(());
    }

    // Title twice weighs the topic over the body, then the content
    let embedding_input = format!("{}\n{}\n{}", note.title, note.title, note.content);
    match pipeline.embedder.embed(&embedding_input).await {
        Ok(embedding) => Note::set_embedding(note_id, embedding, &pipeline.db).await?,
        Err(err) => warn!(error = %err, "Note embedding skipped"),
    }

    // Re-chunk; replace is transactional so readers never see halves
    let pieces = chunk_text(&note.content, DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP);
    let mut chunks: Vec<NoteChunk> = pieces
        .iter()
        .map(|piece| {
            NoteChunk::new(
                note_id.to_owned(),
                note.user_id.clone(),
                piece.content.clone(),
                piece.chunk_index,
                piece.chunk_type,
                piece.char_start,
                piece.char_end,
            )
        })
        .collect();
    for chunk in &mut chunks {
        match pipeline.embedder.embed(&chunk.content).await {
            Ok(embedding) => chunk.embedding = Some(embedding),
            Err(err) => warn!(chunk_index = chunk.chunk_index, error = %err, "Chunk embedding skipped"),
        }
    }
    let chunk_count = chunks.len();
    NoteChunk::replace_for_note(note_id, chunks, &pipeline.db).await?;

    // Wikilink edges from [[Title]] markers, deduplicated per pair
    let targets = extract_wikilinks(&note.content);
    let mut target_ids: Vec<String> = Vec::new();
    for target_title in &targets {
        match Note::find_by_title(&note.user_id, target_title, &pipeline.db).await? {
            Some(target) => target_ids.push(target.id),
            None => {
                // Unresolved titles stay unresolved until such a note exists
            }
        }
    }
    NoteLink::replace_outgoing(&note.user_id, note_id, &target_ids, &pipeline.db).await?;

    info!(
        note_id,
        chunks = chunk_count,
        wikilinks = target_ids.len(),
        "Note embedding complete"
    );
    Ok(())
}
