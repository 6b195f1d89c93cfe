use std::path::Path;

use serde::Deserialize;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::{info, instrument, warn};

use common::{
    error::AppError,
    llm::{GenerationRequest, LlmMessage},
    storage::types::{
        background_task::{BackgroundTask, TaskPayload},
        document::{AnalysisStatus, Document},
        document_chunk::DocumentChunk,
    },
};

use crate::{
    chunker::{chunk_text, DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP},
    extraction::{extract_document_text, looks_scanned, sanitize_text},
    EnrichmentPipeline,
};

const ENRICHMENT_PROMPT: &str = "You are cataloguing a document for a personal knowledge base.\n\
\n\
DOCUMENT TEXT:\n{text}\n\
\n\
Respond with ONLY a JSON object of this shape:\n\
{\"summary\": \"2-4 sentence summary\", \"document_type\": \"invoice|article|manual|letter|other\", \
\"tags\": [\"up to 5 short tags\"], \"wikilinks\": [\"titles of existing notes this relates to\"]}";

#[derive(Deserialize, Default)]
struct EnrichmentResult {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    document_type: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    wikilinks: Vec<String>,
}

/// Full document analysis: extract, OCR fallback for scanned files,
/// enrichment, then queue embedding. Re-running replaces prior results.
#[instrument(skip(pipeline), fields(document_id))]
pub async fn analyze(pipeline: &EnrichmentPipeline, document_id: &str) -> Result<(), AppError> {
    let document: Document = pipeline
        .db
        .get_item(document_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Document {document_id} not found")))?;

    Document::set_status(document_id, AnalysisStatus::Processing, &pipeline.db).await?;

    let extraction = match extract_document_text(Path::new(&document.filepath), &document.mime_type)
    {
        Ok(extraction) => extraction,
        Err(err) => {
            if err.category() == common::error::ErrorCategory::Permanent {
                Document::mark_failed(document_id, &err.to_string(), &pipeline.db).await?;
            }
            return Err(err);
        }
    };

    let mut text = extraction.text;
    let page_count = extraction.page_count.max(1);

    // Vision OCR fallback for scanned documents
    if looks_scanned(&text, page_count) {
        match pipeline.vision.ocr_file(Path::new(&document.filepath)).await {
            Ok(ocr_text) => {
                info!(chars = ocr_text.len(), "Used vision OCR fallback");
                text = sanitize_text(&ocr_text);
            }
            Err(err) => {
                warn!(error = %err, "Vision OCR fallback failed, keeping extracted text");
            }
        }
    }

    if text.trim().is_empty() {
        Document::mark_failed(document_id, "No extractable text", &pipeline.db).await?;
        return Err(AppError::Validation(format!(
            "Document {document_id} produced no text"
        )));
    }

    pipeline
        .db
        .client
        .query(
            "UPDATE type::thing('document', $id) SET extracted_text = $text, \
             page_count = $pages, updated_at = time::now()",
        )
        .bind(("id", document_id.to_owned()))
        .bind(("text", text.clone()))
        .bind(("pages", page_count as i64))
        .await?;

    // AI enrichment: summary, type, tags, wikilink candidates
    let enrichment = run_enrichment(pipeline, &text).await?;
    pipeline
        .db
        .client
        .query(
            "UPDATE type::thing('document', $id) SET ai_summary = $summary, \
             suggested_tags = $tags, suggested_wikilinks = $wikilinks, \
             updated_at = time::now()",
        )
        .bind(("id", document_id.to_owned()))
        .bind(("summary", enrichment.summary.clone()))
        .bind(("tags", enrichment.tags.clone()))
        .bind(("wikilinks", enrichment.wikilinks.clone()))
        .await?;

    Document::set_status(document_id, AnalysisStatus::NeedsReview, &pipeline.db).await?;

    // Make the document searchable right away; approval re-triggers later
    BackgroundTask::enqueue(
        TaskPayload::DocumentEmbed {
            document_id: document_id.to_owned(),
        },
        &document.user_id,
        &pipeline.db,
    )
    .await?;

    info!(
        document_id,
        pages = page_count,
        document_type = %enrichment.document_type,
        "Document analysis complete"
    );
    Ok(())
}

async fn run_enrichment(
    pipeline: &EnrichmentPipeline,
    text: &str,
) -> Result<EnrichmentResult, AppError> {
    let head: String = text.chars().take(6000).collect();
    let prompt = ENRICHMENT_PROMPT.replace("{text}", &head);

    let provider = pipeline.registry.local();
    let response = provider
        .generate(GenerationRequest {
            messages: vec![LlmMessage::user(prompt)],
            model: pipeline.config.default_text_model.clone(),
            temperature: 0.3,
            max_tokens: 1024,
            context_window: None,
        })
        .await?;

    Ok(parse_enrichment(&response.content))
}

/// Lenient parse: the JSON object anywhere in the output, else the whole
/// response as a plain summary.
fn parse_enrichment(response: &str) -> EnrichmentResult {
    let start = response.find('{');
    let end = response.rfind('}');
    if let (Some(start), Some(end)) = (start, end) {
        if end > start {
            if let Ok(parsed) = serde_json::from_str::<EnrichmentResult>(&response[start..=end]) {
                return parsed;
            }
        }
    }

    EnrichmentResult {
        summary: response.chars().take(600).collect(),
        ..EnrichmentResult::default()
    }
}

/// Chunk and embed a document. Defensive about analysis state, and
/// idempotent: chunks are truncated and re-inserted every run.
#[instrument(skip(pipeline), fields(document_id))]
pub async fn embed(pipeline: &EnrichmentPipeline, document_id: &str) -> Result<(), AppError> {
    let document: Document = pipeline
        .db
        .get_item(document_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Document {document_id} not found")))?;

    if !document.ai_analysis_status.past_processing() {
        warn!(
            document_id,
            status = document.ai_analysis_status.as_str(),
            "Analysis not complete, skipping embeddings"
        );
        return Ok(());
    }

    let Some(text) = document.extracted_text.as_deref().filter(|t| !t.trim().is_empty()) else {
        warn!(document_id, "No extracted text, skipping embeddings");
        return Ok(());
    };

    let chunks = chunk_text(text, DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP);
    let mut rows: Vec<DocumentChunk> = chunks
        .iter()
        .map(|chunk| {
            DocumentChunk::new(
                document_id.to_owned(),
                document.user_id.clone(),
                chunk.content.clone(),
                chunk.chunk_index,
                chunk.chunk_type,
                chunk.page_number,
                chunk.char_start,
                chunk.char_end,
            )
        })
        .collect();

    // Embeddings are sequential; a failed chunk is skipped, not fatal
    let mut embedded = 0usize;
    for row in &mut rows {
        let retry_strategy = ExponentialBackoff::from_millis(100).map(jitter).take(3);
        let content = row.content.clone();
        match Retry::spawn(retry_strategy, || pipeline.embedder.embed(&content)).await {
            Ok(embedding) => {
                row.embedding = Some(embedding);
                embedded += 1;
            }
            Err(err) => warn!(chunk_index = row.chunk_index, error = %err, "Chunk embedding skipped"),
        }
    }

    DocumentChunk::replace_for_document(document_id, rows, &pipeline.db).await?;

    // The summary embedding powers document-level semantic search
    if let Some(summary) = document.ai_summary.as_deref().filter(|s| !s.trim().is_empty()) {
        match pipeline.embedder.embed(summary).await {
            Ok(embedding) => {
                pipeline
                    .db
                    .client
                    .query(
                        "UPDATE type::thing('document', $id) SET embedding = $embedding, \
                         updated_at = time::now()",
                    )
                    .bind(("id", document_id.to_owned()))
                    .bind(("embedding", embedding))
                    .await?;
            }
            Err(err) => warn!(error = %err, "Summary embedding skipped"),
        }
    }

    info!(document_id, chunks = embedded, "Document embeddings generated");
    Ok(())
}
