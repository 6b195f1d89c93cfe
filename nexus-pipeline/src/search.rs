use std::collections::HashMap;

use chrono::{Duration, Utc};
use serde::Deserialize;
use tracing::debug;

use common::{
    error::AppError,
    storage::db::SurrealDbClient,
    utils::embedding::EmbeddingProvider,
};

use crate::{RankedResult, RetrievalResult, SourceType};

/// Parameters for one retrieval round.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub max_sources: usize,
    pub min_similarity: f32,
    pub include_images: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            max_sources: 10,
            min_similarity: 0.4,
            include_images: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateRange {
    Today,
    Week,
    Month,
    Year,
    All,
}

impl DateRange {
    fn cutoff(self) -> Option<chrono::DateTime<Utc>> {
        let now = Utc::now();
        match self {
            DateRange::Today => Some(now - Duration::days(1)),
            DateRange::Week => Some(now - Duration::weeks(1)),
            DateRange::Month => Some(now - Duration::days(30)),
            DateRange::Year => Some(now - Duration::days(365)),
            DateRange::All => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Relevance,
    Date,
    Title,
}

/// Weights for the linear fulltext/semantic merge.
#[derive(Debug, Clone, Copy)]
pub struct HybridWeights {
    pub fulltext: f32,
    pub semantic: f32,
    pub both_boost: f32,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            fulltext: 0.6,
            semantic: 0.4,
            both_boost: 0.1,
        }
    }
}

#[derive(Deserialize)]
struct NoteVectorRow {
    id: surrealdb::sql::Thing,
    title: String,
    content: String,
    score: f32,
}

#[derive(Deserialize)]
struct ChunkVectorRow {
    id: surrealdb::sql::Thing,
    note_id: String,
    content: String,
    score: f32,
}

#[derive(Deserialize)]
struct DocumentChunkVectorRow {
    id: surrealdb::sql::Thing,
    document_id: String,
    content: String,
    score: f32,
}

#[derive(Deserialize)]
struct ImageVectorRow {
    id: surrealdb::sql::Thing,
    filename: String,
    display_name: Option<String>,
    ai_analysis_result: Option<String>,
    score: f32,
}

#[derive(Deserialize)]
struct FtsRow {
    id: surrealdb::sql::Thing,
    title: Option<String>,
    content: Option<String>,
    note_id: Option<String>,
    score: Option<f32>,
    #[serde(default)]
    created_at: Option<surrealdb::sql::Datetime>,
}

fn raw_id(thing: &surrealdb::sql::Thing) -> String {
    thing.id.to_raw()
}

fn preview(text: &str, chars: usize) -> String {
    text.chars().take(chars).collect()
}

/// Semantic top-k over the owner's notes.
async fn semantic_notes(
    db: &SurrealDbClient,
    embedding: &[f32],
    user_id: &str,
    take: usize,
) -> Result<Vec<RetrievalResult>, AppError> {
    let sql = format!(
        "SELECT id, title, content, vector::similarity::cosine(embedding, $embedding) AS score \
         FROM note \
         WHERE user_id = $user_id AND is_trashed = false AND embedding <|{take},40|> $embedding \
         ORDER BY score DESC LIMIT {take}"
    );
    let mut response = db
        .query(sql)
        .bind(("embedding", embedding.to_vec()))
        .bind(("user_id", user_id.to_owned()))
        .await?;
    let rows: Vec<NoteVectorRow> = response.take(0)?;

    Ok(rows
        .into_iter()
        .map(|row| RetrievalResult {
            source_type: SourceType::Note,
            source_id: raw_id(&row.id),
            note_id: Some(raw_id(&row.id)),
            title: row.title,
            content: row.content,
            similarity: row.score,
            retrieval_method: "vector".to_owned(),
        })
        .collect())
}

async fn semantic_note_chunks(
    db: &SurrealDbClient,
    embedding: &[f32],
    user_id: &str,
    take: usize,
) -> Result<Vec<RetrievalResult>, AppError> {
    let sql = format!(
        "SELECT id, note_id, content, vector::similarity::cosine(embedding, $embedding) AS score \
         FROM note_chunk \
         WHERE user_id = $user_id AND embedding <|{take},40|> $embedding \
           AND note_id NOTINSIDE \
             (SELECT VALUE record::id(id) FROM note WHERE user_id = $user_id AND is_trashed = true) \
         ORDER BY score DESC LIMIT {take}"
    );
    let mut response = db
        .query(sql)
        .bind(("embedding", embedding.to_vec()))
        .bind(("user_id", user_id.to_owned()))
        .await?;
    let rows: Vec<ChunkVectorRow> = response.take(0)?;

    Ok(rows
        .into_iter()
        .map(|row| RetrievalResult {
            source_type: SourceType::Chunk,
            source_id: raw_id(&row.id),
            note_id: Some(row.note_id),
            title: String::new(),
            content: row.content,
            similarity: row.score,
            retrieval_method: "vector".to_owned(),
        })
        .collect())
}

async fn semantic_document_chunks(
    db: &SurrealDbClient,
    embedding: &[f32],
    user_id: &str,
    take: usize,
) -> Result<Vec<RetrievalResult>, AppError> {
    let sql = format!(
        "SELECT id, document_id, content, \
                vector::similarity::cosine(embedding, $embedding) AS score \
         FROM document_chunk \
         WHERE user_id = $user_id AND embedding <|{take},40|> $embedding \
         ORDER BY score DESC LIMIT {take}"
    );
    let mut response = db
        .query(sql)
        .bind(("embedding", embedding.to_vec()))
        .bind(("user_id", user_id.to_owned()))
        .await?;
    let rows: Vec<DocumentChunkVectorRow> = response.take(0)?;

    // Titles come from the parent documents, fetched in one pass.
    let document_ids: Vec<String> = rows.iter().map(|r| r.document_id.clone()).collect();
    let titles = document_titles(db, user_id, &document_ids).await?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let title = titles.get(&row.document_id).cloned().unwrap_or_default();
            RetrievalResult {
                source_type: SourceType::DocumentChunk,
                source_id: raw_id(&row.id),
                note_id: None,
                title,
                content: row.content,
                similarity: row.score,
                retrieval_method: "vector".to_owned(),
            }
        })
        .collect())
}

async fn semantic_images(
    db: &SurrealDbClient,
    embedding: &[f32],
    user_id: &str,
    take: usize,
) -> Result<Vec<RetrievalResult>, AppError> {
    let sql = format!(
        "SELECT id, filename, display_name, ai_analysis_result, \
                vector::similarity::cosine(embedding, $embedding) AS score \
         FROM image \
         WHERE user_id = $user_id AND is_trashed = false AND embedding <|{take},40|> $embedding \
         ORDER BY score DESC LIMIT {take}"
    );
    let mut response = db
        .query(sql)
        .bind(("embedding", embedding.to_vec()))
        .bind(("user_id", user_id.to_owned()))
        .await?;
    let rows: Vec<ImageVectorRow> = response.take(0)?;

    Ok(rows
        .into_iter()
        .map(|row| RetrievalResult {
            source_type: SourceType::Image,
            source_id: raw_id(&row.id),
            note_id: None,
            title: row.display_name.unwrap_or(row.filename),
            content: row.ai_analysis_result.unwrap_or_default(),
            similarity: row.score,
            retrieval_method: "vector".to_owned(),
        })
        .collect())
}

async fn document_titles(
    db: &SurrealDbClient,
    user_id: &str,
    document_ids: &[String],
) -> Result<HashMap<String, String>, AppError> {
    if document_ids.is_empty() {
        return Ok(HashMap::new());
    }

    #[derive(Deserialize)]
    struct Row {
        id: surrealdb::sql::Thing,
        filename: String,
    }

    let things: Vec<surrealdb::sql::Thing> = document_ids
        .iter()
        .map(|id| surrealdb::sql::Thing::from(("document", id.as_str())))
        .collect();
    let mut response = db
        .query("SELECT id, filename FROM document WHERE id IN $things AND user_id = $user_id")
        .bind(("things", things))
        .bind(("user_id", user_id.to_owned()))
        .await?;
    let rows: Vec<Row> = response.take(0)?;

    Ok(rows
        .into_iter()
        .map(|row| (raw_id(&row.id), row.filename))
        .collect())
}

/// Semantic search across every requested source type. A failing source
/// type degrades to fulltext for that type instead of erroring.
pub async fn semantic_search(
    db: &SurrealDbClient,
    query_embedding: &[f32],
    query: &str,
    user_id: &str,
    options: &SearchOptions,
) -> Result<Vec<RetrievalResult>, AppError> {
    let take = options.max_sources.max(1);
    let mut results = Vec::new();

    match semantic_notes(db, query_embedding, user_id, take).await {
        Ok(notes) => results.extend(notes),
        Err(err) => {
            debug!(error = %err, "Note semantic search degraded to fulltext");
            results.extend(fulltext_table(db, query, user_id, "note", take).await?);
        }
    }
    match semantic_note_chunks(db, query_embedding, user_id, take).await {
        Ok(chunks) => results.extend(chunks),
        Err(err) => {
            debug!(error = %err, "Chunk semantic search degraded to fulltext");
            results.extend(fulltext_table(db, query, user_id, "note_chunk", take).await?);
        }
    }
    match semantic_document_chunks(db, query_embedding, user_id, take).await {
        Ok(chunks) => results.extend(chunks),
        Err(err) => {
            debug!(error = %err, "Document chunk semantic search degraded to fulltext");
            results.extend(fulltext_table(db, query, user_id, "document_chunk", take).await?);
        }
    }
    if options.include_images {
        match semantic_images(db, query_embedding, user_id, take).await {
            Ok(images) => results.extend(images),
            Err(err) => {
                debug!(error = %err, "Image semantic search degraded to fulltext");
                results.extend(fulltext_table(db, query, user_id, "image", take).await?);
            }
        }
    }

    // The similarity floor only applies to vector scores; fulltext
    // fallback rows keep their lexical ranking.
    results.retain(|r| r.retrieval_method != "vector" || r.similarity >= options.min_similarity);
    results.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.source_id.cmp(&b.source_id))
    });
    results.truncate(take);
    Ok(results)
}

/// Fulltext search over one table using the search indexes.
async fn fulltext_table(
    db: &SurrealDbClient,
    query: &str,
    user_id: &str,
    table: &str,
    take: usize,
) -> Result<Vec<RetrievalResult>, AppError> {
    let (select, filter_clause, score_clause, source_type) = match table {
        "note" => (
            "id, title, content, created_at",
            "(title @0@ $terms OR content @1@ $terms) AND is_trashed = false",
            "(IF search::score(0) != NONE THEN search::score(0) ELSE 0 END) + \
             (IF search::score(1) != NONE THEN search::score(1) ELSE 0 END)",
            SourceType::Note,
        ),
        "note_chunk" => (
            "id, content, note_id, created_at",
            "(content @0@ $terms)",
            "IF search::score(0) != NONE THEN search::score(0) ELSE 0 END",
            SourceType::Chunk,
        ),
        "document_chunk" => (
            "id, content, created_at",
            "(content @0@ $terms)",
            "IF search::score(0) != NONE THEN search::score(0) ELSE 0 END",
            SourceType::DocumentChunk,
        ),
        "image" => (
            "id, ai_analysis_result AS content, display_name AS title, created_at",
            "(ai_analysis_result @0@ $terms) AND is_trashed = false",
            "IF search::score(0) != NONE THEN search::score(0) ELSE 0 END",
            SourceType::Image,
        ),
        _ => {
            return Err(AppError::Validation(format!(
                "Fulltext search not configured for table '{table}'"
            )))
        }
    };

    let sql = format!(
        "SELECT {select}, {score_clause} AS score FROM {table} \
         WHERE {filter_clause} AND user_id = $user_id \
         ORDER BY score DESC LIMIT $limit"
    );

    let mut response = db
        .query(sql)
        .bind(("terms", query.to_owned()))
        .bind(("user_id", user_id.to_owned()))
        .bind(("limit", take as i64))
        .await?;
    let rows: Vec<FtsRow> = response.take(0)?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let id = raw_id(&row.id);
            RetrievalResult {
                source_type,
                note_id: match source_type {
                    SourceType::Note => Some(id.clone()),
                    SourceType::Chunk => row.note_id,
                    _ => None,
                },
                source_id: id,
                title: row.title.unwrap_or_default(),
                content: row.content.unwrap_or_default(),
                similarity: row.score.unwrap_or_default(),
                retrieval_method: "fulltext".to_owned(),
            }
        })
        .collect())
}

/// Lexical search with AND-combined terms, date windows and sort orders.
pub async fn fulltext_search(
    db: &SurrealDbClient,
    query: &str,
    user_id: &str,
    types: &[SourceType],
    date_range: DateRange,
    sort: SortOrder,
    limit: usize,
) -> Result<Vec<RetrievalResult>, AppError> {
    let mut results = Vec::new();
    for source_type in types {
        let table = match source_type {
            SourceType::Note => "note",
            SourceType::Chunk => "note_chunk",
            SourceType::DocumentChunk => "document_chunk",
            SourceType::Image => "image",
        };
        results.extend(fulltext_table(db, query, user_id, table, limit).await?);
    }

    // AND semantics: every query term must appear somewhere in the hit.
    let terms: Vec<String> = query
        .to_lowercase()
        .split_whitespace()
        .map(str::to_owned)
        .collect();
    if terms.len() > 1 {
        results.retain(|result| {
            let haystack = format!("{} {}", result.title, result.content).to_lowercase();
            terms.iter().all(|term| haystack.contains(term))
        });
    }

    if let Some(cutoff) = date_range.cutoff() {
        // Date filtering happens post-query; the FTS rows carry created_at.
        let mut filtered = Vec::new();
        for result in results {
            let created = created_at_of(db, &result).await?;
            if created.map(|at| at >= cutoff).unwrap_or(true) {
                filtered.push(result);
            }
        }
        results = filtered;
    }

    match sort {
        SortOrder::Relevance => results.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.source_id.cmp(&b.source_id))
        }),
        SortOrder::Title => {
            results.sort_by(|a, b| a.title.to_lowercase().cmp(&b.title.to_lowercase()));
        }
        SortOrder::Date => {
            // Newest first; fetched per row because results span tables.
            let mut dated = Vec::new();
            for result in results {
                let created = created_at_of(db, &result).await?;
                dated.push((created, result));
            }
            dated.sort_by(|a, b| b.0.cmp(&a.0));
            results = dated.into_iter().map(|(_, r)| r).collect();
        }
    }

    results.truncate(limit);
    Ok(results)
}

async fn created_at_of(
    db: &SurrealDbClient,
    result: &RetrievalResult,
) -> Result<Option<chrono::DateTime<Utc>>, AppError> {
    let table = match result.source_type {
        SourceType::Note => "note",
        SourceType::Chunk => "note_chunk",
        SourceType::DocumentChunk => "document_chunk",
        SourceType::Image => "image",
    };
    let mut response = db
        .query("SELECT VALUE created_at FROM type::thing($table, $id)")
        .bind(("table", table.to_owned()))
        .bind(("id", result.source_id.clone()))
        .await?;
    let stamps: Vec<surrealdb::sql::Datetime> = response.take(0)?;
    Ok(stamps
        .into_iter()
        .next()
        .map(chrono::DateTime::<Utc>::from))
}

/// Linear merge of fulltext and semantic hits. Results found by both get
/// a small extra boost on top of the weighted sum.
pub fn hybrid_merge(
    fulltext_results: Vec<RetrievalResult>,
    semantic_results: Vec<RetrievalResult>,
    weights: HybridWeights,
    limit: usize,
) -> Vec<RankedResult> {
    let mut semantic_index: HashMap<String, RetrievalResult> = HashMap::new();
    for result in semantic_results {
        semantic_index.entry(result.merge_key()).or_insert(result);
    }

    let mut merged: Vec<RankedResult> = Vec::new();
    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();

    for result in fulltext_results {
        let key = result.merge_key();
        let fulltext_score = result.similarity;

        let (score, methods, result) = if let Some(semantic) = semantic_index.remove(&key) {
            let combined = fulltext_score * weights.fulltext
                + semantic.similarity * weights.semantic
                + weights.both_boost;
            // Prefer the semantic row's body; it is the ranked surface.
            (
                combined,
                vec!["fulltext".to_owned(), "vector".to_owned()],
                semantic,
            )
        } else {
            (
                fulltext_score * weights.fulltext,
                vec!["fulltext".to_owned()],
                result,
            )
        };

        seen.insert(key);
        merged.push(RankedResult {
            result,
            final_score: score,
            rank: 0,
            contributing_methods: methods,
        });
    }

    let mut leftover: Vec<(String, RetrievalResult)> = semantic_index.into_iter().collect();
    leftover.sort_by(|a, b| a.0.cmp(&b.0));
    for (key, semantic) in leftover {
        if seen.contains(&key) {
            continue;
        }
        merged.push(RankedResult {
            final_score: semantic.similarity * weights.semantic,
            result: semantic,
            rank: 0,
            contributing_methods: vec!["vector".to_owned()],
        });
    }

    merged.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.result.source_id.cmp(&b.result.source_id))
    });
    merged.truncate(limit);
    for (index, entry) in merged.iter_mut().enumerate() {
        entry.rank = index as u32 + 1;
    }
    merged
}

/// The NEXUS vector strategy: semantic-first with fulltext blended in,
/// falling back to pure fulltext when no query embedding is available.
pub async fn vector_strategy(
    db: &SurrealDbClient,
    embedder: &EmbeddingProvider,
    query: &str,
    user_id: &str,
    options: &SearchOptions,
) -> Result<Vec<RankedResult>, AppError> {
    let source_types = if options.include_images {
        vec![
            SourceType::Note,
            SourceType::Chunk,
            SourceType::DocumentChunk,
            SourceType::Image,
        ]
    } else {
        vec![
            SourceType::Note,
            SourceType::Chunk,
            SourceType::DocumentChunk,
        ]
    };

    let fulltext = fulltext_search(
        db,
        query,
        user_id,
        &source_types,
        DateRange::All,
        SortOrder::Relevance,
        options.max_sources,
    )
    .await?;

    match embedder.embed(query).await {
        Ok(query_embedding) => {
            let semantic =
                semantic_search(db, &query_embedding, query, user_id, options).await?;
            Ok(hybrid_merge(
                fulltext,
                semantic,
                HybridWeights {
                    fulltext: 0.3,
                    semantic: 0.7,
                    both_boost: 0.1,
                },
                options.max_sources,
            ))
        }
        Err(err) => {
            debug!(error = %err, "Query embedding unavailable, using fulltext only");
            Ok(fulltext
                .into_iter()
                .enumerate()
                .map(|(index, result)| RankedResult::from_result(result, index as u32 + 1))
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, source_type: SourceType, similarity: f32, method: &str) -> RetrievalResult {
        RetrievalResult {
            source_type,
            source_id: id.to_owned(),
            note_id: match source_type {
                SourceType::Note => Some(id.to_owned()),
                _ => None,
            },
            title: format!("title {id}"),
            content: format!("content {id}"),
            similarity,
            retrieval_method: method.to_owned(),
        }
    }

    #[test]
    fn test_hybrid_merge_boosts_double_hits() {
        let fulltext = vec![
            result("a", SourceType::Note, 0.5, "fulltext"),
            result("b", SourceType::Note, 0.9, "fulltext"),
        ];
        let semantic = vec![result("a", SourceType::Note, 0.8, "vector")];

        let merged = hybrid_merge(fulltext, semantic, HybridWeights::default(), 10);
        assert_eq!(merged.len(), 2);

        // a: 0.5*0.6 + 0.8*0.4 + 0.1 = 0.72 beats b: 0.9*0.6 = 0.54
        assert_eq!(merged[0].result.source_id, "a");
        assert!((merged[0].final_score - 0.72).abs() < 1e-5);
        assert_eq!(
            merged[0].contributing_methods,
            vec!["fulltext".to_owned(), "vector".to_owned()]
        );
        assert_eq!(merged[0].rank, 1);
        assert_eq!(merged[1].rank, 2);
    }

    #[test]
    fn test_hybrid_merge_keeps_semantic_only_hits() {
        let merged = hybrid_merge(
            Vec::new(),
            vec![result("only", SourceType::Note, 0.7, "vector")],
            HybridWeights::default(),
            10,
        );
        assert_eq!(merged.len(), 1);
        assert!((merged[0].final_score - 0.28).abs() < 1e-5);
        assert_eq!(merged[0].contributing_methods, vec!["vector".to_owned()]);
    }

    #[test]
    fn test_merge_key_collapses_chunk_onto_note() {
        let mut chunk = result("chunk1", SourceType::Chunk, 0.5, "vector");
        chunk.note_id = Some("note9".to_owned());
        assert_eq!(chunk.merge_key(), "note:note9");

        let note = result("note9", SourceType::Note, 0.5, "vector");
        assert_eq!(note.merge_key(), "note:note9");
    }

    #[tokio::test]
    async fn test_fulltext_search_applies_and_semantics() {
        use common::storage::types::note::{Note, NoteOrigin};

        let db = SurrealDbClient::memory("test_ns", &uuid::Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");
        db.ensure_initialized(3).await.expect("schema");

        let mut matching = Note::new(
            "user1".into(),
            "Docker networking".into(),
            "bridge networks in docker".into(),
            NoteOrigin::Manual,
        );
        matching.slug = "docker-networking".into();
        let mut partial = Note::new(
            "user1".into(),
            "Docker compose".into(),
            "compose files".into(),
            NoteOrigin::Manual,
        );
        partial.slug = "docker-compose".into();

        db.store_item(matching.clone()).await.expect("store");
        db.store_item(partial).await.expect("store");
        db.rebuild_search_indexes().await.expect("rebuild indexes");

        let results = fulltext_search(
            &db,
            "docker bridge",
            "user1",
            &[SourceType::Note],
            DateRange::All,
            SortOrder::Relevance,
            10,
        )
        .await
        .expect("fulltext search");

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source_id, matching.id);
    }

    #[tokio::test]
    async fn test_vector_strategy_excludes_other_owners() {
        use common::storage::types::note::{Note, NoteOrigin};

        let db = SurrealDbClient::memory("test_ns", &uuid::Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");
        db.ensure_initialized(64).await.expect("schema");
        let embedder = EmbeddingProvider::new_hashed(64).expect("embedder");

        let mut mine = Note::new(
            "user1".into(),
            "Docker networking".into(),
            "docker bridge network notes".into(),
            NoteOrigin::Manual,
        );
        mine.embedding = Some(
            embedder
                .embed("Docker networking docker bridge network notes")
                .await
                .expect("embed"),
        );
        let mut theirs = Note::new(
            "user2".into(),
            "Docker networking".into(),
            "docker bridge network notes".into(),
            NoteOrigin::Manual,
        );
        theirs.embedding = mine.embedding.clone();

        db.store_item(mine.clone()).await.expect("store mine");
        db.store_item(theirs).await.expect("store theirs");
        db.rebuild_search_indexes().await.expect("rebuild indexes");

        let results = vector_strategy(
            &db,
            &embedder,
            "docker bridge network",
            "user1",
            &SearchOptions {
                min_similarity: 0.1,
                ..SearchOptions::default()
            },
        )
        .await
        .expect("vector strategy");

        assert!(!results.is_empty());
        for ranked in &results {
            assert_eq!(ranked.result.note_id.as_deref(), Some(mine.id.as_str()));
        }
    }
}
