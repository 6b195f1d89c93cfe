use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{note::Note, semantic_edge::SemanticEdge},
    },
    utils::embedding::cosine_similarity,
};

use crate::StepOutcome;

/// Pairwise similarity over embedded notes is quadratic; the working set
/// is bounded the same way the diffusion ranker bounds its own.
const MAX_NOTES: usize = 500;

/// Consolidation step 3: regenerate semantic edges from note embeddings.
///
/// Pairs at or above the threshold are inserted or updated; existing
/// edges that have dropped below it are deleted.
pub async fn refresh_semantic_edges(
    db: &SurrealDbClient,
    user_id: &str,
    threshold: f32,
) -> Result<StepOutcome, AppError> {
    let notes = Note::recent_embedded(user_id, MAX_NOTES, db).await?;
    if notes.len() < 2 {
        return Ok(StepOutcome::Skipped {
            reason: "fewer than two embedded notes".into(),
        });
    }

    let mut created_or_updated = 0usize;
    for i in 0..notes.len() {
        let Some(embedding_a) = &notes[i].embedding else {
            continue;
        };
        for j in (i + 1)..notes.len() {
            let Some(embedding_b) = &notes[j].embedding else {
                continue;
            };
            let similarity = cosine_similarity(embedding_a, embedding_b);
            if similarity >= threshold {
                SemanticEdge::upsert(user_id, &notes[i].id, &notes[j].id, similarity, db)
                    .await?;
                created_or_updated += 1;
            }
        }
    }

    SemanticEdge::delete_below(user_id, threshold, db).await?;

    Ok(StepOutcome::success(format!(
        "{created_or_updated} edges over {} notes",
        notes.len()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::note::NoteOrigin;

    async fn note_with_embedding(
        db: &SurrealDbClient,
        title: &str,
        embedding: Vec<f32>,
    ) -> Note {
        let mut note = Note::new(
            "user1".into(),
            title.into(),
            String::new(),
            NoteOrigin::Manual,
        );
        note.embedding = Some(embedding);
        db.store_item(note.clone()).await.expect("store note");
        note
    }

    #[tokio::test]
    async fn test_edges_created_above_threshold_only() {
        let db = SurrealDbClient::memory("test_ns", &uuid::Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");

        let a = note_with_embedding(&db, "A", vec![1.0, 0.0, 0.0]).await;
        let b = note_with_embedding(&db, "B", vec![0.95, 0.05, 0.0]).await;
        let _c = note_with_embedding(&db, "C", vec![0.0, 1.0, 0.0]).await;

        let outcome = refresh_semantic_edges(&db, "user1", 0.7)
            .await
            .expect("refresh");
        assert!(!outcome.is_failed());

        let edges = SemanticEdge::all_for_user("user1", &db)
            .await
            .expect("edges");
        assert_eq!(edges.len(), 1);
        let edge = &edges[0];
        let pair = (edge.source_note_id.as_str(), edge.target_note_id.as_str());
        let expected = if a.id < b.id {
            (a.id.as_str(), b.id.as_str())
        } else {
            (b.id.as_str(), a.id.as_str())
        };
        assert_eq!(pair, expected);
    }

    #[tokio::test]
    async fn test_dropped_edges_are_deleted_on_refresh() {
        let db = SurrealDbClient::memory("test_ns", &uuid::Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");

        let a = note_with_embedding(&db, "A", vec![1.0, 0.0, 0.0]).await;
        let b = note_with_embedding(&db, "B", vec![0.0, 1.0, 0.0]).await;

        // A stale edge from an earlier run where the notes were similar
        SemanticEdge::upsert("user1", &a.id, &b.id, 0.9, &db)
            .await
            .expect("stale edge");

        refresh_semantic_edges(&db, "user1", 0.7)
            .await
            .expect("refresh");

        let edges = SemanticEdge::all_for_user("user1", &db)
            .await
            .expect("edges");
        assert!(edges.is_empty(), "orthogonal notes keep no edge");
    }

    #[tokio::test]
    async fn test_too_few_notes_skips() {
        let db = SurrealDbClient::memory("test_ns", &uuid::Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");
        note_with_embedding(&db, "Only", vec![1.0, 0.0, 0.0]).await;

        let outcome = refresh_semantic_edges(&db, "user1", 0.7)
            .await
            .expect("refresh");
        assert!(matches!(outcome, StepOutcome::Skipped { .. }));
    }
}
