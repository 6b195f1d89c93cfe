use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{link_suggestion::LinkSuggestion, note_link::NoteLink, semantic_edge::SemanticEdge},
    },
};

use crate::StepOutcome;

const MAX_SUGGESTIONS: usize = 50;

/// Consolidation step 4: propose wikilinks for semantically similar but
/// unlinked note pairs.
///
/// The unique suggestion key makes reruns idempotent, and existing rows
/// keep their status, so accepted or dismissed pairs never resurface.
pub async fn detect_missing_links(
    db: &SurrealDbClient,
    user_id: &str,
    threshold: f32,
) -> Result<StepOutcome, AppError> {
    let edges = SemanticEdge::above_threshold(user_id, threshold, db).await?;

    let mut new_suggestions = 0usize;
    for edge in edges.into_iter().take(MAX_SUGGESTIONS) {
        let linked = NoteLink::exists_between(
            user_id,
            &edge.source_note_id,
            &edge.target_note_id,
            db,
        )
        .await?;
        if linked {
            continue;
        }

        let created = LinkSuggestion::upsert_pending(
            user_id,
            &edge.source_note_id,
            &edge.target_note_id,
            edge.similarity,
            db,
        )
        .await?;
        if created {
            new_suggestions += 1;
        }
    }

    let pending = LinkSuggestion::pending_for_user(user_id, MAX_SUGGESTIONS, db)
        .await?
        .len();
    Ok(StepOutcome::success(format!(
        "{new_suggestions} new, {pending} pending"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::link_suggestion::SuggestionStatus;

    #[tokio::test]
    async fn test_suggestion_created_once_and_not_for_linked_pairs() {
        let db = SurrealDbClient::memory("test_ns", &uuid::Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");

        SemanticEdge::upsert("user1", "a", "b", 0.82, &db)
            .await
            .expect("similar unlinked pair");
        SemanticEdge::upsert("user1", "c", "d", 0.9, &db)
            .await
            .expect("similar linked pair");
        NoteLink::upsert("user1", "d", "c", &db)
            .await
            .expect("existing wikilink, reverse direction");

        detect_missing_links(&db, "user1", 0.75)
            .await
            .expect("first run");
        let pending = LinkSuggestion::pending_for_user("user1", 50, &db)
            .await
            .expect("pending");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].status, SuggestionStatus::Pending);
        let (source, target) = (
            pending[0].source_note_id.as_str(),
            pending[0].target_note_id.as_str(),
        );
        assert_eq!((source, target), ("a", "b"));

        // Second run without changes: still exactly one
        detect_missing_links(&db, "user1", 0.75)
            .await
            .expect("second run");
        let pending_again = LinkSuggestion::pending_for_user("user1", 50, &db)
            .await
            .expect("pending again");
        assert_eq!(pending_again.len(), 1);
        assert_eq!(pending_again[0].id, pending[0].id);
    }

    #[tokio::test]
    async fn test_accepting_creates_wikilink_and_stops_resurfacing() {
        let db = SurrealDbClient::memory("test_ns", &uuid::Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");

        SemanticEdge::upsert("user1", "a", "b", 0.82, &db)
            .await
            .expect("edge");
        detect_missing_links(&db, "user1", 0.75)
            .await
            .expect("detect");

        let pending = LinkSuggestion::pending_for_user("user1", 50, &db)
            .await
            .expect("pending");
        LinkSuggestion::accept(&pending[0].id, "user1", &db)
            .await
            .expect("accept");

        assert!(NoteLink::exists_between("user1", "a", "b", &db)
            .await
            .expect("wikilink created"));

        // Rerun: pair is linked now, no new suggestion appears
        detect_missing_links(&db, "user1", 0.75)
            .await
            .expect("rerun");
        let pending_after = LinkSuggestion::pending_for_user("user1", 50, &db)
            .await
            .expect("pending after accept");
        assert!(pending_after.is_empty());
    }
}
