use uuid::Uuid;

use super::note_link::NoteLink;
use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionStatus {
    Pending,
    Accepted,
    Dismissed,
}

stored_object!(LinkSuggestion, "nexus_link_suggestion", {
    user_id: String,
    source_note_id: String,
    target_note_id: String,
    similarity_score: f32,
    status: SuggestionStatus
});

impl LinkSuggestion {
    /// Create a pending suggestion unless one already exists for the pair.
    /// Existing rows keep their status so user decisions survive reruns.
    pub async fn upsert_pending(
        user_id: &str,
        source_note_id: &str,
        target_note_id: &str,
        similarity: f32,
        db: &SurrealDbClient,
    ) -> Result<bool, AppError> {
        let mut response = db
            .query(
                "SELECT VALUE record::id(id) FROM nexus_link_suggestion WHERE user_id = $user_id \
                 AND source_note_id = $source AND target_note_id = $target LIMIT 1",
            )
            .bind(("user_id", user_id.to_owned()))
            .bind(("source", source_note_id.to_owned()))
            .bind(("target", target_note_id.to_owned()))
            .await?;
        let existing: Vec<String> = response.take(0)?;
        if !existing.is_empty() {
            return Ok(false);
        }

        let now = Utc::now();
        let suggestion = LinkSuggestion {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id: user_id.to_owned(),
            source_note_id: source_note_id.to_owned(),
            target_note_id: target_note_id.to_owned(),
            similarity_score: similarity,
            status: SuggestionStatus::Pending,
        };
        db.store_item(suggestion).await?;
        Ok(true)
    }

    /// Accept a suggestion: create the wikilink edge and flip the status.
    pub async fn accept(id: &str, user_id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        let suggestion: Self = db
            .get_item(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Link suggestion not found".into()))?;
        if suggestion.user_id != user_id {
            return Err(AppError::Auth(
                "You don't have access to this suggestion".into(),
            ));
        }

        NoteLink::upsert(
            user_id,
            &suggestion.source_note_id,
            &suggestion.target_note_id,
            db,
        )
        .await?;

        db.client
            .query(
                "UPDATE type::thing('nexus_link_suggestion', $id) SET status = $status, \
                 updated_at = time::now()",
            )
            .bind(("id", id.to_owned()))
            .bind(("status", SuggestionStatus::Accepted))
            .await?;
        Ok(())
    }

    pub async fn dismiss(id: &str, user_id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        let suggestion: Self = db
            .get_item(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Link suggestion not found".into()))?;
        if suggestion.user_id != user_id {
            return Err(AppError::Auth(
                "You don't have access to this suggestion".into(),
            ));
        }

        db.client
            .query(
                "UPDATE type::thing('nexus_link_suggestion', $id) SET status = $status, \
                 updated_at = time::now()",
            )
            .bind(("id", id.to_owned()))
            .bind(("status", SuggestionStatus::Dismissed))
            .await?;
        Ok(())
    }

    pub async fn pending_for_user(
        user_id: &str,
        limit: usize,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM nexus_link_suggestion WHERE user_id = $user_id AND \
                 status = $status ORDER BY similarity_score DESC LIMIT $limit",
            )
            .bind(("user_id", user_id.to_owned()))
            .bind(("status", SuggestionStatus::Pending))
            .bind(("limit", limit as i64))
            .await?;
        Ok(response.take(0)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_pending_does_not_duplicate_or_overwrite() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        let created = LinkSuggestion::upsert_pending("user1", "a", "b", 0.82, &db)
            .await
            .expect("first upsert");
        assert!(created);

        let again = LinkSuggestion::upsert_pending("user1", "a", "b", 0.9, &db)
            .await
            .expect("second upsert");
        assert!(!again);

        let pending = LinkSuggestion::pending_for_user("user1", 10, &db)
            .await
            .expect("pending list");
        assert_eq!(pending.len(), 1);

        // A dismissed suggestion stays dismissed across consolidation reruns
        LinkSuggestion::dismiss(&pending[0].id, "user1", &db)
            .await
            .expect("dismiss");
        let recreated = LinkSuggestion::upsert_pending("user1", "a", "b", 0.82, &db)
            .await
            .expect("rerun upsert");
        assert!(!recreated);
        let pending_after = LinkSuggestion::pending_for_user("user1", 10, &db)
            .await
            .expect("pending list after dismiss");
        assert!(pending_after.is_empty());
    }

    #[tokio::test]
    async fn test_accept_creates_wikilink_and_updates_status() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        LinkSuggestion::upsert_pending("user1", "a", "b", 0.82, &db)
            .await
            .expect("create suggestion");
        let pending = LinkSuggestion::pending_for_user("user1", 10, &db)
            .await
            .expect("pending list");
        let suggestion = pending.first().expect("one pending suggestion");

        LinkSuggestion::accept(&suggestion.id, "user1", &db)
            .await
            .expect("accept");

        assert!(NoteLink::exists_between("user1", "a", "b", &db)
            .await
            .expect("wikilink exists"));

        let reloaded: LinkSuggestion = db
            .get_item(&suggestion.id)
            .await
            .expect("fetch")
            .expect("suggestion exists");
        assert_eq!(reloaded.status, SuggestionStatus::Accepted);
    }

    #[tokio::test]
    async fn test_accept_enforces_ownership() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        LinkSuggestion::upsert_pending("user1", "a", "b", 0.82, &db)
            .await
            .expect("create suggestion");
        let pending = LinkSuggestion::pending_for_user("user1", 10, &db)
            .await
            .expect("pending list");

        let denied = LinkSuggestion::accept(&pending[0].id, "intruder", &db).await;
        assert!(matches!(denied, Err(AppError::Auth(_))));
    }
}
