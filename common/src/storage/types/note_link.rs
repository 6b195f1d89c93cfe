use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

// Directed wikilink edge between two notes, deduplicated per ordered pair.
stored_object!(NoteLink, "note_link", {
    user_id: String,
    source_note_id: String,
    target_note_id: String
});

impl NoteLink {
    pub fn new(user_id: String, source_note_id: String, target_note_id: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id,
            source_note_id,
            target_note_id,
        }
    }

    /// Idempotently store an edge; the unique pair index absorbs duplicates.
    pub async fn upsert(
        user_id: &str,
        source_note_id: &str,
        target_note_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        if source_note_id == target_note_id {
            return Ok(());
        }

        let link = NoteLink::new(
            user_id.to_owned(),
            source_note_id.to_owned(),
            target_note_id.to_owned(),
        );

        // A duplicate insert violates the unique index; that is the dedup.
        match db.store_item(link).await {
            Ok(_) => Ok(()),
            Err(err) if err.to_string().contains("unique_note_link_pair") => Ok(()),
            Err(err) => Err(AppError::Database(err)),
        }
    }

    /// Replace all outgoing edges from a note, used when its content is
    /// re-resolved after an edit.
    pub async fn replace_outgoing(
        user_id: &str,
        source_note_id: &str,
        target_ids: &[String],
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query("DELETE note_link WHERE source_note_id = $source AND user_id = $user_id")
            .bind(("source", source_note_id.to_owned()))
            .bind(("user_id", user_id.to_owned()))
            .await?;

        let mut seen = std::collections::HashSet::new();
        for target in target_ids {
            if seen.insert(target.clone()) {
                Self::upsert(user_id, source_note_id, target, db).await?;
            }
        }
        Ok(())
    }

    pub async fn all_for_user(user_id: &str, db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query("SELECT * FROM note_link WHERE user_id = $user_id")
            .bind(("user_id", user_id.to_owned()))
            .await?;
        Ok(response.take(0)?)
    }

    pub async fn outgoing(
        user_id: &str,
        source_note_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM note_link WHERE user_id = $user_id AND source_note_id = $source",
            )
            .bind(("user_id", user_id.to_owned()))
            .bind(("source", source_note_id.to_owned()))
            .await?;
        Ok(response.take(0)?)
    }

    /// Whether a wikilink exists between two notes in either direction.
    pub async fn exists_between(
        user_id: &str,
        a: &str,
        b: &str,
        db: &SurrealDbClient,
    ) -> Result<bool, AppError> {
        let mut response = db
            .query(
                "SELECT VALUE record::id(id) FROM note_link WHERE user_id = $user_id AND \
                 ((source_note_id = $a AND target_note_id = $b) OR \
                  (source_note_id = $b AND target_note_id = $a)) LIMIT 1",
            )
            .bind(("user_id", user_id.to_owned()))
            .bind(("a", a.to_owned()))
            .bind(("b", b.to_owned()))
            .await?;
        let ids: Vec<String> = response.take(0)?;
        Ok(!ids.is_empty())
    }
}
