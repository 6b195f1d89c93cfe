use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(Tag, "tag", {
    user_id: String,
    name: String
});

impl Tag {
    pub fn new(user_id: String, name: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id,
            name,
        }
    }

    /// Fetch the tag for an owner, creating it if it does not exist.
    pub async fn get_or_create(
        user_id: &str,
        name: &str,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let normalized = name.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(AppError::Validation("Tag name cannot be empty".into()));
        }

        let mut response = db
            .query("SELECT * FROM tag WHERE user_id = $user_id AND name = $name LIMIT 1")
            .bind(("user_id", user_id.to_owned()))
            .bind(("name", normalized.clone()))
            .await?;
        let existing: Vec<Self> = response.take(0)?;
        if let Some(tag) = existing.into_iter().next() {
            return Ok(tag);
        }

        let tag = Tag::new(user_id.to_owned(), normalized);
        db.store_item(tag.clone()).await?;
        Ok(tag)
    }

    pub async fn all_for_user(user_id: &str, db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query("SELECT * FROM tag WHERE user_id = $user_id ORDER BY name ASC")
            .bind(("user_id", user_id.to_owned()))
            .await?;
        Ok(response.take(0)?)
    }

    /// Per-tag usage counts over the owner's live notes, most used first.
    pub async fn note_counts(
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<(String, usize)>, AppError> {
        #[derive(serde::Deserialize)]
        struct Row {
            tag_ids: Vec<String>,
        }

        let mut response = db
            .query(
                "SELECT tag_ids FROM note WHERE user_id = $user_id AND is_trashed = false \
                 AND array::len(tag_ids) > 0",
            )
            .bind(("user_id", user_id.to_owned()))
            .await?;
        let rows: Vec<Row> = response.take(0)?;

        let tags = Self::all_for_user(user_id, db).await?;
        let mut counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        for row in rows {
            for tag_id in row.tag_ids {
                *counts.entry(tag_id).or_insert(0) += 1;
            }
        }

        let mut named: Vec<(String, usize)> = tags
            .into_iter()
            .filter_map(|tag| counts.get(&tag.id).map(|count| (tag.name, *count)))
            .collect();
        named.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(named)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::note::{Note, NoteOrigin};

    #[tokio::test]
    async fn test_get_or_create_normalizes_and_dedupes() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        let first = Tag::get_or_create("user1", "  Docker ", &db)
            .await
            .expect("create tag");
        assert_eq!(first.name, "docker");

        let second = Tag::get_or_create("user1", "docker", &db)
            .await
            .expect("fetch tag");
        assert_eq!(first.id, second.id);

        assert!(Tag::get_or_create("user1", "   ", &db).await.is_err());
    }

    #[tokio::test]
    async fn test_note_counts_ignores_trashed_notes() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        let tag = Tag::get_or_create("user1", "docker", &db)
            .await
            .expect("create tag");

        let mut live = Note::new(
            "user1".into(),
            "Live".into(),
            String::new(),
            NoteOrigin::Manual,
        );
        live.tag_ids = vec![tag.id.clone()];
        let mut trashed = Note::new(
            "user1".into(),
            "Trashed".into(),
            String::new(),
            NoteOrigin::Manual,
        );
        trashed.tag_ids = vec![tag.id.clone()];
        trashed.is_trashed = true;

        db.store_item(live).await.expect("store live");
        db.store_item(trashed).await.expect("store trashed");

        let counts = Tag::note_counts("user1", &db).await.expect("counts");
        assert_eq!(counts, vec![("docker".to_owned(), 1)]);
    }
}
