use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BrainFileKind {
    Soul,
    Mnemosyne,
    Memory,
    UserProfile,
    Askimap,
    Topic,
}

impl BrainFileKind {
    /// Core files survive rebuilds when the user has edited them.
    pub fn is_core(&self) -> bool {
        !matches!(self, BrainFileKind::Topic)
    }
}

stored_object!(BrainFile, "brain_file", {
    user_id: String,
    file_key: String,
    file_type: BrainFileKind,
    title: String,
    content: String,
    compressed_content: Option<String>,
    compressed_token_count: u32,
    community_id: Option<i64>,
    #[serde(default)]
    topic_keywords: Vec<String>,
    #[serde(default)]
    source_note_ids: Vec<String>,
    token_count_approx: u32,
    embedding: Option<Vec<f32>>,
    content_hash: String,
    version: u32,
    is_stale: bool,
    is_user_edited: bool
});

impl BrainFile {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: String,
        file_key: String,
        file_type: BrainFileKind,
        title: String,
        content: String,
        content_hash: String,
        token_count_approx: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id,
            file_key,
            file_type,
            title,
            content,
            compressed_content: None,
            compressed_token_count: 0,
            community_id: None,
            topic_keywords: Vec::new(),
            source_note_ids: Vec::new(),
            token_count_approx,
            embedding: None,
            content_hash,
            version: 1,
            is_stale: false,
            is_user_edited: false,
        }
    }

    pub async fn get_by_key(
        user_id: &str,
        file_key: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM brain_file WHERE user_id = $user_id AND file_key = $file_key \
                 LIMIT 1",
            )
            .bind(("user_id", user_id.to_owned()))
            .bind(("file_key", file_key.to_owned()))
            .await?;
        let files: Vec<Self> = response.take(0)?;
        Ok(files.into_iter().next())
    }

    pub async fn topics_for_user(
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM brain_file WHERE user_id = $user_id AND file_type = $file_type \
                 ORDER BY file_key ASC",
            )
            .bind(("user_id", user_id.to_owned()))
            .bind(("file_type", BrainFileKind::Topic))
            .await?;
        Ok(response.take(0)?)
    }

    /// Upsert a brain file by `(user_id, file_key)`, bumping the version.
    ///
    /// A user-edited core file is left untouched: builds must not clobber
    /// the owner's own words.
    pub async fn upsert(mut file: BrainFile, db: &SurrealDbClient) -> Result<(), AppError> {
        if let Some(existing) = Self::get_by_key(&file.user_id, &file.file_key, db).await? {
            if existing.is_user_edited && existing.file_type.is_core() {
                return Ok(());
            }

            file.id = existing.id.clone();
            file.created_at = existing.created_at;
            file.version = existing.version.saturating_add(1);
            file.is_user_edited = existing.is_user_edited;
            file.updated_at = Utc::now();

            let file_id = existing.id;
            db.client
                .query("UPDATE type::thing('brain_file', $id) CONTENT $file")
                .bind(("id", file_id))
                .bind(("file", file))
                .await?
                .check()?;
            return Ok(());
        }

        db.store_item(file).await?;
        Ok(())
    }

    /// Write new content while flagging the file as user-edited.
    pub async fn save_user_edit(
        user_id: &str,
        file_key: &str,
        content: String,
        content_hash: String,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let existing = Self::get_by_key(user_id, file_key, db)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Brain file '{file_key}' not found")))?;

        db.client
            .query(
                "UPDATE type::thing('brain_file', $id) SET content = $content, \
                 content_hash = $hash, is_user_edited = true, version += 1, \
                 updated_at = time::now()",
            )
            .bind(("id", existing.id))
            .bind(("content", content))
            .bind(("hash", content_hash))
            .await?;
        Ok(())
    }

    /// Delete topic files whose key is not part of the latest build.
    pub async fn delete_topics_not_in(
        user_id: &str,
        current_keys: &[String],
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "DELETE brain_file WHERE user_id = $user_id AND file_type = $file_type AND \
                 file_key NOTINSIDE $keys",
            )
            .bind(("user_id", user_id.to_owned()))
            .bind(("file_type", BrainFileKind::Topic))
            .bind(("keys", current_keys.to_vec()))
            .await?;
        Ok(())
    }

    pub async fn clear_stale_flags(user_id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        db.client
            .query("UPDATE brain_file SET is_stale = false WHERE user_id = $user_id")
            .bind(("user_id", user_id.to_owned()))
            .await?;
        Ok(())
    }

    pub async fn mark_stale(
        user_id: &str,
        file_keys: &[String],
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE brain_file SET is_stale = true WHERE user_id = $user_id AND \
                 file_key INSIDE $keys",
            )
            .bind(("user_id", user_id.to_owned()))
            .bind(("keys", file_keys.to_vec()))
            .await?;
        Ok(())
    }

    pub async fn mark_all_topics_stale(
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE brain_file SET is_stale = true WHERE user_id = $user_id AND \
                 (file_type = $topic OR file_key INSIDE ['askimap', 'mnemosyne'])",
            )
            .bind(("user_id", user_id.to_owned()))
            .bind(("topic", BrainFileKind::Topic))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(user_id: &str, key: &str) -> BrainFile {
        BrainFile {
            file_type: BrainFileKind::Topic,
            ..BrainFile::new(
                user_id.into(),
                key.into(),
                BrainFileKind::Topic,
                format!("Topic {key}"),
                "content".into(),
                "hash".into(),
                10,
            )
        }
    }

    #[tokio::test]
    async fn test_upsert_bumps_version() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        BrainFile::upsert(topic("user1", "topic_0"), &db)
            .await
            .expect("first upsert");
        let mut updated = topic("user1", "topic_0");
        updated.content = "new content".into();
        BrainFile::upsert(updated, &db).await.expect("second upsert");

        let file = BrainFile::get_by_key("user1", "topic_0", &db)
            .await
            .expect("fetch")
            .expect("exists");
        assert_eq!(file.version, 2);
        assert_eq!(file.content, "new content");
    }

    #[tokio::test]
    async fn test_user_edited_core_file_is_preserved() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        let mut soul = BrainFile::new(
            "user1".into(),
            "soul".into(),
            BrainFileKind::Soul,
            "Soul".into(),
            "my own words".into(),
            "hash1".into(),
            5,
        );
        soul.is_user_edited = true;
        db.store_item(soul).await.expect("store soul");

        let rebuilt = BrainFile::new(
            "user1".into(),
            "soul".into(),
            BrainFileKind::Soul,
            "Soul".into(),
            "generated default".into(),
            "hash2".into(),
            5,
        );
        BrainFile::upsert(rebuilt, &db).await.expect("upsert");

        let file = BrainFile::get_by_key("user1", "soul", &db)
            .await
            .expect("fetch")
            .expect("exists");
        assert_eq!(file.content, "my own words");
        assert!(file.is_user_edited);
    }

    #[tokio::test]
    async fn test_delete_topics_not_in_keeps_current_build() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        BrainFile::upsert(topic("user1", "topic_0"), &db)
            .await
            .expect("topic 0");
        BrainFile::upsert(topic("user1", "topic_1"), &db)
            .await
            .expect("topic 1");

        BrainFile::delete_topics_not_in("user1", &["topic_1".to_owned()], &db)
            .await
            .expect("cleanup");

        let topics = BrainFile::topics_for_user("user1", &db)
            .await
            .expect("topics");
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].file_key, "topic_1");
    }
}
