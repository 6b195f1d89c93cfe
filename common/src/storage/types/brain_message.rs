use uuid::Uuid;

use super::chat_message::MessageRole;
use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(BrainMessage, "brain_message", {
    conversation_id: String,
    user_id: String,
    role: MessageRole,
    content: String,
    #[serde(default)]
    brain_files_loaded: Vec<String>,
    #[serde(default)]
    topics_matched: Vec<String>
});

impl BrainMessage {
    pub fn new(
        conversation_id: String,
        user_id: String,
        role: MessageRole,
        content: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            conversation_id,
            user_id,
            role,
            content,
            brain_files_loaded: Vec::new(),
            topics_matched: Vec::new(),
        }
    }

    pub async fn for_conversation(
        conversation_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM brain_message WHERE conversation_id = $conversation_id \
                 ORDER BY created_at ASC",
            )
            .bind(("conversation_id", conversation_id.to_owned()))
            .await?;
        Ok(response.take(0)?)
    }

    /// Messages created after the given instant, oldest first.
    pub async fn since(
        conversation_id: &str,
        after: DateTime<Utc>,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM brain_message WHERE conversation_id = $conversation_id AND \
                 created_at > $after ORDER BY created_at ASC",
            )
            .bind(("conversation_id", conversation_id.to_owned()))
            .bind(("after", surrealdb::sql::Datetime::from(after)))
            .await?;
        Ok(response.take(0)?)
    }
}
