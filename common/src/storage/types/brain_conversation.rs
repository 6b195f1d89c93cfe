use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

// Separate history track for brain chat, carrying the rolling summary state.
stored_object!(BrainConversation, "brain_conversation", {
    user_id: String,
    title: String,
    conversation_summary: Option<String>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    summary_updated_at: Option<DateTime<Utc>>,
    messages_since_summary: u32
});

impl BrainConversation {
    pub fn new(user_id: String, title: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id,
            title,
            conversation_summary: None,
            summary_updated_at: None,
            messages_since_summary: 0,
        }
    }

    pub async fn get_owned(
        id: &str,
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let conversation: Self = db
            .get_item(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Brain conversation not found".into()))?;
        if conversation.user_id != user_id {
            return Err(AppError::Auth(
                "You don't have access to this conversation".into(),
            ));
        }
        Ok(conversation)
    }

    pub async fn increment_message_counter(
        id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing('brain_conversation', $id) SET \
                 messages_since_summary += 1, updated_at = time::now()",
            )
            .bind(("id", id.to_owned()))
            .await?;
        Ok(())
    }

    pub async fn save_summary(
        id: &str,
        summary: String,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing('brain_conversation', $id) SET \
                 conversation_summary = $summary, summary_updated_at = time::now(), \
                 messages_since_summary = 0, updated_at = time::now()",
            )
            .bind(("id", id.to_owned()))
            .bind(("summary", summary))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_message_counter_and_summary_reset() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        let conversation = BrainConversation::new("user1".into(), "Chat".into());
        db.store_item(conversation.clone())
            .await
            .expect("store conversation");

        for _ in 0..3 {
            BrainConversation::increment_message_counter(&conversation.id, &db)
                .await
                .expect("increment");
        }

        let loaded: BrainConversation = db
            .get_item(&conversation.id)
            .await
            .expect("fetch")
            .expect("exists");
        assert_eq!(loaded.messages_since_summary, 3);

        BrainConversation::save_summary(&conversation.id, "summary".into(), &db)
            .await
            .expect("save summary");
        let after: BrainConversation = db
            .get_item(&conversation.id)
            .await
            .expect("fetch")
            .expect("exists");
        assert_eq!(after.messages_since_summary, 0);
        assert_eq!(after.conversation_summary.as_deref(), Some("summary"));
        assert!(after.summary_updated_at.is_some());
    }
}
