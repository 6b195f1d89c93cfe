use surrealdb::opt::PatchOp;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::chat_message::ChatMessage;

stored_object!(Conversation, "conversation", {
    user_id: String,
    title: String
});

impl Conversation {
    pub fn new(user_id: String, title: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id,
            title,
        }
    }

    /// Derive a short conversation title from the opening query.
    pub fn title_from_query(query: &str) -> String {
        let trimmed = query.trim();
        let mut title: String = trimmed.chars().take(60).collect();
        if trimmed.chars().count() > 60 {
            title.push('…');
        }
        if title.is_empty() {
            title = "New conversation".to_owned();
        }
        title
    }

    pub async fn get_complete_conversation(
        conversation_id: &str,
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(Self, Vec<ChatMessage>), AppError> {
        let conversation: Conversation = db
            .get_item(conversation_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Conversation not found".to_string()))?;

        if conversation.user_id != user_id {
            return Err(AppError::Auth(
                "You don't have access to this conversation".to_string(),
            ));
        }

        let messages: Vec<ChatMessage> = db
            .client
            .query(
                "SELECT * FROM type::table($table_name) WHERE conversation_id = $conversation_id \
                 ORDER BY created_at",
            )
            .bind(("table_name", ChatMessage::table_name()))
            .bind(("conversation_id", conversation_id.to_string()))
            .await?
            .take(0)?;

        Ok((conversation, messages))
    }

    /// Recent history formatted for multi-turn prompting: last six turns,
    /// each truncated to 300 chars.
    pub async fn recent_history(
        conversation_id: &str,
        db: &SurrealDbClient,
    ) -> Result<String, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM type::table($table_name) WHERE conversation_id = $conversation_id \
                 ORDER BY created_at DESC LIMIT 6",
            )
            .bind(("table_name", ChatMessage::table_name()))
            .bind(("conversation_id", conversation_id.to_string()))
            .await?;
        let mut messages: Vec<ChatMessage> = response.take(0)?;
        messages.reverse();

        let lines: Vec<String> = messages
            .iter()
            .map(|msg| {
                let content: String = msg.content.chars().take(300).collect();
                format!("{}: {content}", msg.role)
            })
            .collect();

        Ok(lines.join("\n"))
    }

    pub async fn touch(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        let _updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::from(Utc::now()),
            ))
            .await?;
        Ok(())
    }
}
