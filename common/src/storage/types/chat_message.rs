#![allow(clippy::module_name_repetitions)]
use uuid::Uuid;

use crate::stored_object;

#[derive(Deserialize, Debug, Clone, Serialize, PartialEq)]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

stored_object!(ChatMessage, "chat_message", {
    conversation_id: String,
    user_id: String,
    role: MessageRole,
    content: String,
    confidence_score: Option<f32>,
    error_type: Option<String>
});

impl ChatMessage {
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
            confidence_score: None,
            error_type: None,
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "User"),
            MessageRole::Assistant => write!(f, "Assistant"),
            MessageRole::System => write!(f, "System"),
        }
    }
}

impl fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.role, self.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::db::SurrealDbClient;

    #[tokio::test]
    async fn test_message_persistence_round_trip() {
        let db = SurrealDbClient::memory("test_ns", &uuid::Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        let message = ChatMessage::new(
            "conversation1".into(),
            "user1".into(),
            MessageRole::User,
            "Hello world".into(),
        );
        db.store_item(message.clone()).await.expect("store message");

        let retrieved: Option<ChatMessage> =
            db.get_item(&message.id).await.expect("fetch message");
        assert_eq!(retrieved, Some(message));
    }

    #[test]
    fn test_role_display() {
        assert_eq!(format!("{}", MessageRole::User), "User");
        assert_eq!(format!("{}", MessageRole::Assistant), "Assistant");
    }
}
