use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

// Sealed per-owner cloud credential. The plaintext key never touches the
// database; sealing happens in llm::credentials with the process-wide
// encryption key.
stored_object!(UserApiKey, "user_api_key", {
    user_id: String,
    provider: String,
    sealed_key: String,
    nonce: String
});

impl UserApiKey {
    pub fn new(user_id: String, provider: String, sealed_key: String, nonce: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id,
            provider,
            sealed_key,
            nonce,
        }
    }

    pub async fn get_for_user(
        user_id: &str,
        provider: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM user_api_key WHERE user_id = $user_id AND provider = $provider \
                 LIMIT 1",
            )
            .bind(("user_id", user_id.to_owned()))
            .bind(("provider", provider.to_owned()))
            .await?;
        let keys: Vec<Self> = response.take(0)?;
        Ok(keys.into_iter().next())
    }

    /// Replace any previous key for the provider.
    pub async fn store_replacing(self, db: &SurrealDbClient) -> Result<(), AppError> {
        db.client
            .query("DELETE user_api_key WHERE user_id = $user_id AND provider = $provider")
            .bind(("user_id", self.user_id.clone()))
            .bind(("provider", self.provider.clone()))
            .await?;
        db.store_item(self).await?;
        Ok(())
    }
}
