use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(User, "user", {
    email: String,
    api_key: Option<String>,
    admin: bool
});

impl User {
    pub fn new(email: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            email,
            api_key: Some(Uuid::new_v4().to_string()),
            admin: false,
        }
    }

    pub async fn find_by_api_key(
        api_key: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query("SELECT * FROM type::table($table) WHERE api_key = $api_key LIMIT 1")
            .bind(("table", Self::table_name()))
            .bind(("api_key", api_key.to_owned()))
            .await?;

        let users: Vec<Self> = response.take(0)?;
        Ok(users.into_iter().next())
    }
}
