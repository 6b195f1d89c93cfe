use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(CommunityMetadata, "community_metadata", {
    user_id: String,
    community_id: i64,
    label: Option<String>,
    node_count: u32,
    #[serde(default)]
    top_terms: Vec<String>,
    center_x: f32,
    center_y: f32
});

impl CommunityMetadata {
    pub fn new(
        user_id: String,
        community_id: i64,
        node_count: u32,
        top_terms: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id,
            community_id,
            label: None,
            node_count,
            top_terms,
            center_x: 0.0,
            center_y: 0.0,
        }
    }

    /// Replace the owner's community metadata with a fresh clustering run.
    /// Cluster ids may renumber across runs, so replacement is wholesale.
    pub async fn replace_for_user(
        user_id: &str,
        communities: Vec<CommunityMetadata>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let mut query = String::from(
            "BEGIN TRANSACTION;\nDELETE community_metadata WHERE user_id = $user_id;\n",
        );
        for index in 0..communities.len() {
            query.push_str(&format!(
                "CREATE type::thing('community_metadata', $id_{index}) CONTENT $community_{index};\n"
            ));
        }
        query.push_str("COMMIT TRANSACTION;");

        let mut prepared = db.client.query(query).bind(("user_id", user_id.to_owned()));
        for (index, community) in communities.into_iter().enumerate() {
            prepared = prepared
                .bind((format!("id_{index}"), community.id.clone()))
                .bind((format!("community_{index}"), community));
        }
        prepared.await?.check()?;
        Ok(())
    }

    pub async fn all_for_user(user_id: &str, db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM community_metadata WHERE user_id = $user_id \
                 ORDER BY node_count DESC",
            )
            .bind(("user_id", user_id.to_owned()))
            .await?;
        Ok(response.take(0)?)
    }

    pub async fn get_by_community_id(
        user_id: &str,
        community_id: i64,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM community_metadata WHERE user_id = $user_id AND \
                 community_id = $community_id LIMIT 1",
            )
            .bind(("user_id", user_id.to_owned()))
            .bind(("community_id", community_id))
            .await?;
        let rows: Vec<Self> = response.take(0)?;
        Ok(rows.into_iter().next())
    }
}
