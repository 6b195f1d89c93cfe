use chrono::Duration;
use uuid::Uuid;

use super::document::AnalysisStatus;
use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(Image, "image", {
    user_id: String,
    filename: String,
    filepath: String,
    blur_hash: Option<String>,
    display_name: Option<String>,
    ai_analysis_status: AnalysisStatus,
    ai_analysis_result: Option<String>,
    #[serde(default)]
    tag_ids: Vec<String>,
    album_id: Option<String>,
    embedding: Option<Vec<f32>>,
    is_trashed: bool,
    is_favorite: bool
});

impl Image {
    pub fn new(user_id: String, filename: String, filepath: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id,
            filename,
            filepath,
            blur_hash: None,
            display_name: None,
            ai_analysis_status: AnalysisStatus::Queued,
            ai_analysis_result: None,
            tag_ids: Vec::new(),
            album_id: None,
            embedding: None,
            is_trashed: false,
            is_favorite: false,
        }
    }

    pub async fn set_status(
        id: &str,
        status: AnalysisStatus,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing('image', $id) SET ai_analysis_status = $status, \
                 updated_at = time::now()",
            )
            .bind(("id", id.to_owned()))
            .bind(("status", status))
            .await?;
        Ok(())
    }

    /// Phase-1 commit of the analysis result. Enrichment that follows is
    /// best-effort and must not disturb this write.
    pub async fn save_analysis(
        id: &str,
        analysis: &str,
        embedding: Option<Vec<f32>>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing('image', $id) SET ai_analysis_result = $analysis, \
                 embedding = $embedding, ai_analysis_status = $status, updated_at = time::now()",
            )
            .bind(("id", id.to_owned()))
            .bind(("analysis", analysis.to_owned()))
            .bind(("embedding", embedding))
            .bind(("status", AnalysisStatus::Completed))
            .await?
            .check()?;
        Ok(())
    }

    pub async fn reset_stuck(
        older_than: Duration,
        db: &SurrealDbClient,
    ) -> Result<Vec<String>, AppError> {
        let cutoff = Utc::now() - older_than;
        let mut response = db
            .query(
                "UPDATE image SET ai_analysis_status = $failed \
                 WHERE ai_analysis_status = $processing AND updated_at < $cutoff \
                 RETURN VALUE record::id(id)",
            )
            .bind(("failed", AnalysisStatus::Failed))
            .bind(("processing", AnalysisStatus::Processing))
            .bind(("cutoff", surrealdb::sql::Datetime::from(cutoff)))
            .await?;
        let ids: Vec<String> = response.take(0)?;
        Ok(ids)
    }
}
