use chrono::Duration;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// AI analysis lifecycle shared by documents and images.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Queued,
    Processing,
    NeedsReview,
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Queued => "queued",
            AnalysisStatus::Processing => "processing",
            AnalysisStatus::NeedsReview => "needs_review",
            AnalysisStatus::Completed => "completed",
            AnalysisStatus::Failed => "failed",
        }
    }

    /// Whether analysis has progressed far enough for embeddings to run.
    pub fn past_processing(&self) -> bool {
        matches!(
            self,
            AnalysisStatus::NeedsReview | AnalysisStatus::Completed
        )
    }
}

stored_object!(Document, "document", {
    user_id: String,
    filename: String,
    filepath: String,
    mime_type: String,
    file_size: u64,
    extracted_text: Option<String>,
    page_count: u32,
    ai_summary: Option<String>,
    #[serde(default)]
    suggested_tags: Vec<String>,
    #[serde(default)]
    suggested_wikilinks: Vec<String>,
    ai_analysis_status: AnalysisStatus,
    analysis_error: Option<String>,
    summary_note_id: Option<String>,
    embedding: Option<Vec<f32>>,
    is_trashed: bool
});

impl Document {
    pub fn new(
        user_id: String,
        filename: String,
        filepath: String,
        mime_type: String,
        file_size: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id,
            filename,
            filepath,
            mime_type,
            file_size,
            extracted_text: None,
            page_count: 0,
            ai_summary: None,
            suggested_tags: Vec::new(),
            suggested_wikilinks: Vec::new(),
            ai_analysis_status: AnalysisStatus::Queued,
            analysis_error: None,
            summary_note_id: None,
            embedding: None,
            is_trashed: false,
        }
    }

    pub async fn set_status(
        id: &str,
        status: AnalysisStatus,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing('document', $id) SET ai_analysis_status = $status, \
                 updated_at = time::now()",
            )
            .bind(("id", id.to_owned()))
            .bind(("status", status))
            .await?;
        Ok(())
    }

    pub async fn mark_failed(
        id: &str,
        error: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing('document', $id) SET ai_analysis_status = $status, \
                 analysis_error = $error, updated_at = time::now()",
            )
            .bind(("id", id.to_owned()))
            .bind(("status", AnalysisStatus::Failed))
            .bind(("error", error.to_owned()))
            .await?;
        Ok(())
    }

    /// Reset documents stuck in `processing` past the cutoff back to failed
    /// so callers can retry them. Returns the affected document ids.
    pub async fn reset_stuck(
        older_than: Duration,
        db: &SurrealDbClient,
    ) -> Result<Vec<String>, AppError> {
        let cutoff = Utc::now() - older_than;
        let mut response = db
            .query(
                "UPDATE document SET ai_analysis_status = $failed, \
                 analysis_error = 'Stuck in processing, reset by recovery' \
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

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_status_transitions() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        let doc = Document::new(
            "user1".into(),
            "report.pdf".into(),
            "/data/report.pdf".into(),
            "application/pdf".into(),
            1024,
        );
        assert_eq!(doc.ai_analysis_status, AnalysisStatus::Queued);
        db.store_item(doc.clone()).await.expect("store document");

        Document::set_status(&doc.id, AnalysisStatus::Processing, &db)
            .await
            .expect("set processing");
        Document::mark_failed(&doc.id, "extraction failed", &db)
            .await
            .expect("mark failed");

        let reloaded: Document = db
            .get_item(&doc.id)
            .await
            .expect("fetch")
            .expect("document exists");
        assert_eq!(reloaded.ai_analysis_status, AnalysisStatus::Failed);
        assert_eq!(reloaded.analysis_error.as_deref(), Some("extraction failed"));
    }

    #[tokio::test]
    async fn test_reset_stuck_only_touches_old_processing_rows() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        let mut stuck = Document::new(
            "user1".into(),
            "old.pdf".into(),
            "/data/old.pdf".into(),
            "application/pdf".into(),
            10,
        );
        stuck.ai_analysis_status = AnalysisStatus::Processing;
        stuck.updated_at = Utc::now() - Duration::minutes(30);

        let mut fresh = Document::new(
            "user1".into(),
            "new.pdf".into(),
            "/data/new.pdf".into(),
            "application/pdf".into(),
            10,
        );
        fresh.ai_analysis_status = AnalysisStatus::Processing;

        db.store_item(stuck.clone()).await.expect("store stuck");
        db.store_item(fresh.clone()).await.expect("store fresh");

        let reset = Document::reset_stuck(Duration::minutes(10), &db)
            .await
            .expect("reset stuck documents");
        assert_eq!(reset, vec![stuck.id.clone()]);

        let fresh_reloaded: Document = db
            .get_item(&fresh.id)
            .await
            .expect("fetch")
            .expect("fresh exists");
        assert_eq!(
            fresh_reloaded.ai_analysis_status,
            AnalysisStatus::Processing
        );
    }
}
