use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Running,
    Completed,
    Failed,
}

stored_object!(BrainBuildLog, "brain_build_log", {
    user_id: String,
    build_type: String,
    status: BuildStatus,
    progress_pct: u8,
    current_step: String,
    notes_processed: u32,
    communities_detected: u32,
    topic_files_generated: u32,
    total_tokens_generated: u32,
    error_message: Option<String>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    completed_at: Option<DateTime<Utc>>
});

impl BrainBuildLog {
    pub fn start(user_id: String, build_type: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id,
            build_type,
            status: BuildStatus::Running,
            progress_pct: 0,
            current_step: "Starting".to_owned(),
            notes_processed: 0,
            communities_detected: 0,
            topic_files_generated: 0,
            total_tokens_generated: 0,
            error_message: None,
            completed_at: None,
        }
    }

    pub async fn update_progress(
        id: &str,
        pct: u8,
        step: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing('brain_build_log', $id) SET progress_pct = $pct, \
                 current_step = $step, updated_at = time::now()",
            )
            .bind(("id", id.to_owned()))
            .bind(("pct", pct as i64))
            .bind(("step", step.to_owned()))
            .await?;
        Ok(())
    }

    pub async fn finish(
        id: &str,
        status: BuildStatus,
        error_message: Option<String>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        // Failure details are truncated so the log row stays bounded.
        let truncated = error_message.map(|msg| msg.chars().take(500).collect::<String>());
        db.client
            .query(
                "UPDATE type::thing('brain_build_log', $id) SET status = $status, \
                 error_message = $error, completed_at = time::now(), updated_at = time::now()",
            )
            .bind(("id", id.to_owned()))
            .bind(("status", status))
            .bind(("error", truncated))
            .await?;
        Ok(())
    }

    pub async fn set_counts(
        id: &str,
        notes: u32,
        communities: u32,
        topics: u32,
        tokens: u32,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing('brain_build_log', $id) SET notes_processed = $notes, \
                 communities_detected = $communities, topic_files_generated = $topics, \
                 total_tokens_generated = $tokens, updated_at = time::now()",
            )
            .bind(("id", id.to_owned()))
            .bind(("notes", notes as i64))
            .bind(("communities", communities as i64))
            .bind(("topics", topics as i64))
            .bind(("tokens", tokens as i64))
            .await?;
        Ok(())
    }
}
