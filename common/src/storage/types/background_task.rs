use chrono::Duration;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// Which way a note changed, for incremental brain updates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoteChange {
    Created,
    Updated,
    Deleted,
}

/// The unit of background work. Every variant is idempotent with respect
/// to its primary entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskPayload {
    DocumentAnalyze { document_id: String },
    DocumentEmbed { document_id: String },
    ImageAnalyze { image_id: String },
    NoteEmbed { note_id: String },
    BrainBuild { build_type: String },
    BrainIncremental { note_id: String, change: NoteChange },
    BrainMarkStale { note_id: Option<String> },
    MemoryEvolve { conversation_id: String },
    ConversationSummary { conversation_id: String },
    Consolidation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Dead,
}

pub const MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_LEASE_SECS: i64 = 600;

/// Backoff before the next attempt: 120s, 240s, 360s.
pub fn retry_backoff(attempts: u32) -> Duration {
    Duration::seconds(120 * i64::from(attempts.max(1)))
}

stored_object!(BackgroundTask, "background_task", {
    payload: TaskPayload,
    status: TaskStatus,
    user_id: String,
    attempts: u32,
    #[serde(
        serialize_with = "serialize_datetime",
        deserialize_with = "deserialize_datetime",
        default
    )]
    scheduled_at: DateTime<Utc>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    lease_expires_at: Option<DateTime<Utc>>,
    worker_id: Option<String>,
    last_error: Option<String>
});

impl BackgroundTask {
    pub fn new(payload: TaskPayload, user_id: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            payload,
            status: TaskStatus::Pending,
            user_id,
            attempts: 0,
            scheduled_at: now,
            lease_expires_at: None,
            worker_id: None,
            last_error: None,
        }
    }

    /// Create a task and store it, due immediately.
    pub async fn enqueue(
        payload: TaskPayload,
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<String, AppError> {
        let task = Self::new(payload, user_id.to_owned());
        let id = task.id.clone();
        db.store_item(task).await?;
        Ok(id)
    }

    /// Create a task due after the given delay.
    pub async fn enqueue_in(
        payload: TaskPayload,
        user_id: &str,
        delay: Duration,
        db: &SurrealDbClient,
    ) -> Result<String, AppError> {
        let mut task = Self::new(payload, user_id.to_owned());
        task.scheduled_at = Utc::now() + delay;
        let id = task.id.clone();
        db.store_item(task).await?;
        Ok(id)
    }

    /// Claim the oldest ready task: pending and due, or processing with an
    /// expired lease (delivery is at-least-once). The claim increments
    /// `attempts` and takes a fresh lease in a single statement.
    pub async fn claim_next_ready(
        db: &SurrealDbClient,
        worker_id: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<Self>, AppError> {
        let lease_until = now + lease;
        let mut response = db
            .query(
                "LET $candidate = (SELECT VALUE id FROM background_task WHERE \
                   ((status = 'Pending') OR \
                    (status = 'Processing' AND lease_expires_at != NONE AND lease_expires_at < $now)) \
                   AND scheduled_at <= $now \
                   ORDER BY created_at ASC LIMIT 1)[0]; \
                 IF $candidate != NONE THEN \
                   (UPDATE $candidate SET status = 'Processing', worker_id = $worker_id, \
                    attempts += 1, lease_expires_at = $lease_until, updated_at = $now \
                    RETURN AFTER) \
                 ELSE [] END;",
            )
            .bind(("now", surrealdb::sql::Datetime::from(now)))
            .bind(("worker_id", worker_id.to_owned()))
            .bind(("lease_until", surrealdb::sql::Datetime::from(lease_until)))
            .await?;

        let claimed: Vec<Self> = response.take(1)?;
        Ok(claimed.into_iter().next())
    }

    pub fn can_retry(&self) -> bool {
        self.attempts < MAX_ATTEMPTS
    }

    pub async fn mark_succeeded(&self, db: &SurrealDbClient) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing('background_task', $id) SET status = $status, \
                 lease_expires_at = NONE, updated_at = time::now()",
            )
            .bind(("id", self.id.clone()))
            .bind(("status", TaskStatus::Completed))
            .await?;
        Ok(())
    }

    /// Schedule another attempt after the backoff delay.
    pub async fn mark_retry(
        &self,
        error: &str,
        delay: Duration,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let next_run = Utc::now() + delay;
        db.client
            .query(
                "UPDATE type::thing('background_task', $id) SET status = $status, \
                 last_error = $error, scheduled_at = $next_run, lease_expires_at = NONE, \
                 updated_at = time::now()",
            )
            .bind(("id", self.id.clone()))
            .bind(("status", TaskStatus::Pending))
            .bind(("error", error.to_owned()))
            .bind(("next_run", surrealdb::sql::Datetime::from(next_run)))
            .await?;
        Ok(())
    }

    /// Terminal failure; the row stays for inspection.
    pub async fn mark_dead(&self, error: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing('background_task', $id) SET status = $status, \
                 last_error = $error, lease_expires_at = NONE, updated_at = time::now()",
            )
            .bind(("id", self.id.clone()))
            .bind(("status", TaskStatus::Dead))
            .bind(("error", error.to_owned()))
            .await?;
        Ok(())
    }
}
