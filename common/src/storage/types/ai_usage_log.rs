use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(AiUsageLog, "ai_usage_log", {
    user_id: String,
    provider: String,
    model: String,
    input_tokens: u64,
    output_tokens: u64,
    estimated_cost_usd: f64,
    use_case: String,
    conversation_id: Option<String>
});

impl AiUsageLog {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: String,
        provider: String,
        model: String,
        input_tokens: u64,
        output_tokens: u64,
        estimated_cost_usd: f64,
        use_case: String,
        conversation_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id,
            provider,
            model,
            input_tokens,
            output_tokens,
            estimated_cost_usd,
            use_case,
            conversation_id,
        }
    }

    /// Totals over the last `days` days for the user's usage view.
    pub async fn summary(
        user_id: &str,
        days: i64,
        db: &SurrealDbClient,
    ) -> Result<(u64, u64, f64, usize), AppError> {
        let since = Utc::now() - chrono::Duration::days(days);

        let mut response = db
            .query(
                "SELECT * FROM ai_usage_log WHERE user_id = $user_id AND created_at >= $since",
            )
            .bind(("user_id", user_id.to_owned()))
            .bind(("since", surrealdb::sql::Datetime::from(since)))
            .await?;
        let rows: Vec<Self> = response.take(0)?;

        let input: u64 = rows.iter().map(|r| r.input_tokens).sum();
        let output: u64 = rows.iter().map(|r| r.output_tokens).sum();
        let cost: f64 = rows.iter().map(|r| r.estimated_cost_usd).sum();
        Ok((input, output, cost, rows.len()))
    }
}
