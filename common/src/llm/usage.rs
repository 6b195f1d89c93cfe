use tracing::warn;

use crate::storage::{db::SurrealDbClient, types::ai_usage_log::AiUsageLog};

use super::ProviderKind;

/// Cost per 1M tokens (input, output) in USD.
const COST_TABLE: &[(&str, f64, f64)] = &[
    // Anthropic
    ("claude-opus-4-0520", 15.0, 75.0),
    ("claude-sonnet-4-5-20250929", 3.0, 15.0),
    ("claude-sonnet-4-20250514", 3.0, 15.0),
    ("claude-haiku-4-5-20251001", 0.80, 4.0),
    // OpenAI
    ("gpt-4o", 2.50, 10.0),
    ("gpt-4o-mini", 0.15, 0.60),
    ("o1", 15.0, 60.0),
    ("o3-mini", 1.10, 4.40),
    ("gpt-4.1", 2.0, 8.0),
    ("gpt-4.1-mini", 0.40, 1.60),
];

/// Fallback rate for unknown models.
const DEFAULT_COST: (f64, f64) = (1.0, 3.0);

pub fn estimate_cost(model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    let (input_rate, output_rate) = COST_TABLE
        .iter()
        .find(|(id, _, _)| *id == model)
        .map_or(DEFAULT_COST, |(_, input, output)| (*input, *output));

    let cost = (input_tokens as f64 * input_rate + output_tokens as f64 * output_rate) / 1_000_000.0;
    (cost * 1_000_000.0).round() / 1_000_000.0
}

/// Persist one usage row. Local-provider calls are not billed and are
/// skipped entirely. Logging failures never break the caller's request.
#[allow(clippy::too_many_arguments)]
pub async fn log_usage(
    db: &SurrealDbClient,
    user_id: &str,
    provider: ProviderKind,
    model: &str,
    input_tokens: u64,
    output_tokens: u64,
    use_case: &str,
    conversation_id: Option<String>,
) {
    if provider == ProviderKind::Local {
        return;
    }

    let cost = estimate_cost(model, input_tokens, output_tokens);
    let row = AiUsageLog::new(
        user_id.to_owned(),
        provider.as_str().to_owned(),
        model.to_owned(),
        input_tokens,
        output_tokens,
        cost,
        use_case.to_owned(),
        conversation_id,
    );

    if let Err(err) = db.store_item(row).await {
        warn!(error = %err, "Failed to log token usage");
    }
}
