use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use common::{
    error::AppError,
    llm::LlmProvider,
    storage::{
        db::SurrealDbClient,
        types::{brain_conversation::BrainConversation, brain_message::BrainMessage},
    },
};

use crate::{
    prompts::{fill, CONVERSATION_SUMMARY_PROMPT},
    topics::call_generate,
};

/// New messages required before the rolling summary refreshes.
pub const SUMMARY_THRESHOLD: u32 = 5;
const MAX_SUMMARY_CHARS: usize = 2000;

pub fn should_update_summary(conversation: &BrainConversation) -> bool {
    conversation.messages_since_summary >= SUMMARY_THRESHOLD
}

/// Condense older messages into the conversation's rolling summary.
///
/// Combines the fresh segment summary with the existing one and, when the
/// combination outgrows its cap, re-summarizes the whole thing.
pub async fn update_conversation_summary(
    db: &SurrealDbClient,
    provider: &Arc<dyn LlmProvider>,
    model: &str,
    conversation: &BrainConversation,
) -> Result<bool, AppError> {
    let since = conversation
        .summary_updated_at
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let messages = BrainMessage::since(&conversation.id, since, db).await?;
    if (messages.len() as u32) < SUMMARY_THRESHOLD {
        return Ok(false);
    }

    let Some(new_summary) = summarize_messages(provider, model, &messages).await else {
        warn!(conversation_id = %conversation.id, "Conversation summarization failed");
        return Ok(false);
    };

    let combined = match &conversation.conversation_summary {
        Some(existing) if !existing.is_empty() => {
            let merged = format!("{existing}\n\n{new_summary}");
            if merged.len() > MAX_SUMMARY_CHARS {
                recondense(provider, model, &merged)
                    .await
                    .unwrap_or_else(|| merged.chars().take(MAX_SUMMARY_CHARS).collect())
            } else {
                merged
            }
        }
        _ => new_summary,
    };

    BrainConversation::save_summary(&conversation.id, combined, db).await?;
    info!(conversation_id = %conversation.id, "Rolling summary updated");
    Ok(true)
}

async fn summarize_messages(
    provider: &Arc<dyn LlmProvider>,
    model: &str,
    messages: &[BrainMessage],
) -> Option<String> {
    if messages.is_empty() {
        return None;
    }

    let text = messages
        .iter()
        .map(|message| {
            let content: String = message.content.chars().take(500).collect();
            format!("{}: {content}", message.role)
        })
        .collect::<Vec<_>>()
        .join("\n");

    let prompt = fill(CONVERSATION_SUMMARY_PROMPT, &[("messages", text.as_str())]);
    call_generate(provider, model, 0.3, prompt)
        .await
        .map(|summary| summary.trim().to_owned())
}

async fn recondense(
    provider: &Arc<dyn LlmProvider>,
    model: &str,
    combined: &str,
) -> Option<String> {
    let prompt = fill(CONVERSATION_SUMMARY_PROMPT, &[("messages", combined)]);
    call_generate(provider, model, 0.3, prompt)
        .await
        .map(|summary| summary.trim().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_gate() {
        let mut conversation = BrainConversation::new("u".into(), "Chat".into());
        assert!(!should_update_summary(&conversation));

        conversation.messages_since_summary = SUMMARY_THRESHOLD;
        assert!(should_update_summary(&conversation));
    }
}
