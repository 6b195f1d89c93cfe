use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::brain_file::BrainFile},
};
use tracing::info;

use crate::{
    estimate_tokens,
    prompts::{fill, BRAIN_SYSTEM_PROMPT, HONEST_ANSWER_NOTE},
    selector::TopicScore,
};

/// Result of two-tier context assembly.
#[derive(Debug, Clone)]
pub struct AssembledBrainContext {
    pub system_prompt: String,
    pub brain_files_used: Vec<String>,
    pub topics_matched: Vec<TopicScore>,
    pub total_tokens: usize,
    pub truncated: bool,
}

/// Build the brain chat system prompt.
///
/// Tier 1 is always present: soul, memory (when substantial) and the
/// Knowledge Map of every compressed topic summary. Tier 2 is the full
/// content of the selected topics, inside what remains of the budget.
/// When topics exist but none matched, the honest-answer note is
/// appended instead of pretending.
#[allow(clippy::too_many_lines)]
pub async fn assemble_context(
    db: &SurrealDbClient,
    user_id: &str,
    topic_scores: &[TopicScore],
    conversation_history: &str,
    context_budget: usize,
) -> Result<AssembledBrainContext, AppError> {
    let max_context = if context_budget == 0 { 6000 } else { context_budget };
    let core_budget = ((max_context * 2) / 5).max(1500);

    let soul = BrainFile::get_by_key(user_id, "soul", db).await?;
    let memory = BrainFile::get_by_key(user_id, "memory", db).await?;
    let overview = BrainFile::get_by_key(user_id, "mnemosyne", db).await?;
    let all_topics = BrainFile::topics_for_user(user_id, db).await?;

    let mut files_used: Vec<String> = Vec::new();
    let mut core_parts: Vec<String> = Vec::new();
    let mut core_tokens = 0usize;

    let soul_instructions = match &soul {
        Some(soul_file) => {
            files_used.push("soul".to_owned());
            core_tokens += soul_file.token_count_approx as usize;
            soul_file.content.clone()
        }
        None => String::new(),
    };

    if let Some(memory_file) = &memory {
        if memory_file.content.len() > 100 {
            let remaining = core_budget.saturating_sub(core_tokens);
            if remaining > 200 {
                let content = truncate_to_budget(&memory_file.content, remaining);
                core_tokens += estimate_tokens(&content);
                core_parts.push(format!("## Memory\n{content}"));
                files_used.push("memory".to_owned());
            }
        }
    }

    // Tier 1: the Knowledge Map is every compressed summary, always on
    let mut compressed_parts: Vec<String> = Vec::new();
    let mut compressed_tokens = 0usize;
    let has_compressed = all_topics
        .iter()
        .any(|topic| topic.compressed_content.is_some());

    if has_compressed {
        for topic in &all_topics {
            if let Some(summary) = &topic.compressed_content {
                compressed_parts.push(format!(
                    "**{}** ({}): {summary}",
                    topic.title, topic.file_key
                ));
                compressed_tokens += if topic.compressed_token_count > 0 {
                    topic.compressed_token_count as usize
                } else {
                    estimate_tokens(summary)
                };
            }
        }
        if !compressed_parts.is_empty() {
            files_used.push("knowledge_map".to_owned());
        }
    } else if let Some(overview_file) = &overview {
        // Builds before compression existed still get an index tier
        let content = truncate_to_budget(
            &overview_file.content,
            core_budget.saturating_sub(core_tokens),
        );
        core_tokens += estimate_tokens(&content);
        core_parts.push(format!("## Knowledge Overview\n{content}"));
        files_used.push("mnemosyne".to_owned());
    }

    let used_tokens = core_tokens + compressed_tokens;

    // Tier 2: deep topics fill what remains, less headroom for the answer
    let deep_budget = max_context.saturating_sub(used_tokens).saturating_sub(500);
    let mut topic_parts: Vec<String> = Vec::new();
    let mut topic_tokens = 0usize;
    let mut topics_matched: Vec<TopicScore> = Vec::new();

    for score in topic_scores {
        if topic_tokens >= deep_budget {
            break;
        }
        let Some(topic) = all_topics.iter().find(|t| t.file_key == score.file_key) else {
            continue;
        };
        let content = truncate_to_budget(&topic.content, deep_budget - topic_tokens);
        topic_tokens += estimate_tokens(&content);
        topic_parts.push(format!("## {}\n{content}", topic.title));
        files_used.push(score.file_key.clone());
        topics_matched.push(score.clone());
    }

    // Loaded-files banner for the model's own orientation
    let mut loaded_parts: Vec<String> = Vec::new();
    if has_compressed {
        loaded_parts.push(format!(
            "Knowledge Map: {} topics indexed",
            compressed_parts.len()
        ));
    } else {
        loaded_parts.push(format!(
            "Core: {}",
            files_used
                .iter()
                .filter(|key| *key == "mnemosyne" || *key == "memory")
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }
    if !topics_matched.is_empty() {
        loaded_parts.push(format!(
            "Deep: {}",
            topics_matched
                .iter()
                .map(|t| t.title.clone())
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }
    let loaded_summary = if loaded_parts.is_empty() {
        "No files loaded".to_owned()
    } else {
        loaded_parts.join("; ")
    };

    let mut system_prompt = fill(
        BRAIN_SYSTEM_PROMPT,
        &[
            ("soul_instructions", soul_instructions.as_str()),
            ("loaded_files_summary", loaded_summary.as_str()),
        ],
    );

    let mut knowledge_sections: Vec<String> = core_parts;
    if !compressed_parts.is_empty() {
        knowledge_sections.push(format!(
            "## Your Knowledge Map\n{}",
            compressed_parts.join("\n\n")
        ));
    }
    if !topic_parts.is_empty() {
        knowledge_sections.push("## Deep Knowledge (Selected Topics)".to_owned());
        knowledge_sections.extend(topic_parts);
    }

    if !all_topics.is_empty() && topics_matched.is_empty() {
        knowledge_sections.push(HONEST_ANSWER_NOTE.to_owned());
    }

    let knowledge_context = knowledge_sections.join("\n\n");
    if !knowledge_context.is_empty() {
        system_prompt.push_str("\n\n--- YOUR KNOWLEDGE ---\n");
        system_prompt.push_str(&knowledge_context);
        system_prompt.push_str("\n--- END KNOWLEDGE ---");
    }
    if !conversation_history.is_empty() {
        system_prompt.push_str("\n\n--- CONVERSATION CONTEXT ---\n");
        system_prompt.push_str(conversation_history);
        system_prompt.push_str("\n--- END CONVERSATION CONTEXT ---");
    }

    info!(
        prompt_chars = system_prompt.len(),
        files = ?files_used,
        deep_topics = topics_matched.len(),
        "Assembled brain context"
    );

    Ok(AssembledBrainContext {
        system_prompt,
        brain_files_used: files_used,
        topics_matched,
        total_tokens: used_tokens + topic_tokens,
        truncated: topic_tokens >= deep_budget && deep_budget > 0,
    })
}

/// Truncate to ~4 chars per token, preferring a sentence boundary.
fn truncate_to_budget(content: &str, token_budget: usize) -> String {
    let char_budget = token_budget * 4;
    if content.chars().count() <= char_budget {
        return content.to_owned();
    }

    let mut truncated: String = content.chars().take(char_budget).collect();
    if let Some(last_period) = truncated.rfind('.') {
        if last_period * 2 > truncated.len() {
            truncated.truncate(last_period + 1);
        }
    }
    truncated.push_str("\n\n[...truncated]");
    truncated
}
