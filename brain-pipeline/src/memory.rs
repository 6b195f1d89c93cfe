use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use common::{
    error::AppError,
    llm::LlmProvider,
    storage::{
        db::SurrealDbClient,
        types::{brain_file::BrainFile, brain_message::BrainMessage},
    },
};

use crate::{
    content_hash,
    prompts::{fill, MEMORY_EVOLUTION_PROMPT},
    topics::call_generate,
};

pub const RECENT_ENTRIES_TO_KEEP: usize = 3;
const SESSION_HEADER: &str = "### Session ";

/// Scan a finished conversation for durable learnings and append them to
/// the memory file under a dated heading. Returns the appended text when
/// anything new was found.
pub async fn evolve_memory(
    db: &SurrealDbClient,
    provider: &Arc<dyn LlmProvider>,
    model: &str,
    user_id: &str,
    conversation_id: &str,
    max_memory_chars: usize,
) -> Result<Option<String>, AppError> {
    let messages = BrainMessage::for_conversation(conversation_id, db).await?;
    if messages.len() < 2 {
        return Ok(None);
    }

    let conversation_text = messages
        .iter()
        .map(|message| {
            let content: String = message.content.chars().take(1000).collect();
            format!("{}: {content}", message.role)
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let prompt = fill(
        MEMORY_EVOLUTION_PROMPT,
        &[("conversation_text", conversation_text.as_str())],
    );

    let Some(result) = call_generate(provider, model, 0.3, prompt).await else {
        return Ok(None);
    };
    if result.contains("NO_NEW_LEARNINGS") {
        info!("No new learnings extracted from conversation");
        return Ok(None);
    }
    let learnings = result.trim().to_owned();
    if learnings.is_empty() {
        return Ok(None);
    }

    let Some(memory_file) = BrainFile::get_by_key(user_id, "memory", db).await? else {
        warn!("No memory file to evolve");
        return Ok(None);
    };

    let date = Utc::now().format("%Y-%m-%d %H:%M");
    let mut content = format!(
        "{}\n\n{SESSION_HEADER}{date}\n{learnings}",
        memory_file.content
    );

    if content.len() > max_memory_chars {
        content = prune_memory(&content, max_memory_chars);
    }

    let hash = content_hash(&content);
    db.client
        .query(
            "UPDATE type::thing('brain_file', $id) SET content = $content, \
             content_hash = $hash, token_count_approx = $tokens, version += 1, \
             updated_at = time::now()",
        )
        .bind(("id", memory_file.id.clone()))
        .bind(("tokens", (content.chars().count() / 4) as i64))
        .bind(("content", content))
        .bind(("hash", hash))
        .await?;

    info!(chars = learnings.len(), "Memory evolved");
    Ok(Some(learnings))
}

/// Split memory content into preamble and dated session entries.
fn split_memory_entries(content: &str) -> (String, Vec<String>) {
    let mut boundaries: Vec<usize> = content
        .match_indices(SESSION_HEADER)
        .map(|(index, _)| index)
        .collect();
    if boundaries.is_empty() {
        return (content.trim().to_owned(), Vec::new());
    }

    let preamble = content[..boundaries[0]].trim().to_owned();
    boundaries.push(content.len());
    let entries = boundaries
        .windows(2)
        .map(|window| content[window[0]..window[1]].trim().to_owned())
        .filter(|entry| !entry.is_empty())
        .collect();

    (preamble, entries)
}

/// Prune memory to the character cap: preamble plus the most recent
/// dated entries survive intact; older entries collapse into a literal
/// archived-memories placeholder.
pub fn prune_memory(content: &str, max_chars: usize) -> String {
    let (mut preamble, entries) = split_memory_entries(content);

    if entries.len() <= RECENT_ENTRIES_TO_KEEP {
        // Nothing meaningful to archive; trim from the front instead
        if content.len() > max_chars {
            let start = content.len() - max_chars;
            return content
                .char_indices()
                .skip_while(|(index, _)| *index < start)
                .map(|(_, c)| c)
                .collect();
        }
        return content.to_owned();
    }

    let recent = &entries[entries.len() - RECENT_ENTRIES_TO_KEEP..];
    let archived_count = entries.len() - RECENT_ENTRIES_TO_KEEP;
    let summary =
        format!("\n\n### Archived Memories\n... ({archived_count} earlier sessions summarized) ...");

    let recent_text = recent.join("\n\n");
    let mut pruned = format!("{preamble}{summary}\n\n{recent_text}");

    if pruned.len() > max_chars {
        let excess = pruned.len() - max_chars;
        if preamble.len() > excess + 100 {
            let keep = preamble.len() - excess;
            preamble.truncate(keep);
            if let Some(last_period) = preamble.rfind('.') {
                if last_period * 2 > preamble.len() {
                    preamble.truncate(last_period + 1);
                }
            }
            pruned = format!("{preamble}{summary}\n\n{recent_text}");
        }
    }

    info!(
        archived = archived_count,
        kept = RECENT_ENTRIES_TO_KEEP,
        chars = pruned.len(),
        "Memory pruned"
    );
    pruned
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_with_sessions(preamble: &str, count: usize) -> String {
        let mut content = preamble.to_owned();
        for index in 0..count {
            content.push_str(&format!(
                "\n\n### Session 2026-07-{:02} 10:00\n- learning number {index}",
                index + 1
            ));
        }
        content
    }

    #[test]
    fn test_split_separates_preamble_and_entries() {
        let content = memory_with_sessions("# Memory\n\nIntro text.", 2);
        let (preamble, entries) = split_memory_entries(&content);
        assert_eq!(preamble, "# Memory\n\nIntro text.");
        assert_eq!(entries.len(), 2);
        assert!(entries[0].starts_with("### Session 2026-07-01"));
    }

    #[test]
    fn test_prune_keeps_recent_entries_intact() {
        let content = memory_with_sessions("# Memory\n\nIntro.", 6);
        let pruned = prune_memory(&content, 400);

        assert!(pruned.len() <= 400 || pruned.contains("Archived Memories"));
        // The three most recent entries survive verbatim
        for index in 3..6 {
            assert!(
                pruned.contains(&format!("learning number {index}")),
                "entry {index} should survive pruning"
            );
        }
        assert!(!pruned.contains("learning number 0"));
        assert!(pruned.contains("(3 earlier sessions summarized)"));
    }

    #[test]
    fn test_prune_without_entries_trims_front() {
        let content = format!("# Memory\n\n{}", "x".repeat(5000));
        let pruned = prune_memory(&content, 1000);
        assert_eq!(pruned.chars().count(), 1000);
    }

    #[test]
    fn test_prune_is_a_noop_under_cap() {
        let content = memory_with_sessions("# Memory", 2);
        assert_eq!(prune_memory(&content, 10_000), content);
    }

    #[test]
    fn test_pruned_length_respects_cap_with_long_preamble() {
        let content = memory_with_sessions(&format!("# Memory\n\n{}", "intro. ".repeat(300)), 6);
        let pruned = prune_memory(&content, 1500);
        assert!(
            pruned.len() <= 1600,
            "pruned length {} should be near the cap",
            pruned.len()
        );
        assert!(pruned.contains("Archived Memories"));
    }
}
