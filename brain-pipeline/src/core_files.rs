use std::sync::Arc;

use common::llm::LlmProvider;

use crate::{
    content_hash, estimate_tokens,
    prompts::{
        fill, ASKIMAP_GENERATION_PROMPT, DEFAULT_MEMORY_CONTENT, DEFAULT_SOUL_CONTENT,
        OVERVIEW_GENERATION_PROMPT, USER_PROFILE_PROMPT,
    },
    topics::{call_generate, NoteInput, TopicDraft},
};
use common::storage::types::brain_file::{BrainFile, BrainFileKind};

fn core_file(user_id: &str, file_key: &str, kind: BrainFileKind, title: &str, content: String) -> BrainFile {
    BrainFile::new(
        user_id.to_owned(),
        file_key.to_owned(),
        kind,
        title.to_owned(),
        content.clone(),
        content_hash(&content),
        estimate_tokens(&content) as u32,
    )
}

fn topics_summary(topics: &[TopicDraft]) -> String {
    topics
        .iter()
        .map(|topic| {
            let keywords = topic
                .keywords
                .iter()
                .take(5)
                .cloned()
                .collect::<Vec<_>>()
                .join(", ");
            format!("- **{}** ({}): {keywords}", topic.title, topic.file_key)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// askimap.md: routes question shapes to topic files. Falls back to a
/// mechanical index when the model is unavailable.
pub async fn generate_askimap(
    provider: &Arc<dyn LlmProvider>,
    model: &str,
    temperature: f32,
    user_id: &str,
    topics: &[TopicDraft],
) -> BrainFile {
    if topics.is_empty() {
        return core_file(
            user_id,
            "askimap",
            BrainFileKind::Askimap,
            "Askimap - Question Navigation",
            "# Askimap\n\nNo topics yet. Build the brain to populate.".to_owned(),
        );
    }

    let entries = topics
        .iter()
        .map(|topic| {
            format!(
                "### {}: {}\n**Keywords:** {}",
                topic.file_key,
                topic.title,
                topic.keywords.join(", ")
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let prompt = fill(
        ASKIMAP_GENERATION_PROMPT,
        &[
            ("topics_summary", &topics_summary(topics)),
            ("topic_entries", &entries),
        ],
    );

    let content = match call_generate(provider, model, temperature, prompt).await {
        Some(content) => content,
        None => fallback_askimap(topics),
    };

    core_file(
        user_id,
        "askimap",
        BrainFileKind::Askimap,
        "Askimap - Question Navigation",
        content,
    )
}

fn fallback_askimap(topics: &[TopicDraft]) -> String {
    let mut lines = vec!["# Askimap".to_owned(), String::new(), "## Topic Index".to_owned()];
    for topic in topics {
        lines.push(format!("### {}: {}", topic.file_key, topic.title));
        lines.push(format!("**Keywords:** {}", topic.keywords.join(", ")));
        lines.push(String::new());
    }
    lines.join("\n")
}

/// mnemosyne.md: the master overview across all compressed summaries.
pub async fn generate_overview(
    provider: &Arc<dyn LlmProvider>,
    model: &str,
    temperature: f32,
    user_id: &str,
    topics: &[TopicDraft],
    total_notes: usize,
    community_count: usize,
) -> BrainFile {
    if topics.is_empty() {
        return core_file(
            user_id,
            "mnemosyne",
            BrainFileKind::Mnemosyne,
            "Knowledge Overview",
            "# Knowledge Overview\n\nNo topics yet. Build the brain to populate.".to_owned(),
        );
    }

    let topic_list = topics
        .iter()
        .map(|topic| format!("- {}: {}", topic.file_key, topic.title))
        .collect::<Vec<_>>()
        .join("\n");
    let compressed = topics
        .iter()
        .filter_map(|topic| {
            topic
                .compressed_content
                .as_ref()
                .map(|summary| format!("- {} ({}): {summary}", topic.title, topic.file_key))
        })
        .collect::<Vec<_>>()
        .join("\n");

    let prompt = fill(
        OVERVIEW_GENERATION_PROMPT,
        &[
            ("total_notes", &total_notes.to_string()),
            ("community_count", &community_count.to_string()),
            ("topics_summary", &topics_summary(topics)),
            ("topic_list", &topic_list),
            ("compressed_summaries", &compressed),
        ],
    );

    let content = call_generate(provider, model, temperature, prompt)
        .await
        .unwrap_or_else(|| {
            format!(
                "# Knowledge Overview\n\n{total_notes} notes across {community_count} topics.\n\n{topic_list}"
            )
        });

    core_file(
        user_id,
        "mnemosyne",
        BrainFileKind::Mnemosyne,
        "Knowledge Overview",
        content,
    )
}

/// user_profile.md: apparent interests and patterns from the notes.
pub async fn generate_user_profile(
    provider: &Arc<dyn LlmProvider>,
    model: &str,
    temperature: f32,
    user_id: &str,
    topics: &[TopicDraft],
    sample_notes: &[NoteInput],
) -> BrainFile {
    let notes_text = sample_notes
        .iter()
        .take(10)
        .map(|note| {
            let head: String = note.content.chars().take(300).collect();
            format!("### {}\n{head}", note.title)
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let prompt = fill(
        USER_PROFILE_PROMPT,
        &[
            ("topics_summary", &topics_summary(topics)),
            (
                "sample_notes",
                if notes_text.is_empty() {
                    "No notes available."
                } else {
                    &notes_text
                },
            ),
        ],
    );

    let content = call_generate(provider, model, temperature, prompt)
        .await
        .unwrap_or_else(|| {
            "# User Profile\n\nNot enough data to generate a profile yet.".to_owned()
        });

    core_file(
        user_id,
        "user_profile",
        BrainFileKind::UserProfile,
        "User Profile",
        content,
    )
}

pub fn default_soul(user_id: &str) -> BrainFile {
    core_file(
        user_id,
        "soul",
        BrainFileKind::Soul,
        "Soul - Personality",
        DEFAULT_SOUL_CONTENT.to_owned(),
    )
}

pub fn default_memory(user_id: &str) -> BrainFile {
    core_file(
        user_id,
        "memory",
        BrainFileKind::Memory,
        "Memory - Conversation Learnings",
        DEFAULT_MEMORY_CONTENT.to_owned(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(key: &str, title: &str) -> TopicDraft {
        TopicDraft {
            file_key: key.to_owned(),
            title: title.to_owned(),
            content: format!("# {title}\n\nbody"),
            community_id: 0,
            keywords: vec!["alpha".into(), "beta".into()],
            source_note_ids: vec!["n1".into()],
            token_count_approx: 10,
            compressed_content: Some("summary".into()),
            compressed_token_count: 2,
        }
    }

    #[test]
    fn test_fallback_askimap_lists_every_topic() {
        let content = fallback_askimap(&[draft("topic_0", "Docker"), draft("topic_1", "Bread")]);
        assert!(content.contains("topic_0: Docker"));
        assert!(content.contains("topic_1: Bread"));
        assert!(content.contains("**Keywords:** alpha, beta"));
    }

    #[test]
    fn test_default_core_files_have_hashes_and_tokens() {
        let soul = default_soul("user1");
        assert_eq!(soul.file_key, "soul");
        assert_eq!(soul.content_hash.len(), 64);
        assert!(soul.token_count_approx > 0);
        assert!(!soul.is_user_edited);

        let memory = default_memory("user1");
        assert_eq!(memory.file_key, "memory");
        assert!(memory.content.contains("# Memory"));
    }
}
