use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, warn};

use common::{
    llm::{GenerationRequest, LlmMessage, LlmProvider},
    storage::types::note::Note,
};

use crate::{
    estimate_tokens,
    prompts::{fill, TOPIC_COMPRESSION_PROMPT, TOPIC_GENERATION_PROMPT},
};

const MAX_CHARS_PER_NOTE: usize = 1500;
const MAX_KEYWORDS: usize = 10;

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "and", "or", "but", "in", "on",
    "at", "to", "for", "of", "with", "by", "from", "as", "into", "this", "that", "it", "not",
    "no", "do", "does", "did", "has", "have", "had", "will", "would", "could", "should", "may",
    "might", "can", "i", "my", "me", "we", "our", "you", "your", "they", "them", "about", "how",
    "what", "when", "where", "which", "who", "some", "all", "any", "more", "very", "just",
    "also", "so",
];

/// The slice of a note a topic build needs.
#[derive(Debug, Clone)]
pub struct NoteInput {
    pub id: String,
    pub title: String,
    pub content: String,
}

impl From<&Note> for NoteInput {
    fn from(note: &Note) -> Self {
        Self {
            id: note.id.clone(),
            title: if note.title.is_empty() {
                "Untitled".to_owned()
            } else {
                note.title.clone()
            },
            content: note.content.clone(),
        }
    }
}

/// A synthesized topic before persistence.
#[derive(Debug, Clone)]
pub struct TopicDraft {
    pub file_key: String,
    pub title: String,
    pub content: String,
    pub community_id: i64,
    pub keywords: Vec<String>,
    pub source_note_ids: Vec<String>,
    pub token_count_approx: u32,
    pub compressed_content: Option<String>,
    pub compressed_token_count: u32,
}

/// Non-streaming helper every brain LLM call goes through. Failures come
/// back as `None`; the stages degrade instead of aborting the build.
pub async fn call_generate(
    provider: &Arc<dyn LlmProvider>,
    model: &str,
    temperature: f32,
    prompt: String,
) -> Option<String> {
    let request = GenerationRequest {
        messages: vec![LlmMessage::user(prompt)],
        model: model.to_owned(),
        temperature,
        max_tokens: 2048,
        context_window: None,
    };

    match provider.generate(request).await {
        Ok(response) if !response.content.trim().is_empty() => Some(response.content),
        Ok(_) => {
            warn!("LLM returned an empty topic response");
            None
        }
        Err(err) => {
            error!(error = %err, "Topic generation LLM call failed");
            None
        }
    }
}

/// Synthesize one topic file from a cluster of notes.
pub async fn generate_topic(
    provider: &Arc<dyn LlmProvider>,
    model: &str,
    temperature: f32,
    community_id: i64,
    topic_index: usize,
    notes: &[NoteInput],
) -> Option<TopicDraft> {
    if notes.is_empty() {
        return None;
    }

    let notes_content = notes
        .iter()
        .map(|note| {
            let content: String = note.content.chars().take(MAX_CHARS_PER_NOTE).collect();
            format!("### {}\n{content}", note.title)
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");

    let prompt = fill(
        TOPIC_GENERATION_PROMPT,
        &[
            ("note_count", &notes.len().to_string()),
            ("notes_content", &notes_content),
        ],
    );

    let content = call_generate(provider, model, temperature, prompt).await?;

    // Title from the first markdown heading, with a positional fallback
    let title = content
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("# "))
        .map(|line| line[2..].trim().to_owned())
        .unwrap_or_else(|| format!("Topic {topic_index}"));

    Some(TopicDraft {
        file_key: format!("topic_{topic_index}"),
        title,
        community_id,
        keywords: extract_keywords(notes, MAX_KEYWORDS),
        source_note_ids: notes.iter().map(|note| note.id.clone()).collect(),
        token_count_approx: estimate_tokens(&content) as u32,
        content,
        compressed_content: None,
        compressed_token_count: 0,
    })
}

/// Generate the 80-120-word Knowledge Map entry for a topic. On failure
/// the head of the topic content stands in, so the map entry always
/// exists.
pub async fn compress_topic(
    provider: &Arc<dyn LlmProvider>,
    model: &str,
    temperature: f32,
    draft: &mut TopicDraft,
) {
    let head: String = draft.content.chars().take(2000).collect();
    let prompt = fill(TOPIC_COMPRESSION_PROMPT, &[("topic_content", &head)]);

    match call_generate(provider, model, temperature, prompt).await {
        Some(compressed) => {
            let trimmed = compressed.trim().to_owned();
            draft.compressed_token_count = estimate_tokens(&trimmed) as u32;
            draft.compressed_content = Some(trimmed);
        }
        None => {
            warn!(file_key = %draft.file_key, "Compression failed, using content head");
            let fallback: String = draft.content.chars().take(400).collect();
            draft.compressed_token_count = estimate_tokens(&fallback) as u32;
            draft.compressed_content = Some(fallback);
        }
    }
}

/// Representative keywords from titles (weighted 3x) and content heads.
pub fn extract_keywords(notes: &[NoteInput], max_keywords: usize) -> Vec<String> {
    let mut frequency: HashMap<String, usize> = HashMap::new();

    let mut bump = |word: &str, weight: usize, frequency: &mut HashMap<String, usize>| {
        let cleaned = word
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if cleaned.len() > 2 && !STOP_WORDS.contains(&cleaned.as_str()) {
            *frequency.entry(cleaned).or_insert(0) += weight;
        }
    };

    for note in notes {
        for word in note.title.split_whitespace() {
            bump(word, 3, &mut frequency);
        }
        let head: String = note.content.chars().take(200).collect();
        for word in head.split_whitespace() {
            bump(word, 1, &mut frequency);
        }
    }

    let mut sorted: Vec<(String, usize)> = frequency.into_iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    sorted
        .into_iter()
        .take(max_keywords)
        .map(|(word, _)| word)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(id: &str, title: &str, content: &str) -> NoteInput {
        NoteInput {
            id: id.to_owned(),
            title: title.to_owned(),
            content: content.to_owned(),
        }
    }

    #[test]
    fn test_keywords_weight_titles_over_content() {
        let notes = vec![
            note("1", "Docker networking", "some filler words here"),
            note("2", "Docker compose", "more filler text follows"),
        ];

        let keywords = extract_keywords(&notes, 10);
        assert_eq!(keywords.first().map(String::as_str), Some("docker"));
        assert!(keywords.contains(&"networking".to_owned()));
        assert!(keywords.contains(&"compose".to_owned()));
    }

    #[test]
    fn test_keywords_filter_stop_words_and_short_tokens() {
        let notes = vec![note("1", "The and of it", "a to in on at")];
        assert!(extract_keywords(&notes, 10).is_empty());
    }

    #[test]
    fn test_keywords_cap_and_determinism() {
        let content = (0..40)
            .map(|i| format!("keyword{i:02}"))
            .collect::<Vec<_>>()
            .join(" ");
        let notes = vec![note("1", "Title words", &content)];

        let first = extract_keywords(&notes, 10);
        assert_eq!(first.len(), 10);
        assert_eq!(first, extract_keywords(&notes, 10));
    }
}
