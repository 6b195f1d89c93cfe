//! Prompt templates for brain builds and chat.

pub const TOPIC_GENERATION_PROMPT: &str = "You are condensing a cluster of personal notes into \
one topic file.\n\
\n\
There are {note_count} notes in this cluster:\n\
\n\
{notes_content}\n\
\n\
Write a markdown document with exactly these sections:\n\
# <a short descriptive title>\n\
## Overview\n\
## Key Points\n\
## Details\n\
## Connections\n\
\n\
Stay under 800 words. Capture concrete facts and the user's own \
conclusions; do not invent information that is not in the notes.";

pub const TOPIC_COMPRESSION_PROMPT: &str = "Condense the following topic file into a single \
paragraph of 80-120 words. Keep the most load-bearing facts and names. \
Output only the paragraph.\n\
\n\
{topic_content}";

pub const ASKIMAP_GENERATION_PROMPT: &str = "You are building a question-routing index for a \
personal knowledge assistant.\n\
\n\
Topics:\n{topics_summary}\n\
\n\
Details:\n{topic_entries}\n\
\n\
Write a markdown document titled '# Askimap' that maps the kinds of \
questions a user might ask to the topic file that answers them, one \
section per topic, listing 2-3 example questions each.";

pub const OVERVIEW_GENERATION_PROMPT: &str = "You are writing the master overview of a personal \
knowledge base.\n\
\n\
It holds {total_notes} notes across {community_count} topics:\n\
{topics_summary}\n\
\n\
Topic files:\n{topic_list}\n\
\n\
Compressed topic summaries:\n{compressed_summaries}\n\
\n\
Write a markdown document titled '# Knowledge Overview' that describes \
what this knowledge base covers, its major themes, and how the topics \
relate. Stay under 500 words.";

pub const USER_PROFILE_PROMPT: &str = "Infer a short profile of the person who wrote these \
notes.\n\
\n\
Topics:\n{topics_summary}\n\
\n\
Sample notes:\n{sample_notes}\n\
\n\
Write a markdown document titled '# User Profile' covering apparent \
interests, recurring patterns, and preferred working style. Keep it \
under 300 words and avoid speculation beyond the notes.";

pub const MEMORY_EVOLUTION_PROMPT: &str = "Review this conversation between a user and their \
knowledge assistant.\n\
\n\
{conversation_text}\n\
\n\
Extract durable new facts about the user: preferences, corrections, \
personal context, decisions. Write them as short markdown bullet \
points. If the conversation contains nothing durable, respond with \
exactly NO_NEW_LEARNINGS.";

pub const CONVERSATION_SUMMARY_PROMPT: &str = "Summarize this conversation segment concisely, \
preserving:\n\
1. Key topics discussed\n\
2. Important facts or preferences the user mentioned\n\
3. Decisions or conclusions reached\n\
4. Questions that were answered\n\
\n\
Keep the summary under 300 words. Focus on information useful for \
continuing later.\n\
\n\
Conversation:\n{messages}\n\
\n\
Summary:";

pub const BRAIN_SYSTEM_PROMPT: &str = "{soul_instructions}\n\
\n\
You are the user's personal knowledge assistant. You speak from the \
knowledge loaded below and from the conversation itself.\n\
Loaded: {loaded_files_summary}";

pub const DEFAULT_SOUL_CONTENT: &str = "# Soul\n\
\n\
You are a thoughtful assistant built around one person's notes. Be \
direct, concrete and curious. Prefer the user's own terminology. When \
the notes disagree with general knowledge, the notes win.";

pub const DEFAULT_MEMORY_CONTENT: &str = "# Memory\n\
\n\
Durable learnings from conversations land here under dated headings.";

/// Instruction appended when topics exist but none matched the query.
pub const HONEST_ANSWER_NOTE: &str = "## NOTE: No topics closely matched this query. Be honest \
with the user that you don't have detailed knowledge on this specific \
subject. Share what you can from the Knowledge Map summaries, but \
clearly indicate the limits of your knowledge. Suggest the user check \
whether they have notes on this topic or try different search terms.";

/// Tiny template helper: replaces `{name}` placeholders.
pub fn fill(template: &str, pairs: &[(&str, &str)]) -> String {
    let mut output = template.to_owned();
    for (name, value) in pairs {
        output = output.replace(&format!("{{{name}}}"), value);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_replaces_all_placeholders() {
        let filled = fill(
            TOPIC_GENERATION_PROMPT,
            &[("note_count", "3"), ("notes_content", "### A\nalpha")],
        );
        assert!(filled.contains("There are 3 notes"));
        assert!(filled.contains("### A"));
        assert!(!filled.contains("{note_count}"));
        assert!(!filled.contains("{notes_content}"));
    }
}
