pub mod builder;
pub mod chat;
pub mod context;
pub mod core_files;
pub mod incremental;
pub mod memory;
pub mod prompts;
pub mod selector;
pub mod summarizer;
pub mod topics;

pub use builder::{build_brain, BrainBuilder};
pub use chat::{BrainChatOptions, BrainPipeline, BrainStreamEvent};
pub use incremental::incremental_update;
pub use selector::{compute_max_topics, select_topics, TopicScore};

/// Rough token estimate used everywhere prompt budgets are enforced.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

/// SHA-256 content hash for change detection on brain files.
pub fn content_hash(content: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(content.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
