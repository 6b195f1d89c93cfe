pub mod context;
pub mod diffusion;
pub mod events;
pub mod fusion;
pub mod navigator;
pub mod pipeline;
pub mod router;
pub mod search;

use serde::{Deserialize, Serialize};

pub use context::{AssembledContext, ConnectionInsight, ExplorationSuggestion, RichCitation};
pub use events::{NexusStreamEvent, RetrievalMetadata};
pub use fusion::{fuse_results, FusionConfig};
pub use pipeline::{NexusPipeline, NexusQueryOptions};
pub use router::{route_query, QueryIntent, QueryMode, QueryRoute};

/// Where a retrieval candidate came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Note,
    Chunk,
    DocumentChunk,
    Image,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Note => "note",
            SourceType::Chunk => "chunk",
            SourceType::DocumentChunk => "document_chunk",
            SourceType::Image => "image",
        }
    }
}

/// One candidate emitted by a retrieval strategy.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub source_type: SourceType,
    pub source_id: String,
    /// The note a chunk belongs to, when there is one.
    pub note_id: Option<String>,
    pub title: String,
    pub content: String,
    pub similarity: f32,
    pub retrieval_method: String,
}

impl RetrievalResult {
    /// The identity used for cross-strategy merging: chunks collapse onto
    /// their parent note where known.
    pub fn merge_key(&self) -> String {
        match (&self.note_id, self.source_type) {
            (Some(note_id), SourceType::Chunk) => format!("note:{note_id}"),
            _ => format!("{}:{}", self.source_type.as_str(), self.source_id),
        }
    }
}

/// A candidate after scoring, ready for fusion or context assembly.
#[derive(Debug, Clone)]
pub struct RankedResult {
    pub result: RetrievalResult,
    pub final_score: f32,
    pub rank: u32,
    pub contributing_methods: Vec<String>,
}

impl RankedResult {
    pub fn from_result(result: RetrievalResult, rank: u32) -> Self {
        let method = result.retrieval_method.clone();
        Self {
            final_score: result.similarity,
            result,
            rank,
            contributing_methods: vec![method],
        }
    }
}
