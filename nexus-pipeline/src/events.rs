use serde::Serialize;

use crate::context::{ConnectionInsight, ExplorationSuggestion, RichCitation};

/// Retrieval metadata reported once per answered query.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalMetadata {
    pub mode: String,
    pub mode_auto_detected: bool,
    pub intent: String,
    pub strategies_used: Vec<String>,
    pub total_sources_searched: usize,
    pub sources_used: usize,
    pub context_tokens_approx: usize,
    pub context_truncated: bool,
    pub model_used: String,
    pub provider_used: String,
    pub used_local_fallback: bool,
    pub conversation_id: Option<String>,
    pub message_id: Option<String>,
}

/// Typed events of the client token stream.
///
/// Order within one stream: `token*` then `citations`, `connections?`,
/// `suggestions?`, `metadata`, `done`. An `error` may terminate the
/// stream at any point.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NexusStreamEvent {
    Token {
        content: String,
    },
    Citations {
        citations: Vec<RichCitation>,
        used_indices: Vec<u32>,
    },
    Connections {
        connections: Vec<ConnectionInsight>,
    },
    Suggestions {
        suggestions: Vec<ExplorationSuggestion>,
    },
    Metadata {
        metadata: RetrievalMetadata,
    },
    Error {
        content: String,
        error_type: String,
    },
    Done,
}

impl NexusStreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NexusStreamEvent::Done | NexusStreamEvent::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_serialize_with_type_tag() {
        let token = serde_json::to_value(NexusStreamEvent::Token {
            content: "hello".into(),
        })
        .expect("serialize token");
        assert_eq!(token["type"], "token");
        assert_eq!(token["content"], "hello");

        let done = serde_json::to_value(NexusStreamEvent::Done).expect("serialize done");
        assert_eq!(done["type"], "done");

        let error = serde_json::to_value(NexusStreamEvent::Error {
            content: "boom".into(),
            error_type: "timeout".into(),
        })
        .expect("serialize error");
        assert_eq!(error["type"], "error");
        assert_eq!(error["error_type"], "timeout");
    }

    #[test]
    fn test_terminal_detection() {
        assert!(NexusStreamEvent::Done.is_terminal());
        assert!(NexusStreamEvent::Error {
            content: String::new(),
            error_type: String::new()
        }
        .is_terminal());
        assert!(!NexusStreamEvent::Token {
            content: String::new()
        }
        .is_terminal());
    }
}
