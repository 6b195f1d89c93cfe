use serde::{Deserialize, Serialize};

/// Retrieval-pipeline breadth selector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    Fast,
    Standard,
    Deep,
    Auto,
}

impl QueryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryMode::Fast => "FAST",
            QueryMode::Standard => "STANDARD",
            QueryMode::Deep => "DEEP",
            QueryMode::Auto => "AUTO",
        }
    }
}

/// Coarse query classification driving the fusion weights.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueryIntent {
    Factual,
    Synthesis,
    Exploration,
    Temporal,
    Creative,
}

impl QueryIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryIntent::Factual => "factual",
            QueryIntent::Synthesis => "synthesis",
            QueryIntent::Exploration => "exploration",
            QueryIntent::Temporal => "temporal",
            QueryIntent::Creative => "creative",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QueryRoute {
    /// The resolved mode, never `Auto`.
    pub mode: QueryMode,
    pub intent: QueryIntent,
    pub auto_detected: bool,
}

const SYNTHESIS_CUES: &[&str] = &[
    "summarize",
    "summary",
    "overview",
    "synthesize",
    "combine",
    "organize",
    "organized",
    "overall",
    "themes",
    "relate",
];

const EXPLORATION_CUES: &[&str] = &[
    "related",
    "connected",
    "connection",
    "explore",
    "discover",
    "similar",
    "links between",
    "what else",
];

const TEMPORAL_CUES: &[&str] = &[
    "yesterday",
    "today",
    "last week",
    "last month",
    "this week",
    "this month",
    "recent",
    "recently",
    "latest",
    "when did",
];

const CREATIVE_CUES: &[&str] = &[
    "brainstorm",
    "imagine",
    "draft",
    "write me",
    "come up with",
    "ideas for",
    "invent",
];

/// Markers that suggest the query wants breadth across the whole graph.
const AGGREGATIVE_CUES: &[&str] = &[
    "all my",
    "everything",
    "across",
    "every note",
    "whole",
    "entire",
    "how is my",
];

fn contains_any(haystack: &str, cues: &[&str]) -> bool {
    cues.iter().any(|cue| haystack.contains(cue))
}

/// Lexical intent classifier; `factual` is the default.
pub fn classify_intent(query: &str) -> QueryIntent {
    let lowered = query.to_lowercase();
    if contains_any(&lowered, TEMPORAL_CUES) {
        QueryIntent::Temporal
    } else if contains_any(&lowered, CREATIVE_CUES) {
        QueryIntent::Creative
    } else if contains_any(&lowered, SYNTHESIS_CUES) {
        QueryIntent::Synthesis
    } else if contains_any(&lowered, EXPLORATION_CUES) {
        QueryIntent::Exploration
    } else {
        QueryIntent::Factual
    }
}

/// Route a query to mode + intent.
///
/// A caller-forced mode is honored as-is. AUTO infers breadth from length,
/// aggregative/synthesis markers, and whether the navigation cache exists:
/// graph-driven modes are pointless before the first consolidation.
pub fn route_query(query: &str, requested: QueryMode, cache_ready: bool) -> QueryRoute {
    let intent = classify_intent(query);

    if requested != QueryMode::Auto {
        return QueryRoute {
            mode: requested,
            intent,
            auto_detected: false,
        };
    }

    let lowered = query.to_lowercase();
    let word_count = query.split_whitespace().count();
    let wants_breadth = contains_any(&lowered, AGGREGATIVE_CUES)
        || matches!(intent, QueryIntent::Synthesis | QueryIntent::Exploration);

    let mode = if wants_breadth || word_count > 20 {
        if cache_ready {
            QueryMode::Deep
        } else {
            QueryMode::Fast
        }
    } else if word_count > 8 && cache_ready {
        QueryMode::Standard
    } else {
        QueryMode::Fast
    };

    QueryRoute {
        mode,
        intent,
        auto_detected: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_defaults_to_factual() {
        assert_eq!(classify_intent("docker bridge network"), QueryIntent::Factual);
    }

    #[test]
    fn test_intent_cues() {
        assert_eq!(
            classify_intent("summarize my infrastructure notes"),
            QueryIntent::Synthesis
        );
        assert_eq!(
            classify_intent("what is connected to my gardening notes"),
            QueryIntent::Exploration
        );
        assert_eq!(
            classify_intent("what did I write last week"),
            QueryIntent::Temporal
        );
        assert_eq!(
            classify_intent("brainstorm ideas for the talk"),
            QueryIntent::Creative
        );
    }

    #[test]
    fn test_forced_mode_is_honored() {
        let route = route_query("anything at all", QueryMode::Deep, false);
        assert_eq!(route.mode, QueryMode::Deep);
        assert!(!route.auto_detected);
    }

    #[test]
    fn test_auto_short_factual_is_fast() {
        let route = route_query("docker bridge network", QueryMode::Auto, true);
        assert_eq!(route.mode, QueryMode::Fast);
        assert!(route.auto_detected);
    }

    #[test]
    fn test_auto_synthesis_with_cache_goes_deep() {
        let route = route_query(
            "how is my docker knowledge organized?",
            QueryMode::Auto,
            true,
        );
        assert_eq!(route.mode, QueryMode::Deep);
        assert_eq!(route.intent, QueryIntent::Synthesis);
    }

    #[test]
    fn test_auto_without_cache_stays_fast() {
        let route = route_query(
            "how is my docker knowledge organized?",
            QueryMode::Auto,
            false,
        );
        assert_eq!(route.mode, QueryMode::Fast);
    }

    #[test]
    fn test_auto_medium_query_with_cache_is_standard() {
        let route = route_query(
            "where did I describe the settings for the home server backup job",
            QueryMode::Auto,
            true,
        );
        assert_eq!(route.mode, QueryMode::Standard);
    }
}
