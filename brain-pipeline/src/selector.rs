use std::collections::HashSet;

use tracing::info;

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::brain_file::BrainFile},
    utils::embedding::cosine_similarity,
};

const KEYWORD_WEIGHT: f32 = 0.3;
const EMBEDDING_WEIGHT: f32 = 0.7;
const PERSISTENCE_BONUS: f32 = 0.3;
const MIN_SCORE: f32 = 0.05;

/// Deep-topic cap per token budget band.
pub fn compute_max_topics(token_budget: usize) -> usize {
    if token_budget < 3000 {
        3
    } else if token_budget <= 8000 {
        5
    } else if token_budget <= 20_000 {
        10
    } else {
        15
    }
}

/// A scored topic match.
#[derive(Debug, Clone)]
pub struct TopicScore {
    pub file_key: String,
    pub title: String,
    pub score: f32,
    pub keyword_score: f32,
    pub embedding_score: f32,
    pub match_method: String,
    pub token_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SelectionOptions {
    pub max_topics: Option<usize>,
    pub token_budget: usize,
    pub pinned_topics: Vec<String>,
    pub previously_loaded_topics: Vec<String>,
}

/// Pick the topics to load in full for a query.
///
/// Pinned topics come first at max score and are only skipped when they
/// would blow the budget. The rest are scored
/// `0.3*keyword + 0.7*embedding (+0.3 persistence)`, floored at 0.05,
/// then greedily packed.
pub async fn select_topics(
    db: &SurrealDbClient,
    user_id: &str,
    query: &str,
    query_embedding: Option<&[f32]>,
    options: &SelectionOptions,
) -> Result<Vec<TopicScore>, AppError> {
    let token_budget = if options.token_budget == 0 {
        3000
    } else {
        options.token_budget
    };
    let max_topics = options
        .max_topics
        .unwrap_or_else(|| compute_max_topics(token_budget));

    let topic_files = BrainFile::topics_for_user(user_id, db).await?;
    if topic_files.is_empty() {
        return Ok(Vec::new());
    }

    let previously: HashSet<&str> = options
        .previously_loaded_topics
        .iter()
        .map(String::as_str)
        .collect();

    let query_lower = query.to_lowercase();
    let query_words: HashSet<String> = query_lower
        .split_whitespace()
        .map(str::to_owned)
        .collect();

    let mut selected: Vec<TopicScore> = Vec::new();
    let mut tokens_used = 0usize;

    // Pinned topics first
    for pinned_key in &options.pinned_topics {
        let Some(topic) = topic_files.iter().find(|t| &t.file_key == pinned_key) else {
            continue;
        };
        let token_count = topic.token_count_approx as usize;
        if tokens_used + token_count > token_budget {
            continue;
        }

        let keyword_score = keyword_score(&query_words, &query_lower, topic);
        let embedding_score = embedding_score(query_embedding, topic);
        selected.push(TopicScore {
            file_key: topic.file_key.clone(),
            title: topic.title.clone(),
            score: 1.0_f32.max(keyword_score * KEYWORD_WEIGHT + embedding_score * EMBEDDING_WEIGHT),
            keyword_score,
            embedding_score,
            match_method: "pinned".to_owned(),
            token_count,
        });
        tokens_used += token_count;
    }
    let pinned_count = selected.len();

    // Score the rest
    let mut scored: Vec<TopicScore> = Vec::new();
    for topic in &topic_files {
        if options.pinned_topics.contains(&topic.file_key) {
            continue;
        }

        let kw = keyword_score(&query_words, &query_lower, topic);
        let emb = embedding_score(query_embedding, topic);
        let mut combined = kw * KEYWORD_WEIGHT + emb * EMBEDDING_WEIGHT;

        let persistent = previously.contains(topic.file_key.as_str());
        if persistent {
            combined += PERSISTENCE_BONUS;
        }
        if combined < MIN_SCORE {
            continue;
        }

        let mut method = if kw > 0.0 && emb == 0.0 {
            "keyword".to_owned()
        } else if emb > 0.0 && kw == 0.0 {
            "embedding".to_owned()
        } else {
            "both".to_owned()
        };
        if persistent {
            method.push_str("+persistent");
        }

        scored.push(TopicScore {
            file_key: topic.file_key.clone(),
            title: topic.title.clone(),
            score: combined,
            keyword_score: kw,
            embedding_score: emb,
            match_method: method,
            token_count: topic.token_count_approx as usize,
        });
    }

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.file_key.cmp(&b.file_key))
    });

    for topic in scored {
        if selected.len() >= max_topics + pinned_count {
            break;
        }
        if tokens_used + topic.token_count > token_budget {
            continue;
        }
        tokens_used += topic.token_count;
        selected.push(topic);
    }

    info!(
        selected = selected.len(),
        pinned = pinned_count,
        tokens_used,
        "Topic selection complete"
    );
    Ok(selected)
}

/// Fraction of the topic's keywords present in the query; falls back to
/// query/title word overlap at half weight.
fn keyword_score(query_words: &HashSet<String>, query_lower: &str, topic: &BrainFile) -> f32 {
    if topic.topic_keywords.is_empty() {
        return 0.0;
    }

    let matches = topic
        .topic_keywords
        .iter()
        .filter(|keyword| query_lower.contains(&keyword.to_lowercase()))
        .count();

    if matches == 0 {
        let title_words: HashSet<String> = topic
            .title
            .to_lowercase()
            .split_whitespace()
            .map(str::to_owned)
            .collect();
        let overlap = query_words.intersection(&title_words).count();
        if overlap > 0 {
            return ((overlap as f32 / query_words.len().max(1) as f32).min(1.0)) * 0.5;
        }
        return 0.0;
    }

    (matches as f32 / topic.topic_keywords.len() as f32).min(1.0)
}

/// Cosine similarity to the topic embedding, floor-clipped at zero.
fn embedding_score(query_embedding: Option<&[f32]>, topic: &BrainFile) -> f32 {
    match (query_embedding, &topic.embedding) {
        (Some(query), Some(topic_embedding)) => {
            cosine_similarity(query, topic_embedding).max(0.0)
        }
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::brain_file::BrainFileKind;

    fn topic(user_id: &str, key: &str, title: &str, keywords: &[&str], tokens: u32) -> BrainFile {
        let mut file = BrainFile::new(
            user_id.to_owned(),
            key.to_owned(),
            BrainFileKind::Topic,
            title.to_owned(),
            format!("# {title}\n\ncontent"),
            "hash".to_owned(),
            tokens,
        );
        file.topic_keywords = keywords.iter().map(|k| (*k).to_string()).collect();
        file
    }

    async fn db_with_topics(topics: Vec<BrainFile>) -> SurrealDbClient {
        let db = SurrealDbClient::memory("test_ns", &uuid::Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");
        for t in topics {
            db.store_item(t).await.expect("store topic");
        }
        db
    }

    #[test]
    fn test_compute_max_topics_bands() {
        assert_eq!(compute_max_topics(2000), 3);
        assert_eq!(compute_max_topics(3000), 5);
        assert_eq!(compute_max_topics(8000), 5);
        assert_eq!(compute_max_topics(8001), 10);
        assert_eq!(compute_max_topics(20_000), 10);
        assert_eq!(compute_max_topics(50_000), 15);
    }

    #[tokio::test]
    async fn test_keyword_match_selects_topic() {
        let db = db_with_topics(vec![
            topic("u", "topic_0", "Cooking", &["pasta", "sauce", "simmer"], 100),
            topic("u", "topic_1", "Rust", &["lifetimes", "borrowing"], 100),
        ])
        .await;

        let selected = select_topics(
            &db,
            "u",
            "how long should pasta sauce simmer",
            None,
            &SelectionOptions {
                token_budget: 3000,
                ..SelectionOptions::default()
            },
        )
        .await
        .expect("select");

        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].file_key, "topic_0");
        assert!(selected[0].keyword_score > 0.9);
        assert_eq!(selected[0].match_method, "keyword");
    }

    #[tokio::test]
    async fn test_pinned_topic_is_always_included() {
        let db = db_with_topics(vec![
            topic("u", "topic_0", "Gardening", &["tomato", "soil"], 100),
            topic("u", "topic_1", "Rust", &["lifetimes"], 100),
        ])
        .await;

        let selected = select_topics(
            &db,
            "u",
            "tell me about quantum gravity",
            None,
            &SelectionOptions {
                token_budget: 3000,
                pinned_topics: vec!["topic_0".to_owned()],
                ..SelectionOptions::default()
            },
        )
        .await
        .expect("select");

        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].file_key, "topic_0");
        assert_eq!(selected[0].match_method, "pinned");
        assert!(selected[0].score >= 1.0);
    }

    #[tokio::test]
    async fn test_pinned_topic_over_budget_is_skipped() {
        let db = db_with_topics(vec![topic(
            "u",
            "topic_0",
            "Huge",
            &["anything"],
            10_000,
        )])
        .await;

        let selected = select_topics(
            &db,
            "u",
            "anything",
            None,
            &SelectionOptions {
                token_budget: 1000,
                pinned_topics: vec!["topic_0".to_owned()],
                ..SelectionOptions::default()
            },
        )
        .await
        .expect("select");
        assert!(selected.is_empty());
    }

    #[tokio::test]
    async fn test_persistence_bonus_lifts_previous_topics() {
        let db = db_with_topics(vec![
        // Neither topic matches the query lexically; only the bonus scores
            topic("u", "topic_0", "Alpha", &["alpha"], 100),
            topic("u", "topic_1", "Beta", &["beta"], 100),
        ])
        .await;

        let selected = select_topics(
            &db,
            "u",
            "completely unrelated question",
            None,
            &SelectionOptions {
                token_budget: 3000,
                previously_loaded_topics: vec!["topic_1".to_owned()],
                ..SelectionOptions::default()
            },
        )
        .await
        .expect("select");

        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].file_key, "topic_1");
        assert!(selected[0].match_method.ends_with("+persistent"));
    }

    #[tokio::test]
    async fn test_budget_greedy_fill_skips_oversized() {
        let db = db_with_topics(vec![
            topic("u", "topic_0", "Pasta dishes", &["pasta"], 2500),
            topic("u", "topic_1", "Pasta sauces", &["pasta"], 400),
        ])
        .await;

        let selected = select_topics(
            &db,
            "u",
            "pasta",
            None,
            &SelectionOptions {
                token_budget: 2600,
                ..SelectionOptions::default()
            },
        )
        .await
        .expect("select");

        // topic_0 fits first (2500), topic_1 no longer does
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].file_key, "topic_0");
    }
}
