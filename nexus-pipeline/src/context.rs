use std::collections::{HashMap, HashSet, VecDeque};

use serde::Serialize;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            community::CommunityMetadata,
            nexus_citation::{CitationPath, WikilinkRef},
            note::Note,
            note_link::NoteLink,
            tag::Tag,
        },
    },
};

use crate::{RankedResult, SourceType};

/// A citation carrying origin, community, tags, wikilinks and paths to
/// co-cited sources, plus deep links for the UI.
#[derive(Debug, Clone, Serialize)]
pub struct RichCitation {
    pub index: u32,
    pub source_type: SourceType,
    pub source_id: String,
    pub title: String,
    pub content_preview: String,
    pub relevance_score: f32,
    pub retrieval_method: String,
    pub hop_count: u32,
    pub origin_type: Option<String>,
    pub artifact_id: Option<String>,
    pub community_id: Option<i64>,
    pub community_name: Option<String>,
    pub community_top_terms: Option<String>,
    pub tags: Vec<String>,
    pub direct_wikilinks: Vec<WikilinkRef>,
    pub path_to_other_results: Vec<CitationPath>,
    pub note_url: Option<String>,
    pub graph_url: Option<String>,
    pub artifact_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInsight {
    pub source_index: u32,
    pub target_index: u32,
    pub connection_type: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExplorationSuggestion {
    pub query: String,
    pub reason: String,
    pub related_citation_indices: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub system_prompt: String,
    pub rich_citations: Vec<RichCitation>,
    pub connection_insights: Vec<ConnectionInsight>,
    pub exploration_suggestions: Vec<ExplorationSuggestion>,
    pub total_tokens_approx: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Token budget for the assembled prompt, ~4 chars per token.
    pub context_budget: usize,
    pub preview_chars: usize,
    pub max_insight_chars: usize,
    pub max_suggestions: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            context_budget: 8000,
            preview_chars: 400,
            max_insight_chars: 1200,
            max_suggestions: 3,
        }
    }
}

/// Graph context resolved for one candidate note.
#[derive(Debug, Clone, Default)]
pub struct SourceChain {
    pub origin_type: Option<String>,
    pub artifact_id: Option<String>,
    pub slug: String,
    pub community_id: Option<i64>,
    pub community_name: Option<String>,
    pub community_top_terms: Option<String>,
    pub tags: Vec<String>,
    pub outgoing: Vec<WikilinkRef>,
    pub paths: Vec<CitationPath>,
}

pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

const SYSTEM_PREAMBLE: &str = "You answer questions from the user's personal knowledge base. \
Ground every claim in the numbered sources below and cite them inline \
with bracketed indices like [1] or [2][3]. If the sources do not cover \
the question, say so plainly instead of guessing.";

/// Resolve origin, community, tags, outgoing wikilinks and short paths to
/// the other candidates for every candidate note.
pub async fn resolve_source_chains(
    db: &SurrealDbClient,
    user_id: &str,
    candidate_note_ids: &[String],
) -> Result<HashMap<String, SourceChain>, AppError> {
    if candidate_note_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let things: Vec<surrealdb::sql::Thing> = candidate_note_ids
        .iter()
        .map(|id| surrealdb::sql::Thing::from(("note", id.as_str())))
        .collect();
    let mut response = db
        .query("SELECT * FROM note WHERE id IN $things AND user_id = $user_id")
        .bind(("things", things))
        .bind(("user_id", user_id.to_owned()))
        .await?;
    let notes: Vec<Note> = response.take(0)?;

    let communities: HashMap<i64, CommunityMetadata> =
        CommunityMetadata::all_for_user(user_id, db)
            .await?
            .into_iter()
            .map(|c| (c.community_id, c))
            .collect();
    let tags: HashMap<String, String> = Tag::all_for_user(user_id, db)
        .await?
        .into_iter()
        .map(|tag| (tag.id, tag.name))
        .collect();

    // One pass over the owner's full link set serves outgoing-link lists
    // and the bounded path search.
    let links = NoteLink::all_for_user(user_id, db).await?;
    let mut outgoing_by_note: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut undirected: HashMap<&str, Vec<&str>> = HashMap::new();
    for link in &links {
        outgoing_by_note
            .entry(link.source_note_id.as_str())
            .or_default()
            .push(link.target_note_id.as_str());
        undirected
            .entry(link.source_note_id.as_str())
            .or_default()
            .push(link.target_note_id.as_str());
        undirected
            .entry(link.target_note_id.as_str())
            .or_default()
            .push(link.source_note_id.as_str());
    }

    // Titles for link endpoints and path waypoints
    let mut linked_ids: HashSet<String> = HashSet::new();
    for link in &links {
        linked_ids.insert(link.source_note_id.clone());
        linked_ids.insert(link.target_note_id.clone());
    }
    let titles = note_titles(db, user_id, &linked_ids).await?;

    let candidate_set: HashSet<&str> = candidate_note_ids.iter().map(String::as_str).collect();
    let candidate_index: HashMap<&str, u32> = candidate_note_ids
        .iter()
        .enumerate()
        .map(|(index, id)| (id.as_str(), index as u32 + 1))
        .collect();

    let mut chains = HashMap::new();
    for note in notes {
        let community = note.community_id.and_then(|id| communities.get(&id));
        let outgoing = outgoing_by_note
            .get(note.id.as_str())
            .map(|targets| {
                targets
                    .iter()
                    .filter_map(|target| {
                        titles.get(*target).map(|title| WikilinkRef {
                            note_id: (*target).to_owned(),
                            title: title.clone(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let paths = shortest_paths_to_candidates(
            note.id.as_str(),
            &undirected,
            &candidate_set,
            &candidate_index,
            &titles,
        );

        chains.insert(
            note.id.clone(),
            SourceChain {
                origin_type: Some(note.source.as_str().to_owned()),
                artifact_id: note.artifact_id.clone(),
                slug: note.slug.clone(),
                community_id: note.community_id,
                community_name: community.map(|c| {
                    c.label
                        .clone()
                        .unwrap_or_else(|| format!("Cluster {}", c.community_id))
                }),
                community_top_terms: community.map(|c| c.top_terms.join(", ")),
                tags: note
                    .tag_ids
                    .iter()
                    .filter_map(|id| tags.get(id).cloned())
                    .collect(),
                outgoing,
                paths,
            },
        );
    }

    Ok(chains)
}

async fn note_titles(
    db: &SurrealDbClient,
    user_id: &str,
    ids: &HashSet<String>,
) -> Result<HashMap<String, String>, AppError> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    #[derive(serde::Deserialize)]
    struct Row {
        id: surrealdb::sql::Thing,
        title: String,
    }

    let things: Vec<surrealdb::sql::Thing> = ids
        .iter()
        .map(|id| surrealdb::sql::Thing::from(("note", id.as_str())))
        .collect();
    let mut response = db
        .query(
            "SELECT id, title FROM note WHERE id IN $things AND user_id = $user_id \
             AND is_trashed = false",
        )
        .bind(("things", things))
        .bind(("user_id", user_id.to_owned()))
        .await?;
    let rows: Vec<Row> = response.take(0)?;
    Ok(rows
        .into_iter()
        .map(|row| (row.id.id.to_raw(), row.title))
        .collect())
}

/// Iterative BFS with a visited set and a two-hop bound; wikilink graphs
/// contain cycles, so the bound is what terminates the walk.
fn shortest_paths_to_candidates(
    start: &str,
    undirected: &HashMap<&str, Vec<&str>>,
    candidates: &HashSet<&str>,
    candidate_index: &HashMap<&str, u32>,
    titles: &HashMap<String, String>,
) -> Vec<CitationPath> {
    let mut paths = Vec::new();
    let mut visited: HashSet<&str> = HashSet::new();
    visited.insert(start);

    let mut queue: VecDeque<(&str, u32, Vec<&str>)> = VecDeque::new();
    queue.push_back((start, 0, Vec::new()));

    let mut reached: HashSet<&str> = HashSet::new();

    while let Some((node, depth, via)) = queue.pop_front() {
        if depth >= 2 {
            continue;
        }
        let Some(neighbors) = undirected.get(node) else {
            continue;
        };
        for &neighbor in neighbors {
            if !visited.insert(neighbor) {
                continue;
            }
            let mut next_via = via.clone();
            if depth > 0 {
                next_via.push(node);
            }

            if candidates.contains(neighbor) && neighbor != start && reached.insert(neighbor) {
                if let Some(&target_index) = candidate_index.get(neighbor) {
                    paths.push(CitationPath {
                        target_index,
                        hop_count: depth + 1,
                        via_titles: next_via
                            .iter()
                            .filter_map(|id| titles.get(*id).cloned())
                            .collect(),
                    });
                }
            }
            queue.push_back((neighbor, depth + 1, next_via));
        }
    }

    paths.sort_by_key(|path| (path.hop_count, path.target_index));
    paths
}

/// Pack ranked candidates into a token-budgeted prompt with rich
/// citations, connection insights and exploration suggestions.
#[allow(clippy::too_many_lines)]
pub fn build_context(
    ranked: &[RankedResult],
    chains: &HashMap<String, SourceChain>,
    communities: &[CommunityMetadata],
    tag_counts: &[(String, usize)],
    co_retrieved_pairs: &HashSet<(String, String)>,
    config: &ContextConfig,
) -> AssembledContext {
    let mut prompt = String::from(SYSTEM_PREAMBLE);
    prompt.push_str("\n\nSOURCES:\n");

    let mut citations: Vec<RichCitation> = Vec::new();
    let mut total_tokens = estimate_tokens(&prompt);
    let mut truncated = false;

    for ranked_result in ranked {
        let result = &ranked_result.result;
        let index = citations.len() as u32 + 1;
        let chain = result
            .note_id
            .as_deref()
            .and_then(|note_id| chains.get(note_id));

        let preview: String = result.content.chars().take(config.preview_chars).collect();
        let mut block = format!(
            "[{index}] {} ({})",
            if result.title.is_empty() {
                "Untitled"
            } else {
                result.title.as_str()
            },
            result.source_type.as_str()
        );
        if let Some(community) = chain.and_then(|c| c.community_name.as_deref()) {
            block.push_str(&format!(" — community: {community}"));
        }
        block.push('\n');
        block.push_str(&preview);
        block.push_str("\n\n");

        let block_tokens = estimate_tokens(&block);
        if total_tokens + block_tokens > config.context_budget {
            truncated = true;
            break;
        }
        prompt.push_str(&block);
        total_tokens += block_tokens;

        let (note_url, graph_url) = match (&result.note_id, chain) {
            (Some(note_id), Some(chain)) if !chain.slug.is_empty() => (
                Some(format!("/notes/{}", chain.slug)),
                Some(format!("/graph?focus={note_id}")),
            ),
            (Some(note_id), _) => (None, Some(format!("/graph?focus={note_id}"))),
            _ => (None, None),
        };
        let artifact_url = chain.and_then(|c| {
            c.artifact_id.as_ref().map(|artifact| {
                match c.origin_type.as_deref() {
                    Some("image_analysis") => format!("/images/{artifact}"),
                    _ => format!("/documents/{artifact}"),
                }
            })
        });

        citations.push(RichCitation {
            index,
            source_type: result.source_type,
            source_id: result.source_id.clone(),
            title: result.title.clone(),
            content_preview: preview,
            relevance_score: ranked_result.final_score,
            retrieval_method: result.retrieval_method.clone(),
            hop_count: 0,
            origin_type: chain.and_then(|c| c.origin_type.clone()),
            artifact_id: chain.and_then(|c| c.artifact_id.clone()),
            community_id: chain.and_then(|c| c.community_id),
            community_name: chain.and_then(|c| c.community_name.clone()),
            community_top_terms: chain.and_then(|c| c.community_top_terms.clone()),
            tags: chain.map(|c| c.tags.clone()).unwrap_or_default(),
            direct_wikilinks: chain.map(|c| c.outgoing.clone()).unwrap_or_default(),
            path_to_other_results: chain.map(|c| c.paths.clone()).unwrap_or_default(),
            note_url,
            graph_url,
            artifact_url,
        });
    }

    let connection_insights =
        derive_connection_insights(&citations, co_retrieved_pairs, config.max_insight_chars);
    let exploration_suggestions =
        derive_exploration_suggestions(&citations, communities, tag_counts, config.max_suggestions);

    AssembledContext {
        system_prompt: prompt,
        rich_citations: citations,
        connection_insights,
        exploration_suggestions,
        total_tokens_approx: total_tokens,
        truncated,
    }
}

/// One insight per connected pair of included citations, capped by a
/// character budget.
fn derive_connection_insights(
    citations: &[RichCitation],
    co_retrieved_pairs: &HashSet<(String, String)>,
    max_chars: usize,
) -> Vec<ConnectionInsight> {
    let mut insights = Vec::new();
    let mut used_chars = 0usize;

    for i in 0..citations.len() {
        for j in (i + 1)..citations.len() {
            let a = &citations[i];
            let b = &citations[j];

            let insight = if a
                .direct_wikilinks
                .iter()
                .any(|link| link.note_id == b.source_id)
                || b.direct_wikilinks
                    .iter()
                    .any(|link| link.note_id == a.source_id)
            {
                Some((
                    "wikilink",
                    format!("\"{}\" links directly to \"{}\"", a.title, b.title),
                ))
            } else if a.community_id.is_some() && a.community_id == b.community_id {
                let community = a.community_name.clone().unwrap_or_default();
                Some((
                    "shared_community",
                    format!(
                        "\"{}\" and \"{}\" belong to the {community} community",
                        a.title, b.title
                    ),
                ))
            } else if let Some(shared) = a.tags.iter().find(|tag| b.tags.contains(tag)) {
                Some((
                    "shared_tag",
                    format!("\"{}\" and \"{}\" share the #{shared} tag", a.title, b.title),
                ))
            } else if pair_key(&a.source_id, &b.source_id)
                .map(|key| co_retrieved_pairs.contains(&key))
                .unwrap_or(false)
            {
                Some((
                    "co_retrieval",
                    format!(
                        "\"{}\" and \"{}\" are often retrieved together",
                        a.title, b.title
                    ),
                ))
            } else {
                None
            };

            if let Some((connection_type, description)) = insight {
                let cost = description.chars().count();
                if used_chars + cost > max_chars {
                    return insights;
                }
                used_chars += cost;
                insights.push(ConnectionInsight {
                    source_index: a.index,
                    target_index: b.index,
                    connection_type: connection_type.to_owned(),
                    description,
                });
            }
        }
    }

    insights
}

fn pair_key(a: &str, b: &str) -> Option<(String, String)> {
    if a == b {
        return None;
    }
    if a < b {
        Some((a.to_owned(), b.to_owned()))
    } else {
        Some((b.to_owned(), a.to_owned()))
    }
}

/// Suggest follow-up angles from communities and tags the current
/// citations do not cover.
fn derive_exploration_suggestions(
    citations: &[RichCitation],
    communities: &[CommunityMetadata],
    tag_counts: &[(String, usize)],
    max_suggestions: usize,
) -> Vec<ExplorationSuggestion> {
    let covered_communities: HashSet<i64> =
        citations.iter().filter_map(|c| c.community_id).collect();
    let covered_tags: HashSet<&str> = citations
        .iter()
        .flat_map(|c| c.tags.iter().map(String::as_str))
        .collect();

    let mut suggestions = Vec::new();

    for community in communities {
        if suggestions.len() >= max_suggestions {
            return suggestions;
        }
        if covered_communities.contains(&community.community_id) {
            continue;
        }
        let label = community
            .label
            .clone()
            .unwrap_or_else(|| format!("cluster {}", community.community_id));
        suggestions.push(ExplorationSuggestion {
            query: format!("What do my notes say about {label}?"),
            reason: format!(
                "The {label} community ({} notes) was not part of this answer",
                community.node_count
            ),
            related_citation_indices: Vec::new(),
        });
    }

    for (tag, count) in tag_counts {
        if suggestions.len() >= max_suggestions {
            break;
        }
        if covered_tags.contains(tag.as_str()) {
            continue;
        }
        suggestions.push(ExplorationSuggestion {
            query: format!("Show my #{tag} notes"),
            reason: format!("#{tag} ({count} notes) is untouched by this answer"),
            related_citation_indices: Vec::new(),
        });
    }

    suggestions
}

/// Scan the assistant answer for `[n]` markers referencing citations.
pub fn extract_used_indices(answer: &str, citation_count: usize) -> Vec<u32> {
    let mut used = Vec::new();
    let bytes = answer.as_bytes();
    let mut position = 0;

    while let Some(open) = answer[position..].find('[') {
        let start = position + open + 1;
        let Some(close) = answer[start..].find(']') else {
            break;
        };
        let inner = &answer[start..start + close];
        if !inner.is_empty() && inner.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(index) = inner.parse::<u32>() {
                if index >= 1 && (index as usize) <= citation_count && !used.contains(&index) {
                    used.push(index);
                }
            }
        }
        position = start + close + 1;
        if position >= bytes.len() {
            break;
        }
    }

    used.sort_unstable();
    used
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RetrievalResult, SourceType};

    fn ranked(id: &str, title: &str, content: &str, score: f32) -> RankedResult {
        RankedResult {
            result: RetrievalResult {
                source_type: SourceType::Note,
                source_id: id.to_owned(),
                note_id: Some(id.to_owned()),
                title: title.to_owned(),
                content: content.to_owned(),
                similarity: score,
                retrieval_method: "vector".to_owned(),
            },
            final_score: score,
            rank: 0,
            contributing_methods: vec!["vector".to_owned()],
        }
    }

    fn chain_with_community(community_id: i64, name: &str) -> SourceChain {
        SourceChain {
            origin_type: Some("manual".to_owned()),
            community_id: Some(community_id),
            community_name: Some(name.to_owned()),
            community_top_terms: Some("docker, networking".to_owned()),
            slug: "note-slug".to_owned(),
            ..SourceChain::default()
        }
    }

    #[test]
    fn test_budget_is_honored_and_truncation_reported() {
        let long_content = "x".repeat(4000);
        let ranked_results = vec![
            ranked("a", "First", &long_content, 0.9),
            ranked("b", "Second", &long_content, 0.8),
            ranked("c", "Third", &long_content, 0.7),
        ];

        let config = ContextConfig {
            context_budget: 300,
            preview_chars: 400,
            ..ContextConfig::default()
        };
        let context = build_context(
            &ranked_results,
            &HashMap::new(),
            &[],
            &[],
            &HashSet::new(),
            &config,
        );

        assert!(context.total_tokens_approx <= config.context_budget);
        assert!(context.truncated);
        assert!(context.rich_citations.len() < 3);

        // Dropping the last citation keeps the total under budget
        assert!(!context.rich_citations.is_empty());
    }

    #[test]
    fn test_citations_are_numbered_in_rank_order() {
        let ranked_results = vec![
            ranked("a", "First", "alpha", 0.9),
            ranked("b", "Second", "beta", 0.8),
        ];
        let context = build_context(
            &ranked_results,
            &HashMap::new(),
            &[],
            &[],
            &HashSet::new(),
            &ContextConfig::default(),
        );

        assert_eq!(context.rich_citations.len(), 2);
        assert_eq!(context.rich_citations[0].index, 1);
        assert_eq!(context.rich_citations[1].index, 2);
        assert!(context.system_prompt.contains("[1] First"));
        assert!(context.system_prompt.contains("[2] Second"));
        assert!(!context.truncated);
    }

    #[test]
    fn test_shared_community_insight() {
        let mut chains = HashMap::new();
        chains.insert("a".to_owned(), chain_with_community(1, "Infrastructure"));
        chains.insert("b".to_owned(), chain_with_community(1, "Infrastructure"));

        let ranked_results = vec![
            ranked("a", "Docker", "alpha", 0.9),
            ranked("b", "Networking", "beta", 0.8),
        ];
        let context = build_context(
            &ranked_results,
            &chains,
            &[],
            &[],
            &HashSet::new(),
            &ContextConfig::default(),
        );

        assert_eq!(context.connection_insights.len(), 1);
        assert_eq!(
            context.connection_insights[0].connection_type,
            "shared_community"
        );
        assert!(context.connection_insights[0]
            .description
            .contains("Infrastructure"));
    }

    #[test]
    fn test_wikilink_insight_wins_over_community() {
        let mut chain_a = chain_with_community(1, "Infrastructure");
        chain_a.outgoing = vec![WikilinkRef {
            note_id: "b".to_owned(),
            title: "Networking".to_owned(),
        }];
        let mut chains = HashMap::new();
        chains.insert("a".to_owned(), chain_a);
        chains.insert("b".to_owned(), chain_with_community(1, "Infrastructure"));

        let ranked_results = vec![
            ranked("a", "Docker", "alpha", 0.9),
            ranked("b", "Networking", "beta", 0.8),
        ];
        let context = build_context(
            &ranked_results,
            &chains,
            &[],
            &[],
            &HashSet::new(),
            &ContextConfig::default(),
        );
        assert_eq!(context.connection_insights[0].connection_type, "wikilink");
    }

    #[test]
    fn test_exploration_suggestions_skip_covered_communities() {
        let mut chains = HashMap::new();
        chains.insert("a".to_owned(), chain_with_community(1, "Infrastructure"));

        let communities = vec![
            {
                let mut c = CommunityMetadata::new("user1".into(), 1, 4, vec!["docker".into()]);
                c.label = Some("Infrastructure".into());
                c
            },
            {
                let mut c = CommunityMetadata::new("user1".into(), 2, 3, vec!["sourdough".into()]);
                c.label = Some("Cooking".into());
                c
            },
        ];

        let ranked_results = vec![ranked("a", "Docker", "alpha", 0.9)];
        let context = build_context(
            &ranked_results,
            &chains,
            &communities,
            &[("cooking".to_owned(), 3)],
            &HashSet::new(),
            &ContextConfig::default(),
        );

        assert!(!context.exploration_suggestions.is_empty());
        assert!(context.exploration_suggestions[0].query.contains("Cooking"));
    }

    #[test]
    fn test_extract_used_indices() {
        let answer = "Docker uses bridges [1], as noted in [3]. Invalid: [9] [x] [12a]";
        assert_eq!(extract_used_indices(answer, 3), vec![1, 3]);
        assert_eq!(extract_used_indices("no markers", 3), Vec::<u32>::new());
        assert_eq!(extract_used_indices("[2][2][1]", 3), vec![1, 2]);
    }

    #[test]
    fn test_path_bfs_respects_hop_bound() {
        let mut undirected: HashMap<&str, Vec<&str>> = HashMap::new();
        undirected.insert("a", vec!["m1"]);
        undirected.insert("m1", vec!["a", "b"]);
        undirected.insert("b", vec!["m1", "m2"]);
        undirected.insert("m2", vec!["b", "c"]);
        undirected.insert("c", vec!["m2"]);

        let candidates: HashSet<&str> = ["a", "b", "c"].into_iter().collect();
        let candidate_index: HashMap<&str, u32> =
            [("a", 1), ("b", 2), ("c", 3)].into_iter().collect();
        let titles: HashMap<String, String> = [
            ("m1".to_owned(), "Middle one".to_owned()),
            ("b".to_owned(), "B".to_owned()),
        ]
        .into_iter()
        .collect();

        let paths =
            shortest_paths_to_candidates("a", &undirected, &candidates, &candidate_index, &titles);

        // b is two hops away (via m1); c is four hops away and out of range
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].target_index, 2);
        assert_eq!(paths[0].hop_count, 2);
        assert_eq!(paths[0].via_titles, vec!["Middle one".to_owned()]);
    }

    #[test]
    fn test_cycle_in_link_graph_terminates() {
        let mut undirected: HashMap<&str, Vec<&str>> = HashMap::new();
        undirected.insert("a", vec!["b"]);
        undirected.insert("b", vec!["a", "c"]);
        undirected.insert("c", vec!["b", "a"]);

        let candidates: HashSet<&str> = ["a", "c"].into_iter().collect();
        let candidate_index: HashMap<&str, u32> = [("a", 1), ("c", 2)].into_iter().collect();

        let paths = shortest_paths_to_candidates(
            "a",
            &undirected,
            &candidates,
            &candidate_index,
            &HashMap::new(),
        );
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].target_index, 2);
    }
}
