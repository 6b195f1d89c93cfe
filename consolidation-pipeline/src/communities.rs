use std::collections::HashMap;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            community::CommunityMetadata,
            note::Note,
            note_link::NoteLink,
            semantic_edge::SemanticEdge,
            tag::Tag,
        },
    },
};

use crate::StepOutcome;

const MAX_PASSES: usize = 20;
const TOP_TERMS: usize = 5;

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "and", "or", "but", "in", "on",
    "at", "to", "for", "of", "with", "by", "from", "as", "into", "this", "that", "it", "not",
    "no", "do", "does", "did", "has", "have", "had", "will", "would", "could", "should", "may",
    "might", "can", "my", "me", "we", "our", "you", "your", "they", "them", "about", "how",
    "what", "when", "where", "which", "who", "some", "all", "any", "more", "very", "just",
    "also", "so", "notes",
];

/// Modularity-flavored clustering via weighted label propagation.
///
/// Deterministic: nodes are visited in stable order and ties resolve to
/// the smallest label. Isolated nodes come back as community -1.
pub fn detect_communities(
    nodes: &[String],
    weighted_edges: &[(String, String, f32)],
) -> HashMap<String, i64> {
    let n = nodes.len();
    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();

    let mut neighbors: Vec<Vec<(usize, f32)>> = vec![Vec::new(); n];
    for (a, b, weight) in weighted_edges {
        if let (Some(&i), Some(&j)) = (index.get(a.as_str()), index.get(b.as_str())) {
            if i != j {
                neighbors[i].push((j, *weight));
                neighbors[j].push((i, *weight));
            }
        }
    }

    let mut labels: Vec<usize> = (0..n).collect();
    for _ in 0..MAX_PASSES {
        let mut changed = false;
        for node in 0..n {
            if neighbors[node].is_empty() {
                continue;
            }

            let mut tally: HashMap<usize, f32> = HashMap::new();
            for &(neighbor, weight) in &neighbors[node] {
                *tally.entry(labels[neighbor]).or_insert(0.0) += weight;
            }

            let mut best_label = labels[node];
            let mut best_weight = f32::MIN;
            let mut sorted: Vec<(usize, f32)> = tally.into_iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(&b.0));
            for (label, weight) in sorted {
                if weight > best_weight {
                    best_weight = weight;
                    best_label = label;
                }
            }

            if best_label != labels[node] {
                labels[node] = best_label;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    // Renumber to dense ids ordered by community size, largest first.
    // Cluster ids are stable within a run, not across runs.
    let mut sizes: HashMap<usize, usize> = HashMap::new();
    for (node, &label) in labels.iter().enumerate() {
        if !neighbors[node].is_empty() {
            *sizes.entry(label).or_insert(0) += 1;
        }
    }
    let mut ordered: Vec<(usize, usize)> = sizes.into_iter().collect();
    ordered.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let renumber: HashMap<usize, i64> = ordered
        .iter()
        .enumerate()
        .map(|(new_id, (old_label, _))| (*old_label, new_id as i64))
        .collect();

    nodes
        .iter()
        .enumerate()
        .map(|(node, id)| {
            let community = if neighbors[node].is_empty() {
                -1
            } else {
                renumber.get(&labels[node]).copied().unwrap_or(-1)
            };
            (id.clone(), community)
        })
        .collect()
}

/// Most frequent non-stop-word terms across member titles and tags.
fn top_terms(members: &[&Note], tag_names: &HashMap<String, String>) -> Vec<String> {
    let mut frequency: HashMap<String, usize> = HashMap::new();

    for note in members {
        for word in note.title.to_lowercase().split_whitespace() {
            let word = word.trim_matches(|c: char| !c.is_alphanumeric());
            if word.len() > 2 && !STOP_WORDS.contains(&word) {
                *frequency.entry(word.to_owned()).or_insert(0) += 3;
            }
        }
        for tag_id in &note.tag_ids {
            if let Some(name) = tag_names.get(tag_id) {
                *frequency.entry(name.clone()).or_insert(0) += 2;
            }
        }
    }

    let mut terms: Vec<(String, usize)> = frequency.into_iter().collect();
    terms.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    terms.into_iter().take(TOP_TERMS).map(|(t, _)| t).collect()
}

fn label_from_terms(terms: &[String]) -> Option<String> {
    terms.first().map(|term| {
        let mut chars = term.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
            None => term.clone(),
        }
    })
}

/// Consolidation step 2: refresh community metadata and each note's
/// community assignment.
pub async fn refresh_communities(
    db: &SurrealDbClient,
    user_id: &str,
) -> Result<StepOutcome, AppError> {
    let notes = Note::live_for_user(user_id, db).await?;
    if notes.len() < 3 {
        return Err(AppError::Clustering(format!(
            "need at least 3 notes, found {}",
            notes.len()
        )));
    }

    let node_ids: Vec<String> = notes.iter().map(|note| note.id.clone()).collect();
    let mut edges: Vec<(String, String, f32)> = NoteLink::all_for_user(user_id, db)
        .await?
        .into_iter()
        .map(|link| (link.source_note_id, link.target_note_id, 1.0))
        .collect();
    edges.extend(
        SemanticEdge::all_for_user(user_id, db)
            .await?
            .into_iter()
            .map(|edge| (edge.source_note_id, edge.target_note_id, edge.similarity)),
    );

    if edges.is_empty() {
        return Err(AppError::Clustering("graph has no edges".into()));
    }

    let assignments = detect_communities(&node_ids, &edges);

    let tag_names: HashMap<String, String> = Tag::all_for_user(user_id, db)
        .await?
        .into_iter()
        .map(|tag| (tag.id, tag.name))
        .collect();

    let mut members_by_community: HashMap<i64, Vec<&Note>> = HashMap::new();
    for note in &notes {
        let community = assignments.get(&note.id).copied().unwrap_or(-1);
        if community >= 0 {
            members_by_community.entry(community).or_default().push(note);
        }
    }

    let mut metadata = Vec::new();
    for (community_id, members) in &members_by_community {
        let terms = top_terms(members, &tag_names);
        let mut row = CommunityMetadata::new(
            user_id.to_owned(),
            *community_id,
            members.len() as u32,
            terms.clone(),
        );
        row.label = label_from_terms(&terms);
        metadata.push(row);
    }
    metadata.sort_by_key(|community| community.community_id);
    let community_count = metadata.len();

    CommunityMetadata::replace_for_user(user_id, metadata, db).await?;
    for note in &notes {
        let community = assignments.get(&note.id).copied().unwrap_or(-1);
        Note::set_community(&note.id, community, db).await?;
    }

    Ok(StepOutcome::success(format!(
        "{community_count} communities over {} notes",
        notes.len()
    )))
}
