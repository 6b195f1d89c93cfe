use std::collections::HashMap;

use tracing::{debug, info};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{note::Note, note_link::NoteLink, semantic_edge::SemanticEdge},
    },
    utils::embedding::cosine_similarity,
};

/// Tunables for the personalized PageRank pass.
#[derive(Debug, Clone)]
pub struct DiffusionConfig {
    pub damping: f32,
    pub max_iterations: usize,
    pub convergence_threshold: f32,
    /// Upper bound on the working set, most-recently-updated notes first.
    pub max_candidates: usize,
}

impl Default for DiffusionConfig {
    fn default() -> Self {
        Self {
            damping: 0.85,
            max_iterations: 20,
            convergence_threshold: 1e-6,
            max_candidates: 500,
        }
    }
}

const WIKILINK_WEIGHT: f32 = 1.0;
const SEMANTIC_WEIGHT: f32 = 0.6;
const SHARED_TAG_WEIGHT: f32 = 0.5;

/// Personalized PageRank over wikilinks, semantic edges and shared tags.
///
/// Returns `note_id -> score` normalized to [0, 1] and filtered at 0.01.
/// An unusable graph (fewer than two embedded notes) yields an empty map.
pub async fn diffusion_rank(
    db: &SurrealDbClient,
    user_id: &str,
    query_embedding: Option<&[f32]>,
    config: &DiffusionConfig,
) -> Result<HashMap<String, f32>, AppError> {
    let notes = Note::recent_embedded(user_id, config.max_candidates, db).await?;
    if notes.len() < 2 {
        return Ok(HashMap::new());
    }

    let n = notes.len();
    let id_to_idx: HashMap<&str, usize> = notes
        .iter()
        .enumerate()
        .map(|(index, note)| (note.id.as_str(), index))
        .collect();

    // Dense adjacency; the working set is capped so n <= max_candidates.
    let mut adjacency = vec![0.0_f32; n * n];
    let mut add_edge = |target: usize, source: usize, weight: f32| {
        adjacency[target * n + source] += weight;
    };

    for link in NoteLink::all_for_user(user_id, db).await? {
        let (Some(&source), Some(&target)) = (
            id_to_idx.get(link.source_note_id.as_str()),
            id_to_idx.get(link.target_note_id.as_str()),
        ) else {
            continue;
        };
        add_edge(target, source, WIKILINK_WEIGHT);
        // Backlink at half weight
        add_edge(source, target, WIKILINK_WEIGHT * 0.5);
    }

    for edge in SemanticEdge::all_for_user(user_id, db).await? {
        let (Some(&source), Some(&target)) = (
            id_to_idx.get(edge.source_note_id.as_str()),
            id_to_idx.get(edge.target_note_id.as_str()),
        ) else {
            continue;
        };
        let weight = edge.similarity * SEMANTIC_WEIGHT;
        add_edge(target, source, weight);
        add_edge(source, target, weight);
    }

    add_shared_tag_edges(&notes, &mut adjacency, n);

    // Column-normalize so each source distributes a unit of score.
    for column in 0..n {
        let mut column_sum = 0.0_f32;
        for row in 0..n {
            column_sum += adjacency[row * n + column];
        }
        if column_sum > 0.0 {
            for row in 0..n {
                adjacency[row * n + column] /= column_sum;
            }
        }
    }

    let personalization = match query_embedding {
        Some(query) => build_personalization(&notes, query),
        None => vec![1.0 / n as f32; n],
    };

    // Power iteration: s <- (1 - d) p + d A s
    let mut scores = vec![1.0 / n as f32; n];
    for iteration in 0..config.max_iterations {
        let mut next = vec![0.0_f32; n];
        for row in 0..n {
            let mut propagated = 0.0_f32;
            for column in 0..n {
                propagated += adjacency[row * n + column] * scores[column];
            }
            next[row] = (1.0 - config.damping) * personalization[row]
                + config.damping * propagated;
        }

        let delta: f32 = next
            .iter()
            .zip(scores.iter())
            .map(|(a, b)| (a - b).abs())
            .sum();
        scores = next;
        if delta < config.convergence_threshold {
            debug!(iteration = iteration + 1, "Diffusion converged");
            break;
        }
    }

    let max_score = scores.iter().fold(0.0_f32, |acc, &s| acc.max(s));
    if max_score > 0.0 {
        for score in &mut scores {
            *score /= max_score;
        }
    }

    let ranked: HashMap<String, f32> = notes
        .iter()
        .zip(scores.iter())
        .filter(|(_, &score)| score > 0.01)
        .map(|(note, &score)| (note.id.clone(), score))
        .collect();

    info!(
        candidates = n,
        scored = ranked.len(),
        "Diffusion ranking complete"
    );
    Ok(ranked)
}

fn add_shared_tag_edges(notes: &[Note], adjacency: &mut [f32], n: usize) {
    for a in 0..notes.len() {
        if notes[a].tag_ids.is_empty() {
            continue;
        }
        for b in (a + 1)..notes.len() {
            let shares_tag = notes[a]
                .tag_ids
                .iter()
                .any(|tag| notes[b].tag_ids.contains(tag));
            if shares_tag {
                adjacency[a * n + b] += SHARED_TAG_WEIGHT;
                adjacency[b * n + a] += SHARED_TAG_WEIGHT;
            }
        }
    }
}

/// Per-note cosine to the query, floor-clipped at 0.01 and normalized to
/// a probability distribution.
fn build_personalization(notes: &[Note], query_embedding: &[f32]) -> Vec<f32> {
    let n = notes.len();
    let mut personalization = vec![1.0_f32; n];

    let query_norm: f32 = query_embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
    if query_norm == 0.0 {
        return vec![1.0 / n as f32; n];
    }

    for (index, note) in notes.iter().enumerate() {
        if let Some(embedding) = &note.embedding {
            let similarity = cosine_similarity(query_embedding, embedding);
            personalization[index] = similarity.max(0.01);
        }
    }

    let total: f32 = personalization.iter().sum();
    if total > 0.0 {
        for value in &mut personalization {
            *value /= total;
        }
    }
    personalization
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::note::NoteOrigin;
    use common::utils::embedding::EmbeddingProvider;

    async fn seeded_db() -> (SurrealDbClient, Vec<Note>) {
        let db = SurrealDbClient::memory("test_ns", &uuid::Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");
        let embedder = EmbeddingProvider::new_hashed(32).expect("embedder");

        let mut notes = Vec::new();
        for (title, content) in [
            ("Hub", "docker networking hub"),
            ("Spoke one", "docker bridge"),
            ("Spoke two", "docker compose"),
        ] {
            let mut note = Note::new(
                "user1".into(),
                title.into(),
                content.into(),
                NoteOrigin::Manual,
            );
            note.embedding = Some(embedder.embed(content).await.expect("embed"));
            db.store_item(note.clone()).await.expect("store note");
            notes.push(note);
        }

        (db, notes)
    }

    #[tokio::test]
    async fn test_too_few_notes_yields_empty() {
        let db = SurrealDbClient::memory("test_ns", &uuid::Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");

        let scores = diffusion_rank(&db, "user1", None, &DiffusionConfig::default())
            .await
            .expect("diffusion");
        assert!(scores.is_empty());
    }

    #[tokio::test]
    async fn test_linked_hub_outranks_isolated_note() {
        let (db, notes) = seeded_db().await;

        // Both spokes link to the hub; spoke two receives nothing.
        NoteLink::upsert("user1", &notes[1].id, &notes[0].id, &db)
            .await
            .expect("link one");
        NoteLink::upsert("user1", &notes[2].id, &notes[0].id, &db)
            .await
            .expect("link two");

        let scores = diffusion_rank(&db, "user1", None, &DiffusionConfig::default())
            .await
            .expect("diffusion");

        let hub = scores.get(&notes[0].id).copied().unwrap_or(0.0);
        let spoke = scores.get(&notes[2].id).copied().unwrap_or(0.0);
        assert!(hub > spoke, "hub {hub} should outrank spoke {spoke}");
        // Scores are normalized to [0, 1] with the max pinned at 1
        assert!((hub - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_query_personalization_steers_scores() {
        let (db, notes) = seeded_db().await;
        let embedder = EmbeddingProvider::new_hashed(32).expect("embedder");

        // A ring so every note has identical link structure
        NoteLink::upsert("user1", &notes[0].id, &notes[1].id, &db)
            .await
            .expect("link");
        NoteLink::upsert("user1", &notes[1].id, &notes[2].id, &db)
            .await
            .expect("link");
        NoteLink::upsert("user1", &notes[2].id, &notes[0].id, &db)
            .await
            .expect("link");

        let query = embedder.embed("docker bridge").await.expect("embed query");
        let scores = diffusion_rank(&db, "user1", Some(&query), &DiffusionConfig::default())
            .await
            .expect("diffusion");

        // The note about "docker bridge" should lead with the topology tied
        let bridge_score = scores.get(&notes[1].id).copied().unwrap_or(0.0);
        for (index, note) in notes.iter().enumerate() {
            if index != 1 {
                let other = scores.get(&note.id).copied().unwrap_or(0.0);
                assert!(bridge_score >= other);
            }
        }
    }

    #[tokio::test]
    async fn test_semantic_edges_contribute() {
        let (db, notes) = seeded_db().await;

        SemanticEdge::upsert("user1", &notes[0].id, &notes[1].id, 0.95, &db)
            .await
            .expect("edge");

        let scores = diffusion_rank(&db, "user1", None, &DiffusionConfig::default())
            .await
            .expect("diffusion");

        let connected = scores.get(&notes[0].id).copied().unwrap_or(0.0);
        let isolated = scores.get(&notes[2].id).copied().unwrap_or(0.0);
        assert!(connected > isolated);
    }
}
