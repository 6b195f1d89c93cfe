use std::collections::HashMap;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{importance_score::ImportanceScore, note::Note, note_link::NoteLink},
    },
};

use crate::StepOutcome;

const DAMPING: f32 = 0.85;
const MAX_ITERATIONS: usize = 100;
const CONVERGENCE: f32 = 1e-6;

/// Standard PageRank over the directed wikilink graph.
///
/// Dangling nodes distribute their score uniformly, as the classic
/// formulation does.
pub fn pagerank(
    nodes: &[String],
    edges: &[(String, String)],
    damping: f32,
    max_iterations: usize,
) -> HashMap<String, f32> {
    let n = nodes.len();
    if n == 0 {
        return HashMap::new();
    }

    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();

    let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (source, target) in edges {
        if let (Some(&s), Some(&t)) = (index.get(source.as_str()), index.get(target.as_str())) {
            if s != t {
                outgoing[s].push(t);
            }
        }
    }

    let uniform = 1.0 / n as f32;
    let mut scores = vec![uniform; n];

    for _ in 0..max_iterations {
        let mut next = vec![(1.0 - damping) * uniform; n];
        let mut dangling_mass = 0.0_f32;

        for source in 0..n {
            if outgoing[source].is_empty() {
                dangling_mass += scores[source];
                continue;
            }
            let share = scores[source] / outgoing[source].len() as f32;
            for &target in &outgoing[source] {
                next[target] += damping * share;
            }
        }

        let dangling_share = damping * dangling_mass * uniform;
        for value in &mut next {
            *value += dangling_share;
        }

        let delta: f32 = next
            .iter()
            .zip(scores.iter())
            .map(|(a, b)| (a - b).abs())
            .sum();
        scores = next;
        if delta < CONVERGENCE {
            break;
        }
    }

    nodes
        .iter()
        .zip(scores)
        .map(|(id, score)| (id.clone(), score))
        .collect()
}

/// Consolidation step 1: recompute per-note importance scores.
pub async fn refresh_importance_scores(
    db: &SurrealDbClient,
    user_id: &str,
) -> Result<StepOutcome, AppError> {
    let notes = Note::live_for_user(user_id, db).await?;
    let note_ids: std::collections::HashSet<&str> =
        notes.iter().map(|note| note.id.as_str()).collect();

    let edges: Vec<(String, String)> = NoteLink::all_for_user(user_id, db)
        .await?
        .into_iter()
        .filter(|link| {
            note_ids.contains(link.source_note_id.as_str())
                && note_ids.contains(link.target_note_id.as_str())
        })
        .map(|link| (link.source_note_id, link.target_note_id))
        .collect();

    if edges.is_empty() {
        return Ok(StepOutcome::Skipped {
            reason: "no graph edges".into(),
        });
    }

    // Only nodes touching an edge get scored, matching the graph build
    let mut linked: Vec<String> = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for (source, target) in &edges {
        if seen.insert(source.clone()) {
            linked.push(source.clone());
        }
        if seen.insert(target.clone()) {
            linked.push(target.clone());
        }
    }

    let scores = pagerank(&linked, &edges, DAMPING, MAX_ITERATIONS);
    let rows: Vec<(String, f32)> = scores.into_iter().collect();
    let updated = ImportanceScore::upsert_scores(user_id, &rows, db).await?;

    Ok(StepOutcome::success(format!("{updated} notes scored")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_graph() {
        assert!(pagerank(&[], &[], DAMPING, MAX_ITERATIONS).is_empty());
    }

    #[test]
    fn test_sink_node_accumulates_score() {
        let nodes: Vec<String> = ["a", "b", "c"].iter().map(|s| (*s).to_string()).collect();
        let edges = vec![
            ("a".to_string(), "c".to_string()),
            ("b".to_string(), "c".to_string()),
        ];

        let scores = pagerank(&nodes, &edges, DAMPING, MAX_ITERATIONS);
        let a = scores["a"];
        let c = scores["c"];
        assert!(c > a, "sink {c} should outrank source {a}");

        let total: f32 = scores.values().sum();
        assert!((total - 1.0).abs() < 1e-3, "scores sum to ~1, got {total}");
    }

    #[test]
    fn test_symmetric_cycle_is_uniform() {
        let nodes: Vec<String> = ["a", "b", "c"].iter().map(|s| (*s).to_string()).collect();
        let edges = vec![
            ("a".to_string(), "b".to_string()),
            ("b".to_string(), "c".to_string()),
            ("c".to_string(), "a".to_string()),
        ];

        let scores = pagerank(&nodes, &edges, DAMPING, MAX_ITERATIONS);
        for value in scores.values() {
            assert!((value - 1.0 / 3.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_self_links_are_ignored() {
        let nodes: Vec<String> = ["a", "b"].iter().map(|s| (*s).to_string()).collect();
        let edges = vec![
            ("a".to_string(), "a".to_string()),
            ("a".to_string(), "b".to_string()),
        ];
        let scores = pagerank(&nodes, &edges, DAMPING, MAX_ITERATIONS);
        assert!(scores["b"] > scores["a"]);
    }
}
