use std::collections::HashMap;

use tracing::info;

use crate::{router::QueryIntent, RankedResult, RetrievalResult};

/// Cross-confirmation multiplier for candidates seen by several strategies.
pub const CROSS_CONFIRMATION_BOOST: f32 = 1.3;

#[derive(Debug, Clone)]
pub struct FusionConfig {
    pub max_results: usize,
    pub cross_confirmation_boost: f32,
    /// Fused scores are naturally small; this floor only sheds noise.
    pub min_score: f32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            max_results: 10,
            cross_confirmation_boost: CROSS_CONFIRMATION_BOOST,
            min_score: 0.001,
        }
    }
}

/// Intent -> (graph, vector, diffusion) weights.
pub const fn intent_weights(intent: QueryIntent) -> (f32, f32, f32) {
    match intent {
        QueryIntent::Factual => (0.30, 0.50, 0.20),
        QueryIntent::Synthesis => (0.40, 0.30, 0.30),
        QueryIntent::Exploration => (0.50, 0.20, 0.30),
        QueryIntent::Temporal => (0.20, 0.60, 0.20),
        QueryIntent::Creative => (0.40, 0.40, 0.20),
    }
}

struct CandidateScores {
    result: RetrievalResult,
    vector_score: f32,
    graph_score: f32,
    diffusion_score: f32,
    strategies: Vec<String>,
    /// Position in the first strategy that saw this candidate, for
    /// deterministic tie-breaking.
    appearance: usize,
}

/// Merge per-strategy candidates via intent-weighted scoring with
/// cross-confirmation boosts.
///
/// Missing strategies donate their weight (graph to vector, diffusion half
/// to each) and the weights are renormalized so they always sum to one.
/// Given the same inputs the output ordering is identical across runs.
pub fn fuse_results(
    vector_results: Vec<RankedResult>,
    graph_results: Option<Vec<RetrievalResult>>,
    diffusion_scores: Option<&HashMap<String, f32>>,
    intent: QueryIntent,
    config: &FusionConfig,
) -> Vec<RankedResult> {
    let (mut graph_w, mut vector_w, mut diffusion_w) = intent_weights(intent);

    let has_graph = graph_results.as_ref().is_some_and(|g| !g.is_empty());
    if !has_graph {
        vector_w += graph_w;
        graph_w = 0.0;
    }

    let has_diffusion = diffusion_scores.is_some_and(|d| !d.is_empty());
    if !has_diffusion {
        vector_w += diffusion_w * 0.5;
        graph_w += diffusion_w * 0.5;
        diffusion_w = 0.0;
    }

    let total = graph_w + vector_w + diffusion_w;
    if total > 0.0 {
        graph_w /= total;
        vector_w /= total;
        diffusion_w /= total;
    }

    // Insertion-ordered candidate map keyed by merge identity.
    let mut order: Vec<String> = Vec::new();
    let mut candidates: HashMap<String, CandidateScores> = HashMap::new();

    for ranked in vector_results {
        let key = ranked.result.merge_key();
        let appearance = order.len();
        order.push(key.clone());
        candidates.insert(
            key,
            CandidateScores {
                vector_score: ranked.final_score,
                graph_score: 0.0,
                diffusion_score: 0.0,
                strategies: vec!["vector".to_owned()],
                appearance,
                result: ranked.result,
            },
        );
    }

    if let Some(graph_results) = graph_results {
        for result in graph_results {
            let key = result.merge_key();
            if let Some(existing) = candidates.get_mut(&key) {
                existing.graph_score = result.similarity;
                existing.strategies.push("graph_nav".to_owned());
            } else {
                let appearance = order.len();
                order.push(key.clone());
                candidates.insert(
                    key,
                    CandidateScores {
                        graph_score: result.similarity,
                        vector_score: 0.0,
                        diffusion_score: 0.0,
                        strategies: vec!["graph_nav".to_owned()],
                        appearance,
                        result,
                    },
                );
            }
        }
    }

    if let Some(diffusion_scores) = diffusion_scores {
        for key in &order {
            let Some(candidate) = candidates.get_mut(key) else {
                continue;
            };
            let Some(note_id) = candidate.result.note_id.as_deref() else {
                continue;
            };
            if let Some(&score) = diffusion_scores.get(note_id) {
                candidate.diffusion_score = score;
                if !candidate.strategies.iter().any(|s| s == "diffusion") {
                    candidate.strategies.push("diffusion".to_owned());
                }
            }
        }
    }

    let mut fused: Vec<(f32, usize, RankedResult)> = Vec::new();
    for key in &order {
        let Some(candidate) = candidates.remove(key) else {
            continue;
        };

        let mut score = candidate.vector_score * vector_w
            + candidate.graph_score * graph_w
            + candidate.diffusion_score * diffusion_w;

        if candidate.strategies.len() > 1 {
            score *= config.cross_confirmation_boost;
        }
        if score < config.min_score {
            continue;
        }

        let rounded = (score * 10_000.0).round() / 10_000.0;
        fused.push((
            rounded,
            candidate.appearance,
            RankedResult {
                result: candidate.result,
                final_score: rounded,
                rank: 0,
                contributing_methods: candidate.strategies,
            },
        ));
    }

    // Descending score; equal scores keep first-appearance order in the
    // heavier strategy (vector entries come first in `order`), then ids.
    fused.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.cmp(&b.1))
            .then_with(|| a.2.result.source_id.cmp(&b.2.result.source_id))
    });

    let mut results: Vec<RankedResult> = fused
        .into_iter()
        .take(config.max_results)
        .map(|(_, _, ranked)| ranked)
        .collect();
    for (index, ranked) in results.iter_mut().enumerate() {
        ranked.rank = index as u32 + 1;
    }

    info!(
        results = results.len(),
        intent = intent.as_str(),
        vector_w,
        graph_w,
        diffusion_w,
        "Fusion complete"
    );
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SourceType;

    fn retrieval(id: &str, similarity: f32, method: &str) -> RetrievalResult {
        RetrievalResult {
            source_type: SourceType::Note,
            source_id: id.to_owned(),
            note_id: Some(id.to_owned()),
            title: format!("title {id}"),
            content: format!("content {id}"),
            similarity,
            retrieval_method: method.to_owned(),
        }
    }

    fn ranked(id: &str, score: f32) -> RankedResult {
        RankedResult {
            result: retrieval(id, score, "vector"),
            final_score: score,
            rank: 0,
            contributing_methods: vec!["vector".to_owned()],
        }
    }

    #[test]
    fn test_weights_sum_to_one_after_redistribution() {
        for intent in [
            QueryIntent::Factual,
            QueryIntent::Synthesis,
            QueryIntent::Exploration,
            QueryIntent::Temporal,
            QueryIntent::Creative,
        ] {
            let (g, v, d) = intent_weights(intent);
            assert!((g + v + d - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_vector_only_fusion_keeps_ordering() {
        let fused = fuse_results(
            vec![ranked("a", 0.9), ranked("b", 0.5)],
            None,
            None,
            QueryIntent::Factual,
            &FusionConfig::default(),
        );
        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].result.source_id, "a");
        assert_eq!(fused[0].rank, 1);
        // All weight redistributed to vector: 0.9 * 1.0
        assert!((fused[0].final_score - 0.9).abs() < 1e-4);
    }

    #[test]
    fn test_cross_confirmation_boost_applies() {
        let fused = fuse_results(
            vec![ranked("both", 0.6), ranked("vector_only", 0.6)],
            Some(vec![retrieval("both", 0.8, "graph_nav")]),
            None,
            QueryIntent::Factual,
            &FusionConfig::default(),
        );

        let both = fused
            .iter()
            .find(|r| r.result.source_id == "both")
            .expect("both present");
        let vector_only = fused
            .iter()
            .find(|r| r.result.source_id == "vector_only")
            .expect("vector_only present");

        // factual weights (0.3, 0.5, 0.2), diffusion missing redistributes
        // 0.1 to each: graph 0.4, vector 0.6.
        // both: (0.6*0.6 + 0.8*0.4) * 1.3 = 0.884; vector_only: 0.36
        assert!((both.final_score - 0.884).abs() < 1e-3);
        assert!((vector_only.final_score - 0.36).abs() < 1e-3);
        assert_eq!(both.rank, 1);
        assert!(both.contributing_methods.contains(&"graph_nav".to_owned()));
    }

    #[test]
    fn test_diffusion_scores_attach_by_note_id() {
        let mut diffusion = HashMap::new();
        diffusion.insert("a".to_owned(), 1.0_f32);

        let fused = fuse_results(
            vec![ranked("a", 0.5), ranked("b", 0.5)],
            None,
            Some(&diffusion),
            QueryIntent::Factual,
            &FusionConfig::default(),
        );

        let a = fused
            .iter()
            .find(|r| r.result.source_id == "a")
            .expect("a present");
        let b = fused
            .iter()
            .find(|r| r.result.source_id == "b")
            .expect("b present");
        assert!(a.final_score > b.final_score);
        assert!(a.contributing_methods.contains(&"diffusion".to_owned()));
    }

    #[test]
    fn test_fusion_is_deterministic() {
        let build = || {
            fuse_results(
                vec![ranked("a", 0.5), ranked("b", 0.5), ranked("c", 0.5)],
                Some(vec![
                    retrieval("b", 0.5, "graph_nav"),
                    retrieval("d", 0.5, "graph_nav"),
                ]),
                None,
                QueryIntent::Synthesis,
                &FusionConfig::default(),
            )
        };

        let first: Vec<String> = build()
            .into_iter()
            .map(|r| r.result.source_id)
            .collect();
        for _ in 0..10 {
            let again: Vec<String> = build()
                .into_iter()
                .map(|r| r.result.source_id)
                .collect();
            assert_eq!(first, again);
        }
    }

    #[test]
    fn test_min_score_floor_drops_noise() {
        let fused = fuse_results(
            vec![ranked("tiny", 0.0005)],
            None,
            None,
            QueryIntent::Factual,
            &FusionConfig::default(),
        );
        assert!(fused.is_empty());
    }

    #[test]
    fn test_max_results_truncates_with_dense_ranks() {
        let many: Vec<RankedResult> = (0..20)
            .map(|i| ranked(&format!("n{i:02}"), 1.0 - i as f32 * 0.01))
            .collect();
        let fused = fuse_results(
            many,
            None,
            None,
            QueryIntent::Factual,
            &FusionConfig {
                max_results: 5,
                ..FusionConfig::default()
            },
        );
        assert_eq!(fused.len(), 5);
        let ranks: Vec<u32> = fused.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4, 5]);
    }
}
