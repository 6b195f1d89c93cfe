pub mod communities;
pub mod missing_links;
pub mod navigation_cache;
pub mod pagerank;
pub mod semantic_edges;

use serde::Serialize;
use tracing::{error, info, instrument};

use common::{error::AppError, storage::db::SurrealDbClient, utils::config::AppConfig};

/// Result of one consolidation step.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    Success {
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    Skipped {
        reason: String,
    },
    Failed {
        error: String,
    },
}

impl StepOutcome {
    pub fn success(detail: impl Into<String>) -> Self {
        StepOutcome::Success {
            detail: Some(detail.into()),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StepOutcome::Failed { .. })
    }
}

/// Per-step outcomes of one consolidation run.
#[derive(Debug, Clone, Serialize)]
pub struct ConsolidationReport {
    pub pagerank: StepOutcome,
    pub communities: StepOutcome,
    pub semantic_edges: StepOutcome,
    pub missing_links: StepOutcome,
    pub navigation_cache: StepOutcome,
}

/// Refresh the owner's derived graph state.
///
/// Idempotent; steps run sequentially with their writes in their own
/// transactions, and one step failing never aborts the rest.
#[instrument(skip_all, fields(user_id))]
pub async fn run_consolidation(
    db: &SurrealDbClient,
    user_id: &str,
    config: &AppConfig,
) -> Result<ConsolidationReport, AppError> {
    let pagerank = match pagerank::refresh_importance_scores(db, user_id).await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(error = %err, "PageRank step failed");
            StepOutcome::Failed {
                error: err.to_string(),
            }
        }
    };

    let communities = match communities::refresh_communities(db, user_id).await {
        Ok(outcome) => outcome,
        Err(AppError::Clustering(reason)) => StepOutcome::Skipped { reason },
        Err(err) => {
            error!(error = %err, "Community refresh failed");
            StepOutcome::Failed {
                error: err.to_string(),
            }
        }
    };

    let semantic_edges = match semantic_edges::refresh_semantic_edges(
        db,
        user_id,
        config.semantic_edge_threshold,
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(error = %err, "Semantic edge refresh failed");
            StepOutcome::Failed {
                error: err.to_string(),
            }
        }
    };

    let missing_links =
        match missing_links::detect_missing_links(db, user_id, config.missing_link_threshold)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(error = %err, "Missing-link detection failed");
                StepOutcome::Failed {
                    error: err.to_string(),
                }
            }
        };

    let navigation_cache = match navigation_cache::rebuild_navigation_cache(db, user_id).await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(error = %err, "Navigation cache rebuild failed");
            StepOutcome::Failed {
                error: err.to_string(),
            }
        }
    };

    let report = ConsolidationReport {
        pagerank,
        communities,
        semantic_edges,
        missing_links,
        navigation_cache,
    };
    info!(report = ?report, "Consolidation complete");
    Ok(report)
}
