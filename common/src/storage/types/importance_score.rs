use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

// Per-note PageRank importance, refreshed by consolidation.
stored_object!(ImportanceScore, "nexus_importance_score", {
    user_id: String,
    note_id: String,
    pagerank_score: f32
});

impl ImportanceScore {
    /// Upsert a batch of scores from one PageRank run.
    pub async fn upsert_scores(
        user_id: &str,
        scores: &[(String, f32)],
        db: &SurrealDbClient,
    ) -> Result<usize, AppError> {
        for (note_id, score) in scores {
            db.client
                .query(
                    "IF (SELECT VALUE id FROM nexus_importance_score WHERE user_id = $user_id \
                         AND note_id = $note_id)[0] != NONE THEN \
                       (UPDATE nexus_importance_score SET pagerank_score = $score, \
                        updated_at = time::now() \
                        WHERE user_id = $user_id AND note_id = $note_id) \
                     ELSE \
                       (CREATE nexus_importance_score CONTENT { user_id: $user_id, \
                          note_id: $note_id, pagerank_score: $score, \
                          created_at: time::now(), updated_at: time::now() }) \
                     END",
                )
                .bind(("user_id", user_id.to_owned()))
                .bind(("note_id", note_id.clone()))
                .bind(("score", *score))
                .await?;
        }
        Ok(scores.len())
    }

    pub async fn all_for_user(user_id: &str, db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM nexus_importance_score WHERE user_id = $user_id \
                 ORDER BY pagerank_score DESC",
            )
            .bind(("user_id", user_id.to_owned()))
            .await?;
        Ok(response.take(0)?)
    }
}
