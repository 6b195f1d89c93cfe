use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

// Undirected similarity edge. Stored once with source < target so the
// unique pair index doubles as the dedup rule.
stored_object!(SemanticEdge, "semantic_edge", {
    user_id: String,
    source_note_id: String,
    target_note_id: String,
    similarity: f32
});

/// Canonical ordering for an undirected pair.
pub fn canonical_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl SemanticEdge {
    pub fn new(user_id: String, a: &str, b: &str, similarity: f32) -> Self {
        let (source, target) = canonical_pair(a, b);
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id,
            source_note_id: source.to_owned(),
            target_note_id: target.to_owned(),
            similarity,
        }
    }

    pub async fn upsert(
        user_id: &str,
        a: &str,
        b: &str,
        similarity: f32,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let (source, target) = canonical_pair(a, b);
        db.client
            .query(
                "IF (SELECT VALUE id FROM semantic_edge WHERE user_id = $user_id AND \
                     source_note_id = $source AND target_note_id = $target)[0] != NONE THEN \
                   (UPDATE semantic_edge SET similarity = $similarity, updated_at = time::now() \
                    WHERE user_id = $user_id AND source_note_id = $source AND target_note_id = $target) \
                 ELSE \
                   (CREATE semantic_edge CONTENT { \
                      user_id: $user_id, source_note_id: $source, target_note_id: $target, \
                      similarity: $similarity, created_at: time::now(), updated_at: time::now() }) \
                 END",
            )
            .bind(("user_id", user_id.to_owned()))
            .bind(("source", source.to_owned()))
            .bind(("target", target.to_owned()))
            .bind(("similarity", similarity))
            .await?
            .check()?;
        Ok(())
    }

    pub async fn all_for_user(user_id: &str, db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query("SELECT * FROM semantic_edge WHERE user_id = $user_id")
            .bind(("user_id", user_id.to_owned()))
            .await?;
        Ok(response.take(0)?)
    }

    pub async fn above_threshold(
        user_id: &str,
        threshold: f32,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM semantic_edge WHERE user_id = $user_id AND \
                 similarity >= $threshold ORDER BY similarity DESC",
            )
            .bind(("user_id", user_id.to_owned()))
            .bind(("threshold", threshold))
            .await?;
        Ok(response.take(0)?)
    }

    /// Remove edges whose similarity has dropped below the threshold.
    pub async fn delete_below(
        user_id: &str,
        threshold: f32,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "DELETE semantic_edge WHERE user_id = $user_id AND similarity < $threshold",
            )
            .bind(("user_id", user_id.to_owned()))
            .bind(("threshold", threshold))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_pair_orders_lexicographically() {
        assert_eq!(canonical_pair("b", "a"), ("a", "b"));
        assert_eq!(canonical_pair("a", "b"), ("a", "b"));
    }

    #[tokio::test]
    async fn test_upsert_updates_in_place() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        SemanticEdge::upsert("user1", "b", "a", 0.72, &db)
            .await
            .expect("insert edge");
        SemanticEdge::upsert("user1", "a", "b", 0.81, &db)
            .await
            .expect("update edge");

        let edges = SemanticEdge::all_for_user("user1", &db)
            .await
            .expect("fetch edges");
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].source_note_id, "a");
        assert_eq!(edges[0].target_note_id, "b");
        assert!((edges[0].similarity - 0.81).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_delete_below_prunes_weak_edges() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        SemanticEdge::upsert("user1", "a", "b", 0.9, &db)
            .await
            .expect("strong edge");
        SemanticEdge::upsert("user1", "a", "c", 0.5, &db)
            .await
            .expect("weak edge");

        SemanticEdge::delete_below("user1", 0.7, &db)
            .await
            .expect("prune");

        let edges = SemanticEdge::all_for_user("user1", &db)
            .await
            .expect("fetch edges");
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].target_note_id, "b");
    }
}
