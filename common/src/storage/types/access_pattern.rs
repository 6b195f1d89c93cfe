use uuid::Uuid;

use super::semantic_edge::canonical_pair;
use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

// Co-retrieval counter per unordered note pair, bumped when citations are
// persisted for an answer.
stored_object!(AccessPattern, "nexus_access_pattern", {
    user_id: String,
    note_a: String,
    note_b: String,
    co_retrieval_count: u32
});

impl AccessPattern {
    pub async fn bump_pair(
        user_id: &str,
        a: &str,
        b: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        if a == b {
            return Ok(());
        }
        let (note_a, note_b) = canonical_pair(a, b);

        db.client
            .query(
                "IF (SELECT VALUE id FROM nexus_access_pattern WHERE user_id = $user_id AND \
                     note_a = $note_a AND note_b = $note_b)[0] != NONE THEN \
                   (UPDATE nexus_access_pattern SET co_retrieval_count += 1, \
                    updated_at = time::now() \
                    WHERE user_id = $user_id AND note_a = $note_a AND note_b = $note_b) \
                 ELSE \
                   (CREATE nexus_access_pattern CONTENT { user_id: $user_id, note_a: $note_a, \
                      note_b: $note_b, co_retrieval_count: 1, \
                      created_at: time::now(), updated_at: time::now() }) \
                 END",
            )
            .bind(("user_id", user_id.to_owned()))
            .bind(("note_a", note_a.to_owned()))
            .bind(("note_b", note_b.to_owned()))
            .await?;
        Ok(())
    }

    /// Every co-retrieved pair for the owner, in canonical order.
    pub async fn pairs_for_user(
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<std::collections::HashSet<(String, String)>, AppError> {
        let mut response = db
            .query("SELECT * FROM nexus_access_pattern WHERE user_id = $user_id")
            .bind(("user_id", user_id.to_owned()))
            .await?;
        let rows: Vec<Self> = response.take(0)?;
        Ok(rows
            .into_iter()
            .map(|row| (row.note_a, row.note_b))
            .collect())
    }

    pub async fn count_for_pair(
        user_id: &str,
        a: &str,
        b: &str,
        db: &SurrealDbClient,
    ) -> Result<u32, AppError> {
        let (note_a, note_b) = canonical_pair(a, b);
        let mut response = db
            .query(
                "SELECT VALUE co_retrieval_count FROM nexus_access_pattern \
                 WHERE user_id = $user_id AND note_a = $note_a AND note_b = $note_b LIMIT 1",
            )
            .bind(("user_id", user_id.to_owned()))
            .bind(("note_a", note_a.to_owned()))
            .bind(("note_b", note_b.to_owned()))
            .await?;
        let counts: Vec<u32> = response.take(0)?;
        Ok(counts.into_iter().next().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bump_pair_accumulates_regardless_of_order() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        AccessPattern::bump_pair("user1", "x", "y", &db)
            .await
            .expect("first bump");
        AccessPattern::bump_pair("user1", "y", "x", &db)
            .await
            .expect("second bump");

        let count = AccessPattern::count_for_pair("user1", "x", "y", &db)
            .await
            .expect("count");
        assert_eq!(count, 2);
    }
}
