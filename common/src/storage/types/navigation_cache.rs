use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CacheKind {
    CommunityMap,
    TagOverview,
}

// Compact per-owner text blob consumed by the graph navigator.
stored_object!(NavigationCache, "nexus_navigation_cache", {
    user_id: String,
    cache_type: CacheKind,
    content: String,
    version: u32
});

impl NavigationCache {
    /// The cached community map and tag overview, either may be absent.
    pub async fn get_for_user(
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(Option<String>, Option<String>), AppError> {
        let mut response = db
            .query("SELECT * FROM nexus_navigation_cache WHERE user_id = $user_id")
            .bind(("user_id", user_id.to_owned()))
            .await?;
        let caches: Vec<Self> = response.take(0)?;

        let mut community_map = None;
        let mut tag_overview = None;
        for cache in caches {
            match cache.cache_type {
                CacheKind::CommunityMap => community_map = Some(cache.content),
                CacheKind::TagOverview => tag_overview = Some(cache.content),
            }
        }
        Ok((community_map, tag_overview))
    }

    /// Upsert one cache blob, bumping its monotonic version.
    pub async fn upsert(
        user_id: &str,
        cache_type: CacheKind,
        content: String,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "IF (SELECT VALUE id FROM nexus_navigation_cache WHERE user_id = $user_id AND \
                     cache_type = $cache_type)[0] != NONE THEN \
                   (UPDATE nexus_navigation_cache SET content = $content, version += 1, \
                    updated_at = time::now() \
                    WHERE user_id = $user_id AND cache_type = $cache_type) \
                 ELSE \
                   (CREATE nexus_navigation_cache CONTENT { user_id: $user_id, \
                      cache_type: $cache_type, content: $content, version: 1, \
                      created_at: time::now(), updated_at: time::now() }) \
                 END",
            )
            .bind(("user_id", user_id.to_owned()))
            .bind(("cache_type", cache_type))
            .bind(("content", content))
            .await?
            .check()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_bumps_version() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        NavigationCache::upsert("user1", CacheKind::CommunityMap, "v1".into(), &db)
            .await
            .expect("first upsert");
        NavigationCache::upsert("user1", CacheKind::CommunityMap, "v2".into(), &db)
            .await
            .expect("second upsert");

        let mut response = db
            .query("SELECT * FROM nexus_navigation_cache WHERE user_id = 'user1'")
            .await
            .expect("query caches");
        let caches: Vec<NavigationCache> = response.take(0).expect("take caches");
        assert_eq!(caches.len(), 1);
        assert_eq!(caches[0].version, 2);
        assert_eq!(caches[0].content, "v2");
    }

    #[tokio::test]
    async fn test_get_for_user_splits_by_kind() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        NavigationCache::upsert("user1", CacheKind::CommunityMap, "map".into(), &db)
            .await
            .expect("map upsert");
        NavigationCache::upsert("user1", CacheKind::TagOverview, "tags".into(), &db)
            .await
            .expect("tags upsert");

        let (map, tags) = NavigationCache::get_for_user("user1", &db)
            .await
            .expect("fetch caches");
        assert_eq!(map.as_deref(), Some("map"));
        assert_eq!(tags.as_deref(), Some("tags"));

        let (none_map, none_tags) = NavigationCache::get_for_user("user2", &db)
            .await
            .expect("fetch for other user");
        assert!(none_map.is_none() && none_tags.is_none());
    }
}
