use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            community::CommunityMetadata,
            navigation_cache::{CacheKind, NavigationCache},
            tag::Tag,
        },
    },
};
use tracing::info;

use crate::StepOutcome;

const MAX_TAGS: usize = 50;

/// `[id] label (count): top terms`, one community per line.
pub fn render_community_map(communities: &[CommunityMetadata]) -> String {
    if communities.is_empty() {
        return "No communities detected yet. Run consolidation after linking some notes."
            .to_owned();
    }

    communities
        .iter()
        .map(|community| {
            let label = community
                .label
                .clone()
                .unwrap_or_else(|| format!("Cluster {}", community.community_id));
            format!(
                "[{}] {label} ({} notes): {}",
                community.community_id,
                community.node_count,
                community.top_terms.join(", ")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// `#tag (count), ...`, most used first.
pub fn render_tag_overview(tag_counts: &[(String, usize)]) -> String {
    if tag_counts.is_empty() {
        return "No tags found.".to_owned();
    }

    tag_counts
        .iter()
        .take(MAX_TAGS)
        .map(|(name, count)| format!("#{name} ({count})"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Consolidation step 5: serialize the navigation blobs and bump their
/// versions.
pub async fn rebuild_navigation_cache(
    db: &SurrealDbClient,
    user_id: &str,
) -> Result<StepOutcome, AppError> {
    let communities = CommunityMetadata::all_for_user(user_id, db).await?;
    let community_map = render_community_map(&communities);

    let tag_counts = Tag::note_counts(user_id, db).await?;
    let tag_overview = render_tag_overview(&tag_counts);

    NavigationCache::upsert(user_id, CacheKind::CommunityMap, community_map.clone(), db).await?;
    NavigationCache::upsert(user_id, CacheKind::TagOverview, tag_overview.clone(), db).await?;

    info!(
        community_map_chars = community_map.len(),
        tag_overview_chars = tag_overview.len(),
        "Navigation cache rebuilt"
    );

    Ok(StepOutcome::success(format!(
        "map {} chars, tags {} chars",
        community_map.len(),
        tag_overview.len()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_community_map_format() {
        let mut infra = CommunityMetadata::new(
            "user1".into(),
            1,
            2,
            vec!["docker".into(), "networking".into()],
        );
        infra.label = Some("Infrastructure".into());
        let unlabeled = CommunityMetadata::new("user1".into(), 2, 1, vec!["misc".into()]);

        let map = render_community_map(&[infra, unlabeled]);
        assert!(map.contains("[1] Infrastructure (2 notes): docker, networking"));
        assert!(map.contains("[2] Cluster 2 (1 notes): misc"));
    }

    #[test]
    fn test_render_tag_overview_format() {
        let overview = render_tag_overview(&[
            ("docker".to_owned(), 2),
            ("cooking".to_owned(), 1),
        ]);
        assert_eq!(overview, "#docker (2), #cooking (1)");
    }

    #[test]
    fn test_empty_inputs_render_placeholders() {
        assert!(render_community_map(&[]).contains("No communities"));
        assert_eq!(render_tag_overview(&[]), "No tags found.");
    }

    #[tokio::test]
    async fn test_rebuild_bumps_versions() {
        let db = SurrealDbClient::memory("test_ns", &uuid::Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");

        rebuild_navigation_cache(&db, "user1")
            .await
            .expect("first rebuild");
        rebuild_navigation_cache(&db, "user1")
            .await
            .expect("second rebuild");

        let mut response = db
            .query("SELECT * FROM nexus_navigation_cache WHERE user_id = 'user1'")
            .await
            .expect("query");
        let caches: Vec<NavigationCache> = response.take(0).expect("take");
        assert_eq!(caches.len(), 2);
        for cache in caches {
            assert_eq!(cache.version, 2);
        }
    }
}
