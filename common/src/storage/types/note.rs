use uuid::Uuid;

use crate::{
    error::AppError, storage::db::SurrealDbClient, stored_object, utils::wikilink::create_slug,
};

/// How a note came to exist. Generated notes keep a pointer to the
/// artifact (image or document) they were derived from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoteOrigin {
    Manual,
    ImageAnalysis,
    DocumentAnalysis,
}

impl NoteOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoteOrigin::Manual => "manual",
            NoteOrigin::ImageAnalysis => "image_analysis",
            NoteOrigin::DocumentAnalysis => "document_analysis",
        }
    }
}

stored_object!(Note, "note", {
    user_id: String,
    title: String,
    slug: String,
    content: String,
    html: Option<String>,
    #[serde(default)]
    tag_ids: Vec<String>,
    community_id: Option<i64>,
    source: NoteOrigin,
    artifact_id: Option<String>,
    embedding: Option<Vec<f32>>,
    is_trashed: bool,
    is_favorite: bool
});

impl Note {
    pub fn new(user_id: String, title: String, content: String, source: NoteOrigin) -> Self {
        let now = Utc::now();
        let slug = create_slug(&title);
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id,
            slug,
            title,
            content,
            html: None,
            tag_ids: Vec::new(),
            community_id: None,
            source,
            artifact_id: None,
            embedding: None,
            is_trashed: false,
            is_favorite: false,
        }
    }

    /// Resolve a slug that is unique for the owner, appending a numeric
    /// suffix on collision (`my-note`, `my-note-1`, `my-note-2`, ...).
    pub async fn unique_slug(
        user_id: &str,
        title: &str,
        db: &SurrealDbClient,
    ) -> Result<String, AppError> {
        let base = create_slug(title);

        let mut response = db
            .query("SELECT VALUE slug FROM note WHERE user_id = $user_id AND string::starts_with(slug, $base)")
            .bind(("user_id", user_id.to_owned()))
            .bind(("base", base.clone()))
            .await?;
        let taken: Vec<String> = response.take(0)?;

        if !taken.iter().any(|slug| slug == &base) {
            return Ok(base);
        }

        let mut suffix = 1_u32;
        loop {
            let candidate = format!("{base}-{suffix}");
            if !taken.iter().any(|slug| slug == &candidate) {
                return Ok(candidate);
            }
            suffix = suffix.saturating_add(1);
        }
    }

    /// All live (non-trashed) notes for an owner, newest first.
    pub async fn live_for_user(user_id: &str, db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM note WHERE user_id = $user_id AND is_trashed = false \
                 ORDER BY updated_at DESC",
            )
            .bind(("user_id", user_id.to_owned()))
            .await?;
        Ok(response.take(0)?)
    }

    /// The most recently updated live notes that carry an embedding,
    /// capped for the diffusion ranker's working set.
    pub async fn recent_embedded(
        user_id: &str,
        limit: usize,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM note WHERE user_id = $user_id AND is_trashed = false \
                 AND embedding != NONE ORDER BY updated_at DESC LIMIT $limit",
            )
            .bind(("user_id", user_id.to_owned()))
            .bind(("limit", limit as i64))
            .await?;
        Ok(response.take(0)?)
    }

    /// Find a live note by exact title, used for wikilink resolution.
    pub async fn find_by_title(
        user_id: &str,
        title: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM note WHERE user_id = $user_id AND is_trashed = false \
                 AND title = $title LIMIT 1",
            )
            .bind(("user_id", user_id.to_owned()))
            .bind(("title", title.to_owned()))
            .await?;
        let notes: Vec<Self> = response.take(0)?;
        Ok(notes.into_iter().next())
    }

    pub async fn set_embedding(
        id: &str,
        embedding: Vec<f32>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing('note', $id) SET embedding = $embedding, \
                 updated_at = time::now()",
            )
            .bind(("id", id.to_owned()))
            .bind(("embedding", embedding))
            .await?;
        Ok(())
    }

    pub async fn set_community(
        id: &str,
        community_id: i64,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query("UPDATE type::thing('note', $id) SET community_id = $community_id")
            .bind(("id", id.to_owned()))
            .bind(("community_id", community_id))
            .await?;
        Ok(())
    }
}
