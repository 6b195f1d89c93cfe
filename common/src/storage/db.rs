use crate::error::AppError;

use super::types::StoredObject;
use std::{ops::Deref, sync::Arc};
use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Surreal,
};

#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

pub trait ProvidesDb {
    fn db(&self) -> &Arc<SurrealDbClient>;
}

impl SurrealDbClient {
    /// Connect, sign in and select the configured namespace/database.
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        // Sign in to database
        db.signin(Root { username, password }).await?;

        // Set namespace
        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    /// Define analyzers, search/vector indexes and uniqueness constraints.
    ///
    /// Idempotent: every statement uses `IF NOT EXISTS` or `OVERWRITE` so the
    /// call is safe on every startup. `embedding_dimensions` follows the
    /// configured embedding model.
    pub async fn ensure_initialized(&self, embedding_dimensions: usize) -> Result<(), AppError> {
        self.client
            .query(
                "DEFINE ANALYZER IF NOT EXISTS app_text TOKENIZERS blank,class \
                 FILTERS lowercase, snowball(english);",
            )
            .await?;

        // Fulltext search indexes
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_note_title_search ON note FIELDS title SEARCH ANALYZER app_text BM25 HIGHLIGHTS")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_note_content_search ON note FIELDS content SEARCH ANALYZER app_text BM25 HIGHLIGHTS")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_note_chunk_search ON note_chunk FIELDS content SEARCH ANALYZER app_text BM25")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_document_chunk_search ON document_chunk FIELDS content SEARCH ANALYZER app_text BM25")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_image_analysis_search ON image FIELDS ai_analysis_result SEARCH ANALYZER app_text BM25")
            .await?;

        // Vector indexes, overwritten so dimension changes take effect
        for table in ["note", "note_chunk", "document_chunk", "image", "brain_file"] {
            self.client
                .query(format!(
                    "DEFINE INDEX OVERWRITE idx_embedding_{table} ON {table} \
                     FIELDS embedding HNSW DIMENSION {embedding_dimensions}"
                ))
                .await?;
        }

        // Uniqueness constraints
        self.client
            .query("DEFINE INDEX IF NOT EXISTS unique_user_email ON user FIELDS email UNIQUE")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS unique_note_slug ON note FIELDS user_id, slug UNIQUE")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS unique_note_link_pair ON note_link FIELDS source_note_id, target_note_id UNIQUE")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS unique_semantic_edge_pair ON semantic_edge FIELDS source_note_id, target_note_id UNIQUE")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS unique_link_suggestion ON nexus_link_suggestion FIELDS user_id, source_note_id, target_note_id UNIQUE")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS unique_brain_file_key ON brain_file FIELDS user_id, file_key UNIQUE")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS unique_navigation_cache ON nexus_navigation_cache FIELDS user_id, cache_type UNIQUE")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS unique_importance_score ON nexus_importance_score FIELDS user_id, note_id UNIQUE")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS unique_tag_name ON tag FIELDS user_id, name UNIQUE")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS unique_access_pattern ON nexus_access_pattern FIELDS user_id, note_a, note_b UNIQUE")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS unique_note_chunk_index ON note_chunk FIELDS note_id, chunk_index UNIQUE")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS unique_document_chunk_index ON document_chunk FIELDS document_id, chunk_index UNIQUE")
            .await?;

        // Task queue indexes
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_task_status ON background_task FIELDS status")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_task_user ON background_task FIELDS user_id")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_task_created ON background_task FIELDS created_at")
            .await?;

        Ok(())
    }

    pub async fn rebuild_search_indexes(&self) -> Result<(), Error> {
        for (index, table) in [
            ("idx_note_title_search", "note"),
            ("idx_note_content_search", "note"),
            ("idx_note_chunk_search", "note_chunk"),
            ("idx_document_chunk_search", "document_chunk"),
            ("idx_image_analysis_search", "image"),
        ] {
            self.client
                .query(format!("REBUILD INDEX IF EXISTS {index} ON {table}"))
                .await?;
        }
        Ok(())
    }

    pub async fn drop_table<T>(&self) -> Result<Vec<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client.delete(T::table_name()).await
    }

    /// Operation to store a object in SurrealDB, requires the struct to implement StoredObject
    ///
    /// # Arguments
    /// * `item` - The item to be stored
    ///
    /// # Returns
    /// * `Result` - Item or Error
    pub async fn store_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .create((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    /// Operation to retrieve all objects from a certain table, requires the struct to implement StoredObject
    ///
    /// # Returns
    /// * `Result` - Vec<T> or Error
    pub async fn get_all_stored_items<T>(&self) -> Result<Vec<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select(T::table_name()).await
    }

    /// Operation to retrieve a single object by its ID, requires the struct to implement StoredObject
    ///
    /// # Arguments
    /// * `id` - The ID of the item to retrieve
    ///
    /// # Returns
    /// * `Result<Option<T>, Error>` - The found item or Error
    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select((T::table_name(), id)).await
    }

    /// Operation to delete a single object by its ID, requires the struct to implement StoredObject
    ///
    /// # Arguments
    /// * `id` - The ID of the item to delete
    ///
    /// # Returns
    /// * `Result<Option<T>, Error>` - The deleted item or Error
    pub async fn delete_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.delete((T::table_name(), id)).await
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Create an in-memory SurrealDB client for testing.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }
}

#[cfg(test)]
mod tests {
    use crate::stored_object;

    use super::*;
    use uuid::Uuid;

    stored_object!(Dummy, "dummy", {
        name: String
    });

    #[tokio::test]
    async fn test_initialization_and_crud() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string(); // ensures isolation per test run
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        db.ensure_initialized(3)
            .await
            .expect("Failed to initialize schema");

        // Test basic CRUD
        let dummy = Dummy {
            id: "abc".to_string(),
            name: "first".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        // Store
        let stored = db.store_item(dummy.clone()).await.expect("Failed to store");
        assert!(stored.is_some());

        // Read
        let fetched = db
            .get_item::<Dummy>(&dummy.id)
            .await
            .expect("Failed to fetch");
        assert_eq!(fetched, Some(dummy.clone()));

        // Read all
        let all = db
            .get_all_stored_items::<Dummy>()
            .await
            .expect("Failed to fetch all");
        assert!(all.contains(&dummy));

        // Delete
        let deleted = db
            .delete_item::<Dummy>(&dummy.id)
            .await
            .expect("Failed to delete");
        assert_eq!(deleted, Some(dummy));

        // After delete, should not be present
        let fetch_post = db
            .get_item::<Dummy>("abc")
            .await
            .expect("Failed fetch post delete");
        assert!(fetch_post.is_none());
    }

    #[tokio::test]
    async fn test_ensure_initialized_is_idempotent() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        db.ensure_initialized(768)
            .await
            .expect("first initialization");
        db.ensure_initialized(768)
            .await
            .expect("second initialization");
    }

    #[tokio::test]
    async fn test_dimension_change_redefines_vector_indexes() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        db.ensure_initialized(1536).await.expect("initial schema");
        // A changed embedding dimension must not fail startup
        db.ensure_initialized(768).await.expect("re-dimensioned");
    }
}
