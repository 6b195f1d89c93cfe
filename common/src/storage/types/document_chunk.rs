use uuid::Uuid;

use super::note_chunk::ChunkKind;
use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(DocumentChunk, "document_chunk", {
    document_id: String,
    user_id: String,
    content: String,
    chunk_index: u32,
    chunk_type: ChunkKind,
    page_number: u32,
    char_start: u64,
    char_end: u64,
    embedding: Option<Vec<f32>>
});

impl DocumentChunk {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        document_id: String,
        user_id: String,
        content: String,
        chunk_index: u32,
        chunk_type: ChunkKind,
        page_number: u32,
        char_start: u64,
        char_end: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            document_id,
            user_id,
            content,
            chunk_index,
            chunk_type,
            page_number,
            char_start,
            char_end,
            embedding: None,
        }
    }

    /// Replace all chunks for a document in one transaction.
    pub async fn replace_for_document(
        document_id: &str,
        chunks: Vec<DocumentChunk>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let mut query = String::from(
            "BEGIN TRANSACTION;\nDELETE document_chunk WHERE document_id = $document_id;\n",
        );
        for index in 0..chunks.len() {
            query.push_str(&format!(
                "CREATE type::thing('document_chunk', $id_{index}) CONTENT $chunk_{index};\n"
            ));
        }
        query.push_str("COMMIT TRANSACTION;");

        let mut prepared = db
            .client
            .query(query)
            .bind(("document_id", document_id.to_owned()));
        for (index, chunk) in chunks.into_iter().enumerate() {
            prepared = prepared
                .bind((format!("id_{index}"), chunk.id.clone()))
                .bind((format!("chunk_{index}"), chunk));
        }
        prepared.await?.check()?;

        Ok(())
    }

    pub async fn for_document(
        document_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM document_chunk WHERE document_id = $document_id \
                 ORDER BY chunk_index ASC",
            )
            .bind(("document_id", document_id.to_owned()))
            .await?;
        Ok(response.take(0)?)
    }

    pub async fn set_embedding(
        id: &str,
        embedding: Vec<f32>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query("UPDATE type::thing('document_chunk', $id) SET embedding = $embedding")
            .bind(("id", id.to_owned()))
            .bind(("embedding", embedding))
            .await?;
        Ok(())
    }
}
