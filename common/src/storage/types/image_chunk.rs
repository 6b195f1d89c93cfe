use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

// Chunks of an image's AI analysis text, kept for RAG retrieval.
stored_object!(ImageChunk, "image_chunk", {
    image_id: String,
    user_id: String,
    content: String,
    chunk_index: u32,
    embedding: Option<Vec<f32>>
});

impl ImageChunk {
    pub fn new(image_id: String, user_id: String, content: String, chunk_index: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            image_id,
            user_id,
            content,
            chunk_index,
            embedding: None,
        }
    }

    pub async fn replace_for_image(
        image_id: &str,
        chunks: Vec<ImageChunk>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let mut query =
            String::from("BEGIN TRANSACTION;\nDELETE image_chunk WHERE image_id = $image_id;\n");
        for index in 0..chunks.len() {
            query.push_str(&format!(
                "CREATE type::thing('image_chunk', $id_{index}) CONTENT $chunk_{index};\n"
            ));
        }
        query.push_str("COMMIT TRANSACTION;");

        let mut prepared = db
            .client
            .query(query)
            .bind(("image_id", image_id.to_owned()));
        for (index, chunk) in chunks.into_iter().enumerate() {
            prepared = prepared
                .bind((format!("id_{index}"), chunk.id.clone()))
                .bind((format!("chunk_{index}"), chunk));
        }
        prepared.await?.check()?;

        Ok(())
    }
}
