use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// Structural classification of a chunk, inferred from its first line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Paragraph,
    Heading,
    List,
    Code,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Paragraph => "paragraph",
            ChunkKind::Heading => "heading",
            ChunkKind::List => "list",
            ChunkKind::Code => "code",
        }
    }
}

stored_object!(NoteChunk, "note_chunk", {
    note_id: String,
    user_id: String,
    content: String,
    chunk_index: u32,
    chunk_type: ChunkKind,
    char_start: u64,
    char_end: u64,
    embedding: Option<Vec<f32>>
});

impl NoteChunk {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        note_id: String,
        user_id: String,
        content: String,
        chunk_index: u32,
        chunk_type: ChunkKind,
        char_start: u64,
        char_end: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            note_id,
            user_id,
            content,
            chunk_index,
            chunk_type,
            char_start,
            char_end,
            embedding: None,
        }
    }

    /// Atomically replace all chunks of a note with a fresh set.
    ///
    /// Regeneration is idempotent: the delete and the inserts run inside a
    /// single transaction so readers never observe a partial chunk set.
    pub async fn replace_for_note(
        note_id: &str,
        chunks: Vec<NoteChunk>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let mut query = String::from(
            "BEGIN TRANSACTION;\nDELETE note_chunk WHERE note_id = $note_id;\n",
        );
        for index in 0..chunks.len() {
            query.push_str(&format!(
                "CREATE type::thing('note_chunk', $id_{index}) CONTENT $chunk_{index};\n"
            ));
        }
        query.push_str("COMMIT TRANSACTION;");

        let mut prepared = db.client.query(query).bind(("note_id", note_id.to_owned()));
        for (index, chunk) in chunks.into_iter().enumerate() {
            prepared = prepared
                .bind((format!("id_{index}"), chunk.id.clone()))
                .bind((format!("chunk_{index}"), chunk));
        }
        prepared.await?.check()?;

        Ok(())
    }

    pub async fn for_note(note_id: &str, db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query("SELECT * FROM note_chunk WHERE note_id = $note_id ORDER BY chunk_index ASC")
            .bind(("note_id", note_id.to_owned()))
            .await?;
        Ok(response.take(0)?)
    }
}
