use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// A resolved outgoing wikilink attached to a citation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WikilinkRef {
    pub note_id: String,
    pub title: String,
}

/// A short path from this citation to another cited source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CitationPath {
    pub target_index: u32,
    pub hop_count: u32,
    pub via_titles: Vec<String>,
}

stored_object!(NexusCitation, "nexus_citation", {
    user_id: String,
    message_id: String,
    citation_index: u32,
    source_type: String,
    source_id: String,
    title: String,
    relevance_score: f32,
    retrieval_method: String,
    origin_type: Option<String>,
    artifact_id: Option<String>,
    community_id: Option<i64>,
    community_name: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    direct_wikilinks: Vec<WikilinkRef>,
    #[serde(default)]
    path_to_other_results: Vec<CitationPath>,
    note_url: Option<String>,
    graph_url: Option<String>,
    artifact_url: Option<String>
});

impl NexusCitation {
    /// Persist the citations of one assistant message in a single transaction.
    pub async fn save_all(
        citations: Vec<NexusCitation>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        if citations.is_empty() {
            return Ok(());
        }

        let mut query = String::from("BEGIN TRANSACTION;\n");
        for index in 0..citations.len() {
            query.push_str(&format!(
                "CREATE type::thing('nexus_citation', $id_{index}) CONTENT $citation_{index};\n"
            ));
        }
        query.push_str("COMMIT TRANSACTION;");

        let mut prepared = db.client.query(query);
        for (index, citation) in citations.into_iter().enumerate() {
            prepared = prepared
                .bind((format!("id_{index}"), citation.id.clone()))
                .bind((format!("citation_{index}"), citation));
        }
        prepared.await?.check()?;
        Ok(())
    }

    pub async fn for_message(
        message_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM nexus_citation WHERE message_id = $message_id \
                 ORDER BY citation_index ASC",
            )
            .bind(("message_id", message_id.to_owned()))
            .await?;
        Ok(response.take(0)?)
    }
}
