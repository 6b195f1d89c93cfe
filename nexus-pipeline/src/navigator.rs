use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use common::{
    error::AppError,
    llm::{GenerationRequest, LlmMessage, LlmProvider},
    storage::{db::SurrealDbClient, types::note::Note},
};

use crate::{RetrievalResult, SourceType};

/// How the navigator asks for candidates: a strict JSON array of note ids
/// chosen purely from the cached high-level maps.
fn navigation_prompt(query: &str, community_map: &str, tag_overview: &str) -> String {
    format!(
        "You navigate a personal knowledge graph using its high-level map.\n\
         \n\
         COMMUNITY MAP:\n{community_map}\n\
         \n\
         TAG OVERVIEW:\n{tag_overview}\n\
         \n\
         QUESTION: {query}\n\
         \n\
         From the map above, list the ids of notes most relevant to the \
         question. Respond with ONLY a JSON array of note id strings, most \
         relevant first, at most 10 entries. Respond with [] if nothing fits."
    )
}

/// Pull note ids out of whatever the model returned. Anything that is not
/// a JSON array of strings yields an empty list.
fn parse_note_ids(response: &str) -> Vec<String> {
    let start = response.find('[');
    let end = response.rfind(']');
    let (Some(start), Some(end)) = (start, end) else {
        return Vec::new();
    };
    if end <= start {
        return Vec::new();
    }

    let Ok(parsed) = serde_json::from_str::<Value>(&response[start..=end]) else {
        return Vec::new();
    };
    let Some(items) = parsed.as_array() else {
        return Vec::new();
    };

    let mut ids = Vec::new();
    for item in items {
        match item {
            Value::String(id) if !id.is_empty() => ids.push(id.clone()),
            Value::Number(id) => ids.push(id.to_string()),
            _ => {}
        }
        if ids.len() >= 10 {
            break;
        }
    }
    ids
}

/// Select candidate notes by high-level map navigation.
///
/// Reads nothing but the caches it is given and the notes it hydrates;
/// never mutates state. Any failure, including malformed model output,
/// produces an empty candidate list and the fuser redistributes the
/// navigator's weight.
pub async fn navigate(
    db: &SurrealDbClient,
    provider: &Arc<dyn LlmProvider>,
    model: &str,
    temperature: f32,
    query: &str,
    user_id: &str,
    community_map: &str,
    tag_overview: &str,
) -> Vec<RetrievalResult> {
    let prompt = navigation_prompt(query, community_map, tag_overview);
    let request = GenerationRequest {
        messages: vec![LlmMessage::user(prompt)],
        model: model.to_owned(),
        temperature,
        max_tokens: 512,
        context_window: None,
    };

    let response = match provider.generate(request).await {
        Ok(response) => response,
        Err(err) => {
            warn!(error = %err, "Graph navigation LLM call failed");
            return Vec::new();
        }
    };

    let note_ids = parse_note_ids(&response.content);
    if note_ids.is_empty() {
        debug!("Graph navigator returned no usable note ids");
        return Vec::new();
    }

    match hydrate_notes(db, user_id, &note_ids).await {
        Ok(results) => results,
        Err(err) => {
            warn!(error = %err, "Graph navigation hydration failed");
            Vec::new()
        }
    }
}

/// Load the navigator's picks, keeping only live notes the caller owns,
/// in the order the model ranked them.
async fn hydrate_notes(
    db: &SurrealDbClient,
    user_id: &str,
    note_ids: &[String],
) -> Result<Vec<RetrievalResult>, AppError> {
    let things: Vec<surrealdb::sql::Thing> = note_ids
        .iter()
        .map(|id| surrealdb::sql::Thing::from(("note", id.as_str())))
        .collect();

    let mut response = db
        .query(
            "SELECT * FROM note WHERE id IN $things AND user_id = $user_id \
             AND is_trashed = false",
        )
        .bind(("things", things))
        .bind(("user_id", user_id.to_owned()))
        .await?;
    let notes: Vec<Note> = response.take(0)?;

    let mut by_id: std::collections::HashMap<String, Note> =
        notes.into_iter().map(|note| (note.id.clone(), note)).collect();

    let total = note_ids.len().max(1) as f32;
    let mut results = Vec::new();
    for (position, note_id) in note_ids.iter().enumerate() {
        if let Some(note) = by_id.remove(note_id) {
            results.push(RetrievalResult {
                source_type: SourceType::Note,
                source_id: note.id.clone(),
                note_id: Some(note.id),
                title: note.title,
                content: note.content,
                similarity: (total - position as f32) / total,
                retrieval_method: "graph_nav".to_owned(),
            });
        }
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::llm::{
        breaker::BreakerStatus, GenerationRequest, LlmResponse, LlmStreamChunk, LlmTokenStream,
        ModelInfo, ProviderHealth, ProviderKind,
    };

    /// Canned-response provider for exercising the navigator offline.
    struct ScriptedProvider {
        reply: String,
    }

    #[async_trait::async_trait]
    impl LlmProvider for ScriptedProvider {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Local
        }

        async fn generate(&self, _request: GenerationRequest) -> Result<LlmResponse, AppError> {
            Ok(LlmResponse {
                content: self.reply.clone(),
                model: "scripted".into(),
                provider: ProviderKind::Local,
                input_tokens: 0,
                output_tokens: 0,
            })
        }

        async fn stream(&self, _request: GenerationRequest) -> Result<LlmTokenStream, AppError> {
            let chunk = LlmStreamChunk::token(self.reply.clone());
            Ok(Box::pin(futures::stream::iter(vec![
                chunk,
                LlmStreamChunk::finished(None, None),
            ])))
        }

        async fn health_check(&self) -> ProviderHealth {
            ProviderHealth {
                provider: ProviderKind::Local,
                connected: true,
                healthy: true,
                error: None,
                available_models: Vec::new(),
                breaker: BreakerStatus {
                    state: common::llm::breaker::CircuitState::Closed,
                    consecutive_failures: 0,
                    failure_threshold: 3,
                    recovery_timeout_secs: 30,
                },
            }
        }

        async fn list_models(&self) -> Result<Vec<ModelInfo>, AppError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_navigate_returns_hydrated_notes_from_model_picks() {
        use common::storage::types::note::{Note, NoteOrigin};

        let db = SurrealDbClient::memory("test_ns", &uuid::Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");

        let docker = Note::new(
            "user1".into(),
            "Docker networking".into(),
            "bridge".into(),
            NoteOrigin::Manual,
        );
        db.store_item(docker.clone()).await.expect("store");

        let provider: Arc<dyn LlmProvider> = Arc::new(ScriptedProvider {
            reply: format!("Relevant notes: [\"{}\"]", docker.id),
        });

        let results = navigate(
            &db,
            &provider,
            "scripted",
            0.7,
            "how is my docker knowledge organized?",
            "user1",
            "[1] Infrastructure (2 notes): docker, networking",
            "#docker (2), #cooking (1)",
        )
        .await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source_id, docker.id);
        assert_eq!(results[0].retrieval_method, "graph_nav");
    }

    #[tokio::test]
    async fn test_navigate_survives_malformed_model_output() {
        let db = SurrealDbClient::memory("test_ns", &uuid::Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");

        let provider: Arc<dyn LlmProvider> = Arc::new(ScriptedProvider {
            reply: "I could not decide on any notes, sorry!".into(),
        });

        let results = navigate(&db, &provider, "scripted", 0.7, "q", "user1", "map", "tags").await;
        assert!(results.is_empty());
    }

    #[test]
    fn test_parse_note_ids_accepts_plain_array() {
        let ids = parse_note_ids(r#"["a", "b", "c"]"#);
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_parse_note_ids_accepts_prose_wrapped_array() {
        let ids = parse_note_ids("Here are my picks: [\"x\", \"y\"] based on the map.");
        assert_eq!(ids, vec!["x", "y"]);
    }

    #[test]
    fn test_parse_note_ids_rejects_garbage() {
        assert!(parse_note_ids("no array here").is_empty());
        assert!(parse_note_ids("{\"ids\": 3}").is_empty());
        assert!(parse_note_ids("[{\"nested\": true}]").is_empty());
        assert!(parse_note_ids("]oops[").is_empty());
    }

    #[test]
    fn test_parse_note_ids_caps_at_ten() {
        let payload = format!(
            "[{}]",
            (0..20)
                .map(|i| format!("\"note{i}\""))
                .collect::<Vec<_>>()
                .join(",")
        );
        assert_eq!(parse_note_ids(&payload).len(), 10);
    }

    #[tokio::test]
    async fn test_hydrate_filters_trashed_and_foreign_notes() {
        use common::storage::types::note::{Note, NoteOrigin};

        let db = SurrealDbClient::memory("test_ns", &uuid::Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");

        let mine = Note::new(
            "user1".into(),
            "Mine".into(),
            "content".into(),
            NoteOrigin::Manual,
        );
        let mut trashed = Note::new(
            "user1".into(),
            "Trashed".into(),
            "content".into(),
            NoteOrigin::Manual,
        );
        trashed.is_trashed = true;
        let foreign = Note::new(
            "user2".into(),
            "Foreign".into(),
            "content".into(),
            NoteOrigin::Manual,
        );

        db.store_item(mine.clone()).await.expect("store");
        db.store_item(trashed.clone()).await.expect("store");
        db.store_item(foreign.clone()).await.expect("store");

        let results = hydrate_notes(
            &db,
            "user1",
            &[mine.id.clone(), trashed.id, foreign.id, "missing".into()],
        )
        .await
        .expect("hydrate");

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source_id, mine.id);
        assert_eq!(results[0].retrieval_method, "graph_nav");
        assert!(results[0].similarity > 0.9);
    }
}
