use std::{pin::Pin, time::Duration};

use axum::{
    extract::State,
    response::{
        sse::{Event, KeepAlive, KeepAliveStream},
        Sse,
    },
    Extension, Json,
};
use futures::{stream, Stream, StreamExt};
use serde::Deserialize;
use tracing::error;

use common::{llm::ProviderKind, storage::types::user::User};
use nexus_pipeline::{NexusQueryOptions, NexusStreamEvent, QueryMode};

use crate::api_state::ApiState;

type EventStream = Pin<Box<dyn Stream<Item = Result<Event, axum::Error>> + Send>>;

#[derive(Deserialize)]
pub struct NexusQueryRequest {
    pub query: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default = "default_true")]
    pub auto_create_conversation: bool,
    #[serde(default = "default_mode")]
    pub mode: QueryMode,
    #[serde(default = "default_max_sources")]
    pub max_sources: usize,
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,
    #[serde(default = "default_true")]
    pub include_images: bool,
    #[serde(default = "default_provider")]
    pub provider: ProviderKind,
    #[serde(default)]
    pub model: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_mode() -> QueryMode {
    QueryMode::Auto
}

fn default_max_sources() -> usize {
    10
}

fn default_min_similarity() -> f32 {
    0.4
}

fn default_provider() -> ProviderKind {
    ProviderKind::Local
}

fn sse_with_keep_alive(stream: EventStream) -> Sse<KeepAliveStream<EventStream>> {
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn event_of(event: &NexusStreamEvent) -> Result<Event, axum::Error> {
    Event::default().json_data(event)
}

/// POST /nexus/query/stream — answer a NEXUS query as typed SSE events:
/// `token* citations connections? suggestions? metadata done`, with
/// `error` terminal anywhere.
pub async fn nexus_query_stream(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Json(body): Json<NexusQueryRequest>,
) -> Sse<KeepAliveStream<EventStream>> {
    let options = NexusQueryOptions {
        conversation_id: body.conversation_id,
        auto_create_conversation: body.auto_create_conversation,
        mode: body.mode,
        max_sources: body.max_sources,
        min_similarity: body.min_similarity,
        include_images: body.include_images,
        provider: body.provider,
        model: body.model,
    };

    match state
        .nexus
        .query_stream(body.query, user.id, options)
        .await
    {
        Ok(events) => sse_with_keep_alive(events.map(|event| event_of(&event)).boxed()),
        Err(err) => {
            error!(error = %err, "NEXUS query failed before streaming");
            let error_event = NexusStreamEvent::Error {
                content: err.user_message(),
                error_type: "request_failed".to_owned(),
            };
            let stream = stream::iter(vec![
                event_of(&error_event),
                event_of(&NexusStreamEvent::Done),
            ]);
            sse_with_keep_alive(stream.boxed())
        }
    }
}
