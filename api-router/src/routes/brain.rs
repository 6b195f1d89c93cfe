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

use brain_pipeline::{BrainChatOptions, BrainStreamEvent};
use common::{llm::ProviderKind, storage::types::user::User};

use crate::api_state::ApiState;

type EventStream = Pin<Box<dyn Stream<Item = Result<Event, axum::Error>> + Send>>;

#[derive(Deserialize)]
pub struct BrainChatRequest {
    pub query: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub pinned_topics: Vec<String>,
    #[serde(default = "default_provider")]
    pub provider: ProviderKind,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub token_budget: Option<usize>,
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

fn event_of(event: &BrainStreamEvent) -> Result<Event, axum::Error> {
    Event::default().json_data(event)
}

/// POST /brain/chat/stream — two-tier brain chat as typed SSE events.
pub async fn brain_chat_stream(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Json(body): Json<BrainChatRequest>,
) -> Sse<KeepAliveStream<EventStream>> {
    let options = BrainChatOptions {
        conversation_id: body.conversation_id,
        pinned_topics: body.pinned_topics,
        provider: body.provider,
        model: body.model,
        token_budget: body.token_budget,
    };

    match state.brain.chat_stream(body.query, user.id, options).await {
        Ok(events) => sse_with_keep_alive(events.map(|event| event_of(&event)).boxed()),
        Err(err) => {
            error!(error = %err, "Brain chat failed before streaming");
            let error_event = BrainStreamEvent::Error {
                content: err.user_message(),
                error_type: "request_failed".to_owned(),
            };
            let stream = stream::iter(vec![
                event_of(&error_event),
                event_of(&BrainStreamEvent::Done),
            ]);
            sse_with_keep_alive(stream.boxed())
        }
    }
}
