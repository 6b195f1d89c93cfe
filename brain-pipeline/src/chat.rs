use std::sync::Arc;

use async_stream::stream;
use futures::{Stream, StreamExt};
use serde::Serialize;
use tracing::{error, warn};

use common::{
    error::AppError,
    llm::{
        registry::ProviderRegistry, usage::log_usage, GenerationRequest, LlmMessage, ProviderKind,
    },
    storage::{
        db::SurrealDbClient,
        types::{
            background_task::{BackgroundTask, TaskPayload},
            brain_conversation::BrainConversation,
            brain_message::BrainMessage,
            chat_message::MessageRole,
        },
    },
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};

use crate::{
    context::assemble_context,
    selector::{select_topics, SelectionOptions},
    summarizer::SUMMARY_THRESHOLD,
};

/// Per-request knobs for brain chat.
#[derive(Debug, Clone)]
pub struct BrainChatOptions {
    pub conversation_id: Option<String>,
    pub pinned_topics: Vec<String>,
    pub provider: ProviderKind,
    pub model: Option<String>,
    pub token_budget: Option<usize>,
}

impl Default for BrainChatOptions {
    fn default() -> Self {
        Self {
            conversation_id: None,
            pinned_topics: Vec::new(),
            provider: ProviderKind::Local,
            model: None,
            token_budget: None,
        }
    }
}

/// Typed events of the brain chat stream; tokens first, then metadata,
/// then done, with errors terminal anywhere.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BrainStreamEvent {
    Token {
        content: String,
    },
    Metadata {
        brain_files_used: Vec<String>,
        topics_matched: Vec<String>,
        model_used: String,
        provider_used: String,
        used_local_fallback: bool,
        conversation_id: String,
        message_id: Option<String>,
    },
    Error {
        content: String,
        error_type: String,
    },
    Done,
}

/// The brain query pipeline: topic selection, two-tier context assembly,
/// streamed generation, persistence and follow-up task scheduling.
pub struct BrainPipeline {
    db: Arc<SurrealDbClient>,
    registry: Arc<ProviderRegistry>,
    embedder: Arc<EmbeddingProvider>,
    config: AppConfig,
}

impl BrainPipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        registry: Arc<ProviderRegistry>,
        embedder: Arc<EmbeddingProvider>,
        config: AppConfig,
    ) -> Self {
        Self {
            db,
            registry,
            embedder,
            config,
        }
    }

    /// Topics loaded in the previous assistant turn, for the persistence
    /// bonus.
    async fn previously_loaded(&self, conversation_id: &str) -> Result<Vec<String>, AppError> {
        let messages = BrainMessage::for_conversation(conversation_id, &self.db).await?;
        Ok(messages
            .into_iter()
            .rev()
            .find(|message| message.role == MessageRole::Assistant)
            .map(|message| message.topics_matched)
            .unwrap_or_default())
    }

    /// Recent history, tiered: rolling summary, older turns condensed,
    /// recent turns in full.
    async fn tiered_history(
        &self,
        conversation: &BrainConversation,
    ) -> Result<String, AppError> {
        let messages = BrainMessage::for_conversation(&conversation.id, &self.db).await?;
        let mut parts: Vec<String> = Vec::new();

        if let Some(summary) = &conversation.conversation_summary {
            if !summary.is_empty() {
                parts.push(format!("[Previous conversation summary]\n{summary}"));
            }
        }

        let total = messages.len();
        let recent_start = total.saturating_sub(5);
        let older_start = total.saturating_sub(15);

        if recent_start > older_start {
            let older_text = messages[older_start..recent_start]
                .iter()
                .map(|message| {
                    let content: String = message.content.chars().take(200).collect();
                    format!("{}: {content}...", message.role)
                })
                .collect::<Vec<_>>()
                .join("\n");
            if !older_text.is_empty() {
                parts.push(format!("[Earlier in this conversation]\n{older_text}"));
            }
        }

        if recent_start < total {
            let recent_text = messages[recent_start..]
                .iter()
                .map(|message| {
                    let content: String = message.content.chars().take(1000).collect();
                    format!("{}: {content}", message.role)
                })
                .collect::<Vec<_>>()
                .join("\n\n");
            parts.push(format!("[Recent messages]\n{recent_text}"));
        }

        Ok(parts.join("\n\n---\n\n"))
    }

    /// Answer a brain query as a typed event stream.
    #[allow(clippy::too_many_lines)]
    pub async fn chat_stream(
        &self,
        query: String,
        user_id: String,
        options: BrainChatOptions,
    ) -> Result<impl Stream<Item = BrainStreamEvent> + Send, AppError> {
        if query.trim().is_empty() {
            return Err(AppError::Validation("Query cannot be empty".into()));
        }

        let conversation = match &options.conversation_id {
            Some(id) => BrainConversation::get_owned(id, &user_id, &self.db).await?,
            None => {
                let created = BrainConversation::new(
                    user_id.clone(),
                    query.chars().take(60).collect::<String>(),
                );
                self.db.store_item(created.clone()).await?;
                created
            }
        };

        let query_embedding = match self.embedder.embed(&query).await {
            Ok(embedding) => Some(embedding),
            Err(err) => {
                warn!(error = %err, "Brain query embedding unavailable");
                None
            }
        };

        let token_budget = options
            .token_budget
            .unwrap_or(self.config.brain_context_budget);
        let previously_loaded = self.previously_loaded(&conversation.id).await?;
        let selected = select_topics(
            &self.db,
            &user_id,
            &query,
            query_embedding.as_deref(),
            &SelectionOptions {
                max_topics: None,
                token_budget,
                pinned_topics: options.pinned_topics.clone(),
                previously_loaded_topics: previously_loaded,
            },
        )
        .await?;

        let history = self.tiered_history(&conversation).await?;
        let context =
            assemble_context(&self.db, &user_id, &selected, &history, token_budget).await?;

        let model = options
            .model
            .clone()
            .unwrap_or_else(|| self.config.brain_model.clone());
        let request = GenerationRequest {
            messages: vec![
                LlmMessage::system(context.system_prompt.clone()),
                LlmMessage::user(query.clone()),
            ],
            model: model.clone(),
            temperature: self.config.brain_temperature,
            max_tokens: 2048,
            context_window: Some(self.config.default_context_length),
        };

        let (mut llm_stream, provider_used, used_fallback) = self
            .registry
            .stream_with_fallback(options.provider, request, &user_id, &self.db)
            .await?;
        let model_used = if used_fallback {
            self.config.brain_model.clone()
        } else {
            model
        };

        let db = Arc::clone(&self.db);
        let conversation_id = conversation.id.clone();
        let brain_files_used = context.brain_files_used.clone();
        let topics_matched: Vec<String> = context
            .topics_matched
            .iter()
            .map(|topic| topic.file_key.clone())
            .collect();

        let events = stream! {
            let mut answer = String::new();
            let mut usage: (Option<u64>, Option<u64>) = (None, None);
            let mut failed: Option<(String, String)> = None;

            while let Some(chunk) = llm_stream.next().await {
                if chunk.is_error {
                    failed = Some((
                        chunk.content.clone(),
                        chunk.error_type.clone().unwrap_or_else(|| "unknown".into()),
                    ));
                    break;
                }
                if !chunk.content.is_empty() {
                    answer.push_str(&chunk.content);
                    yield BrainStreamEvent::Token {
                        content: chunk.content.clone(),
                    };
                }
                if chunk.done {
                    usage = (chunk.input_tokens, chunk.output_tokens);
                    break;
                }
            }

            // Persist the turn; partial answers survive failed streams
            let message_id = if failed.is_none() || !answer.is_empty() {
                match persist_brain_turn(
                    &db,
                    &user_id,
                    &conversation_id,
                    &query,
                    &answer,
                    &brain_files_used,
                    &topics_matched,
                )
                .await
                {
                    Ok(id) => Some(id),
                    Err(err) => {
                        error!(error = %err, "Failed to persist brain turn");
                        None
                    }
                }
            } else {
                None
            };

            if let Some((content, error_type)) = failed {
                yield BrainStreamEvent::Error {
                    content,
                    error_type,
                };
                yield BrainStreamEvent::Done;
                return;
            }

            log_usage(
                &db,
                &user_id,
                provider_used,
                &model_used,
                usage.0.unwrap_or(0),
                usage.1.unwrap_or(0),
                "brain",
                Some(conversation_id.clone()),
            )
            .await;

            // Background follow-ups: rolling summary and memory evolution
            if let Err(err) = schedule_followups(&db, &user_id, &conversation_id).await {
                warn!(error = %err, "Failed to schedule brain follow-up tasks");
            }

            yield BrainStreamEvent::Metadata {
                brain_files_used: brain_files_used.clone(),
                topics_matched: topics_matched.clone(),
                model_used: model_used.clone(),
                provider_used: provider_used.as_str().to_owned(),
                used_local_fallback: used_fallback,
                conversation_id: conversation_id.clone(),
                message_id,
            };
            yield BrainStreamEvent::Done;
        };

        Ok(events)
    }
}

async fn persist_brain_turn(
    db: &SurrealDbClient,
    user_id: &str,
    conversation_id: &str,
    query: &str,
    answer: &str,
    brain_files_used: &[String],
    topics_matched: &[String],
) -> Result<String, AppError> {
    let user_message = BrainMessage::new(
        conversation_id.to_owned(),
        user_id.to_owned(),
        MessageRole::User,
        query.to_owned(),
    );
    db.store_item(user_message).await?;
    BrainConversation::increment_message_counter(conversation_id, db).await?;

    let mut assistant = BrainMessage::new(
        conversation_id.to_owned(),
        user_id.to_owned(),
        MessageRole::Assistant,
        answer.to_owned(),
    );
    assistant.brain_files_loaded = brain_files_used.to_vec();
    assistant.topics_matched = topics_matched.to_vec();
    let message_id = assistant.id.clone();
    db.store_item(assistant).await?;
    BrainConversation::increment_message_counter(conversation_id, db).await?;

    Ok(message_id)
}

async fn schedule_followups(
    db: &SurrealDbClient,
    user_id: &str,
    conversation_id: &str,
) -> Result<(), AppError> {
    let conversation: Option<BrainConversation> = db.get_item(conversation_id).await?;
    if let Some(conversation) = conversation {
        if conversation.messages_since_summary >= SUMMARY_THRESHOLD {
            BackgroundTask::enqueue(
                TaskPayload::ConversationSummary {
                    conversation_id: conversation_id.to_owned(),
                },
                user_id,
                db,
            )
            .await?;
        }
    }

    BackgroundTask::enqueue(
        TaskPayload::MemoryEvolve {
            conversation_id: conversation_id.to_owned(),
        },
        user_id,
        db,
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_persist_brain_turn_records_loads_and_counter() {
        let db = SurrealDbClient::memory("test_ns", &uuid::Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");

        let conversation = BrainConversation::new("u".into(), "Chat".into());
        db.store_item(conversation.clone())
            .await
            .expect("store conversation");

        persist_brain_turn(
            &db,
            "u",
            &conversation.id,
            "question",
            "answer",
            &["soul".into(), "knowledge_map".into(), "topic_0".into()],
            &["topic_0".into()],
        )
        .await
        .expect("persist turn");

        let messages = BrainMessage::for_conversation(&conversation.id, &db)
            .await
            .expect("messages");
        assert_eq!(messages.len(), 2);
        let assistant = messages
            .iter()
            .find(|m| m.role == MessageRole::Assistant)
            .expect("assistant message");
        assert_eq!(assistant.topics_matched, vec!["topic_0".to_owned()]);
        assert!(assistant.brain_files_loaded.contains(&"soul".to_owned()));

        let reloaded: BrainConversation = db
            .get_item(&conversation.id)
            .await
            .expect("fetch")
            .expect("exists");
        assert_eq!(reloaded.messages_since_summary, 2);
    }

    #[tokio::test]
    async fn test_schedule_followups_enqueues_summary_past_threshold() {
        let db = SurrealDbClient::memory("test_ns", &uuid::Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");

        let mut conversation = BrainConversation::new("u".into(), "Chat".into());
        conversation.messages_since_summary = SUMMARY_THRESHOLD;
        db.store_item(conversation.clone())
            .await
            .expect("store conversation");

        schedule_followups(&db, "u", &conversation.id)
            .await
            .expect("schedule");

        let tasks: Vec<BackgroundTask> = db
            .get_all_stored_items()
            .await
            .expect("fetch tasks");
        assert!(tasks.iter().any(|task| matches!(
            task.payload,
            TaskPayload::ConversationSummary { .. }
        )));
        assert!(tasks
            .iter()
            .any(|task| matches!(task.payload, TaskPayload::MemoryEvolve { .. })));
    }
}
