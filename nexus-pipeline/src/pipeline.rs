use std::collections::HashSet;
use std::sync::Arc;

use async_stream::stream;
use futures::{Stream, StreamExt};
use tracing::{error, info, instrument, warn};

use common::{
    error::AppError,
    llm::{
        classify_llm_error, registry::ProviderRegistry, usage::log_usage, GenerationRequest,
        LlmMessage, ProviderKind,
    },
    storage::{
        db::SurrealDbClient,
        types::{
            access_pattern::AccessPattern,
            chat_message::{ChatMessage, MessageRole},
            community::CommunityMetadata,
            conversation::Conversation,
            navigation_cache::NavigationCache,
            nexus_citation::NexusCitation,
            tag::Tag,
        },
    },
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};

use crate::{
    context::{build_context, extract_used_indices, resolve_source_chains, ContextConfig},
    diffusion::{diffusion_rank, DiffusionConfig},
    events::{NexusStreamEvent, RetrievalMetadata},
    fusion::{fuse_results, FusionConfig},
    navigator::navigate,
    router::{route_query, QueryMode, QueryRoute},
    search::{vector_strategy, SearchOptions},
    AssembledContext, RankedResult, SourceType,
};

/// Per-request knobs for a NEXUS query.
#[derive(Debug, Clone)]
pub struct NexusQueryOptions {
    pub conversation_id: Option<String>,
    pub auto_create_conversation: bool,
    pub mode: QueryMode,
    pub max_sources: usize,
    pub min_similarity: f32,
    pub include_images: bool,
    pub provider: ProviderKind,
    pub model: Option<String>,
}

impl Default for NexusQueryOptions {
    fn default() -> Self {
        Self {
            conversation_id: None,
            auto_create_conversation: true,
            mode: QueryMode::Auto,
            max_sources: 10,
            min_similarity: 0.4,
            include_images: true,
            provider: ProviderKind::Local,
            model: None,
        }
    }
}

/// Everything retrieval produced for one query, before generation.
#[derive(Debug)]
pub struct RetrievalOutcome {
    pub route: QueryRoute,
    pub ranked: Vec<RankedResult>,
    pub context: AssembledContext,
    pub strategies: Vec<String>,
}

/// The NEXUS query pipeline: route, retrieve, fuse, assemble, generate.
pub struct NexusPipeline {
    db: Arc<SurrealDbClient>,
    registry: Arc<ProviderRegistry>,
    embedder: Arc<EmbeddingProvider>,
    config: AppConfig,
}

impl NexusPipeline {
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

    fn effective_model(&self, options: &NexusQueryOptions) -> String {
        options
            .model
            .clone()
            .unwrap_or_else(|| self.config.default_text_model.clone())
    }

    /// Run the retrieval half of the pipeline: strategies per mode, fused
    /// and packed into a cited context. Retrieval never mutates graph data.
    #[instrument(skip_all, fields(user_id))]
    pub async fn run_retrieval(
        &self,
        query: &str,
        user_id: &str,
        options: &NexusQueryOptions,
    ) -> Result<RetrievalOutcome, AppError> {
        if query.trim().is_empty() {
            return Err(AppError::Validation("Query cannot be empty".into()));
        }

        let (community_map, tag_overview) = NavigationCache::get_for_user(user_id, &self.db).await?;
        let cache_ready = community_map.is_some() && tag_overview.is_some();
        let route = route_query(query, options.mode, cache_ready);

        info!(
            mode = route.mode.as_str(),
            intent = route.intent.as_str(),
            auto = route.auto_detected,
            "Routed NEXUS query"
        );

        let search_options = SearchOptions {
            max_sources: options.max_sources,
            min_similarity: options.min_similarity,
            include_images: options.include_images,
        };

        // Vector search runs for every mode
        let vector_results =
            vector_strategy(&self.db, &self.embedder, query, user_id, &search_options).await?;
        let mut strategies = vec!["vector_search".to_owned()];

        // STANDARD/DEEP add map navigation when the caches exist
        let mut graph_results = None;
        if matches!(route.mode, QueryMode::Standard | QueryMode::Deep) {
            if let (Some(map), Some(tags)) = (&community_map, &tag_overview) {
                let provider = match self.registry.resolve(options.provider, user_id, &self.db).await
                {
                    Ok(provider) => provider,
                    Err(err) => {
                        warn!(error = %err, "Navigator falling back to local provider");
                        self.registry.local()
                    }
                };
                let nav_results = navigate(
                    &self.db,
                    &provider,
                    &self.effective_model(options),
                    self.config.rag_temperature,
                    query,
                    user_id,
                    map,
                    tags,
                )
                .await;
                if !nav_results.is_empty() {
                    strategies.push("graph_navigator".to_owned());
                    graph_results = Some(nav_results);
                }
            }
        }

        // DEEP adds diffusion ranking
        let mut diffusion_scores = None;
        if route.mode == QueryMode::Deep {
            let query_embedding = match self.embedder.embed(query).await {
                Ok(embedding) => Some(embedding),
                Err(err) => {
                    warn!(error = %err, "Diffusion running without query embedding");
                    None
                }
            };
            let scores = diffusion_rank(
                &self.db,
                user_id,
                query_embedding.as_deref(),
                &DiffusionConfig::default(),
            )
            .await?;
            if !scores.is_empty() {
                strategies.push("diffusion_ranker".to_owned());
                diffusion_scores = Some(scores);
            }
        }

        let ranked = if graph_results.is_some() || diffusion_scores.is_some() {
            fuse_results(
                vector_results,
                graph_results,
                diffusion_scores.as_ref(),
                route.intent,
                &FusionConfig {
                    max_results: options.max_sources,
                    ..FusionConfig::default()
                },
            )
        } else {
            let mut ranked = vector_results;
            ranked.truncate(options.max_sources);
            for (index, entry) in ranked.iter_mut().enumerate() {
                entry.rank = index as u32 + 1;
            }
            ranked
        };

        // Source chains for every candidate backed by a note
        let note_ids: Vec<String> = ranked
            .iter()
            .filter_map(|r| r.result.note_id.clone())
            .collect();
        let chains = resolve_source_chains(&self.db, user_id, &note_ids).await?;
        let communities = CommunityMetadata::all_for_user(user_id, &self.db).await?;
        let tag_counts = Tag::note_counts(user_id, &self.db).await?;
        let co_retrieved = AccessPattern::pairs_for_user(user_id, &self.db).await?;

        let context = build_context(
            &ranked,
            &chains,
            &communities,
            &tag_counts,
            &co_retrieved,
            &ContextConfig {
                context_budget: self.config.rag_context_budget,
                ..ContextConfig::default()
            },
        );

        Ok(RetrievalOutcome {
            route,
            ranked,
            context,
            strategies,
        })
    }

    /// Answer a query as a typed event stream: `token*`, `citations`,
    /// `connections?`, `suggestions?`, `metadata`, `done`; `error` may
    /// terminate the stream at any point.
    pub async fn query_stream(
        &self,
        query: String,
        user_id: String,
        options: NexusQueryOptions,
    ) -> Result<impl Stream<Item = NexusStreamEvent> + Send, AppError> {
        // Conversation bookkeeping happens before the stream starts so a
        // broken conversation id fails the request, not the stream.
        let conversation = match &options.conversation_id {
            Some(id) => match Conversation::get_complete_conversation(id, &user_id, &self.db).await
            {
                Ok((conversation, _)) => Some(conversation),
                Err(AppError::NotFound(_)) if options.auto_create_conversation => None,
                Err(err) => return Err(err),
            },
            None => None,
        };
        let conversation = match conversation {
            Some(conversation) => Some(conversation),
            None if options.auto_create_conversation => {
                let created = Conversation::new(
                    user_id.clone(),
                    Conversation::title_from_query(&query),
                );
                self.db.store_item(created.clone()).await?;
                Some(created)
            }
            None => None,
        };

        let outcome = self.run_retrieval(&query, &user_id, &options).await?;

        let history = match &conversation {
            Some(conversation) => {
                Conversation::recent_history(&conversation.id, &self.db).await?
            }
            None => String::new(),
        };

        let mut system_prompt = outcome.context.system_prompt.clone();
        if !history.is_empty() {
            system_prompt.push_str("\n\nCONVERSATION SO FAR:\n");
            system_prompt.push_str(&history);
        }

        let request = GenerationRequest {
            messages: vec![
                LlmMessage::system(system_prompt),
                LlmMessage::user(query.clone()),
            ],
            model: self.effective_model(&options),
            temperature: self.config.rag_temperature,
            max_tokens: 2048,
            context_window: Some(self.config.default_context_length),
        };
        let requested_model = request.model.clone();

        let (mut llm_stream, provider_used, used_fallback) = self
            .registry
            .stream_with_fallback(options.provider, request, &user_id, &self.db)
            .await?;
        let model_used = if used_fallback {
            self.config.default_text_model.clone()
        } else {
            requested_model
        };

        let db = Arc::clone(&self.db);
        let route = outcome.route;
        let strategies = outcome.strategies;
        let context = outcome.context;
        let total_candidates = outcome.ranked.len();
        let conversation_id = conversation.as_ref().map(|c| c.id.clone());

        let events = stream! {
            let mut answer = String::new();
            let mut usage: (Option<u64>, Option<u64>) = (None, None);

            while let Some(chunk) = llm_stream.next().await {
                if chunk.is_error {
                    error!(error_type = ?chunk.error_type, "Token stream failed mid-generation");
                    // Keep whatever was generated; the UI offers a retry.
                    if !answer.is_empty() {
                        if let Some(conversation_id) = &conversation_id {
                            let _ = persist_turn(
                                &db,
                                &user_id,
                                conversation_id,
                                &query,
                                &answer,
                                &context.rich_citations,
                                &extract_used_indices(&answer, context.rich_citations.len()),
                                chunk.error_type.clone(),
                            )
                            .await;
                        }
                    }
                    yield NexusStreamEvent::Error {
                        content: chunk.content.clone(),
                        error_type: chunk.error_type.clone().unwrap_or_else(|| "unknown".into()),
                    };
                    yield NexusStreamEvent::Done;
                    return;
                }

                if !chunk.content.is_empty() {
                    answer.push_str(&chunk.content);
                    yield NexusStreamEvent::Token {
                        content: chunk.content.clone(),
                    };
                }
                if chunk.done {
                    usage = (chunk.input_tokens, chunk.output_tokens);
                    break;
                }
            }

            let used_indices = extract_used_indices(&answer, context.rich_citations.len());
            yield NexusStreamEvent::Citations {
                citations: context.rich_citations.clone(),
                used_indices: used_indices.clone(),
            };
            if !context.connection_insights.is_empty() {
                yield NexusStreamEvent::Connections {
                    connections: context.connection_insights.clone(),
                };
            }
            if !context.exploration_suggestions.is_empty() {
                yield NexusStreamEvent::Suggestions {
                    suggestions: context.exploration_suggestions.clone(),
                };
            }

            let mut message_id = None;
            if let Some(conversation_id) = &conversation_id {
                match persist_turn(
                    &db,
                    &user_id,
                    conversation_id,
                    &query,
                    &answer,
                    &context.rich_citations,
                    &used_indices,
                    None,
                )
                .await
                {
                    Ok(id) => message_id = Some(id),
                    Err(err) => error!(error = %err, "Failed to persist NEXUS conversation turn"),
                }
            }

            log_usage(
                &db,
                &user_id,
                provider_used,
                &model_used,
                usage.0.unwrap_or(0),
                usage.1.unwrap_or(0),
                "nexus",
                conversation_id.clone(),
            )
            .await;

            yield NexusStreamEvent::Metadata {
                metadata: RetrievalMetadata {
                    mode: route.mode.as_str().to_owned(),
                    mode_auto_detected: route.auto_detected,
                    intent: route.intent.as_str().to_owned(),
                    strategies_used: strategies.clone(),
                    total_sources_searched: total_candidates,
                    sources_used: context.rich_citations.len(),
                    context_tokens_approx: context.total_tokens_approx,
                    context_truncated: context.truncated,
                    model_used: model_used.clone(),
                    provider_used: provider_used.as_str().to_owned(),
                    used_local_fallback: used_fallback,
                    conversation_id: conversation_id.clone(),
                    message_id,
                },
            };
            yield NexusStreamEvent::Done;
        };

        Ok(events)
    }
}

/// Store the user and assistant messages, persist the referenced
/// citations, and bump co-retrieval counters for cited note pairs.
#[allow(clippy::too_many_arguments)]
async fn persist_turn(
    db: &SurrealDbClient,
    user_id: &str,
    conversation_id: &str,
    query: &str,
    answer: &str,
    citations: &[crate::context::RichCitation],
    used_indices: &[u32],
    error_type: Option<String>,
) -> Result<String, AppError> {
    let user_message = ChatMessage::new(
        conversation_id.to_owned(),
        user_id.to_owned(),
        MessageRole::User,
        query.to_owned(),
    );
    db.store_item(user_message).await?;

    let mut assistant_message = ChatMessage::new(
        conversation_id.to_owned(),
        user_id.to_owned(),
        MessageRole::Assistant,
        answer.to_owned(),
    );
    assistant_message.error_type = error_type;
    let message_id = assistant_message.id.clone();
    db.store_item(assistant_message).await?;

    let used: HashSet<u32> = used_indices.iter().copied().collect();
    let rows: Vec<NexusCitation> = citations
        .iter()
        .filter(|citation| used.contains(&citation.index))
        .map(|citation| {
            let now = chrono::Utc::now();
            NexusCitation {
                id: uuid::Uuid::new_v4().to_string(),
                created_at: now,
                updated_at: now,
                user_id: user_id.to_owned(),
                message_id: message_id.clone(),
                citation_index: citation.index,
                source_type: citation.source_type.as_str().to_owned(),
                source_id: citation.source_id.clone(),
                title: citation.title.clone(),
                relevance_score: citation.relevance_score,
                retrieval_method: citation.retrieval_method.clone(),
                origin_type: citation.origin_type.clone(),
                artifact_id: citation.artifact_id.clone(),
                community_id: citation.community_id,
                community_name: citation.community_name.clone(),
                tags: citation.tags.clone(),
                direct_wikilinks: citation.direct_wikilinks.clone(),
                path_to_other_results: citation.path_to_other_results.clone(),
                note_url: citation.note_url.clone(),
                graph_url: citation.graph_url.clone(),
                artifact_url: citation.artifact_url.clone(),
            }
        })
        .collect();
    NexusCitation::save_all(rows, db).await?;

    // Cited notes retrieved together feed future co_retrieval insights
    let cited_notes: Vec<&str> = citations
        .iter()
        .filter(|citation| {
            used.contains(&citation.index) && citation.source_type == SourceType::Note
        })
        .map(|citation| citation.source_id.as_str())
        .collect();
    for i in 0..cited_notes.len() {
        for j in (i + 1)..cited_notes.len() {
            if let Err(err) =
                AccessPattern::bump_pair(user_id, cited_notes[i], cited_notes[j], db).await
            {
                warn!(error = %err, "Failed to bump co-retrieval counter");
            }
        }
    }

    Conversation::touch(conversation_id, db).await?;
    Ok(message_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::note::{Note, NoteOrigin};

    async fn pipeline_fixture() -> (NexusPipeline, Arc<SurrealDbClient>) {
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &uuid::Uuid::new_v4().to_string())
                .await
                .expect("in-memory db"),
        );
        db.ensure_initialized(64).await.expect("schema");

        let config = AppConfig::default();
        let registry = Arc::new(ProviderRegistry::from_config(&config).expect("registry"));
        let embedder = Arc::new(EmbeddingProvider::new_hashed(64).expect("embedder"));

        (
            NexusPipeline::new(Arc::clone(&db), registry, embedder, config),
            db,
        )
    }

    #[tokio::test]
    async fn test_fast_retrieval_returns_matching_note() {
        let (pipeline, db) = pipeline_fixture().await;
        let embedder = EmbeddingProvider::new_hashed(64).expect("embedder");

        let mut docker = Note::new(
            "user1".into(),
            "Docker networking notes".into(),
            "docker bridge network configuration".into(),
            NoteOrigin::Manual,
        );
        docker.embedding = Some(
            embedder
                .embed("Docker networking notes docker bridge network configuration")
                .await
                .expect("embed"),
        );
        let mut recipes = Note::new(
            "user1".into(),
            "Recipes".into(),
            "pasta sauce simmer".into(),
            NoteOrigin::Manual,
        );
        recipes.embedding = Some(
            embedder
                .embed("Recipes pasta sauce simmer")
                .await
                .expect("embed"),
        );

        db.store_item(docker.clone()).await.expect("store docker");
        db.store_item(recipes).await.expect("store recipes");
        db.rebuild_search_indexes().await.expect("rebuild");

        let options = NexusQueryOptions {
            mode: QueryMode::Fast,
            min_similarity: 0.05,
            ..NexusQueryOptions::default()
        };
        let outcome = pipeline
            .run_retrieval("docker bridge network", "user1", &options)
            .await
            .expect("retrieval");

        assert_eq!(outcome.route.mode, QueryMode::Fast);
        assert_eq!(outcome.strategies, vec!["vector_search".to_owned()]);
        assert!(!outcome.ranked.is_empty());
        assert_eq!(
            outcome.ranked[0].result.note_id.as_deref(),
            Some(docker.id.as_str())
        );
        assert_eq!(outcome.context.rich_citations[0].index, 1);
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected() {
        let (pipeline, _db) = pipeline_fixture().await;
        let err = pipeline
            .run_retrieval("   ", "user1", &NexusQueryOptions::default())
            .await
            .expect_err("empty query");
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_retrieval_never_leaks_other_owners() {
        let (pipeline, db) = pipeline_fixture().await;
        let embedder = EmbeddingProvider::new_hashed(64).expect("embedder");

        let mut foreign = Note::new(
            "stranger".into(),
            "Docker networking notes".into(),
            "docker bridge network configuration".into(),
            NoteOrigin::Manual,
        );
        foreign.embedding = Some(
            embedder
                .embed("Docker networking notes docker bridge network configuration")
                .await
                .expect("embed"),
        );
        db.store_item(foreign).await.expect("store");
        db.rebuild_search_indexes().await.expect("rebuild");

        let outcome = pipeline
            .run_retrieval(
                "docker bridge network",
                "user1",
                &NexusQueryOptions {
                    mode: QueryMode::Fast,
                    min_similarity: 0.0,
                    ..NexusQueryOptions::default()
                },
            )
            .await
            .expect("retrieval");
        assert!(outcome.ranked.is_empty());
    }
}
