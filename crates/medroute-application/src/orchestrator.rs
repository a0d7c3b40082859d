//! Entry point that routes each query to a processing path.

use crate::agents::{
    ChatAgent, ConceptSetWorkflow, LookupAgent, ModificationHandler, RelationshipAgent, Vocabulary,
};
use crate::context_builder::ContextBuilder;
use crate::generation::RetryingGenerator;
use crate::memory::{DEFAULT_EXTRACTION_INTERVAL, EmbeddingMemory};
use crate::session::{CleanupReport, SessionStore};
use medroute_core::capability::{ChatMessage, Embedder, Generator, Retriever};
use medroute_core::classify::{AgentCategory, ModificationClassifier, RoutingRules};
use medroute_core::concept_set::{self, ConceptSetRegistry};
use medroute_core::config::EngineConfig;
use medroute_core::error::Result;
use medroute_core::memory::{ConversationMemory, ConversationTurn};
use medroute_core::relevance::RelevanceFilter;
use medroute_core::session::{ConversationHistory, HistoryRepository, SessionRepository};
use medroute_infrastructure::{AsyncDirHistoryRepository, AsyncDirSessionRepository, ConfigService};
use medroute_interaction::{AzureOpenAiChat, AzureOpenAiEmbedder, AzureSearchRetriever};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Which path produced a response; recorded with memory turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    ConceptSet,
    ConceptSetFollowup,
    Modification,
    Followup,
    Lookup(Vocabulary),
    Relationship,
    Chat,
    Failed,
}

impl Route {
    pub fn agent_name(self) -> &'static str {
        match self {
            Self::ConceptSet => "concept_set",
            Self::ConceptSetFollowup => "concept_set_followup",
            Self::Modification => "modification",
            Self::Followup => "followup",
            Self::Lookup(vocabulary) => vocabulary.agent_name(),
            Self::Relationship => "relationship",
            Self::Chat => "chat",
            Self::Failed => "error",
        }
    }
}

/// Routes queries across the session store, the agents and memory.
///
/// Order per query: concept-set creation, concept-set follow-up, data
/// modification, context assembly, follow-up over session data, then a
/// category dispatch. Every failure reaches the caller as a response string.
///
/// Conversation histories are cached per session and, when a
/// [`HistoryRepository`] is attached, written after every turn and reloaded
/// on first use.
pub struct Orchestrator {
    config: EngineConfig,
    store: Arc<SessionStore>,
    routing: RoutingRules,
    classifier: ModificationClassifier,
    context_builder: ContextBuilder,
    icd: Arc<LookupAgent>,
    snomed: Arc<LookupAgent>,
    relationships: RelationshipAgent,
    chat: ChatAgent,
    modification: ModificationHandler,
    concept_sets: ConceptSetWorkflow,
    memory: Arc<dyn ConversationMemory>,
    histories: Mutex<HashMap<String, ConversationHistory>>,
    history_repository: Option<Arc<dyn HistoryRepository>>,
    active_session: Mutex<Option<String>>,
}

impl Orchestrator {
    /// Wires the orchestrator from its capabilities.
    ///
    /// `generator` is wrapped with the configured retry policy and timeout.
    pub fn new(
        config: EngineConfig,
        generator: Arc<dyn Generator>,
        retriever: Arc<dyn Retriever>,
        embedder: Arc<dyn Embedder>,
        memory: Arc<dyn ConversationMemory>,
        repository: Arc<dyn SessionRepository>,
    ) -> Self {
        let generator: Arc<dyn Generator> = Arc::new(RetryingGenerator::new(
            generator,
            config.retry.clone(),
            config.timeouts.generation(),
        ));
        let store = Arc::new(SessionStore::new(repository));

        let lookup = |vocabulary: Vocabulary, index: &str| {
            Arc::new(
                LookupAgent::new(vocabulary, index, retriever.clone(), generator.clone())
                    .with_top_k(config.search_top_k)
                    .with_search_timeout(config.timeouts.search()),
            )
        };
        let icd = lookup(Vocabulary::Icd, &config.icd_index);
        let snomed = lookup(Vocabulary::Snomed, &config.snomed_index);
        let relationships =
            RelationshipAgent::new(config.icd_index.clone(), retriever.clone(), generator.clone())
                .with_search_timeout(config.timeouts.search());

        let relevance = RelevanceFilter::new(embedder)
            .with_threshold(config.relevance_threshold)
            .with_embed_timeout(config.timeouts.embedding());
        let context_builder =
            ContextBuilder::new(relevance, memory.clone(), config.max_context_tokens);

        let concept_sets = ConceptSetWorkflow::new(
            generator.clone(),
            retriever.clone(),
            Arc::new(ConceptSetRegistry::new(config.max_concept_sets_per_session)),
            config.icd_index.clone(),
        )
        .with_top_k(config.search_top_k)
        .with_search_timeout(config.timeouts.search());

        Self {
            modification: ModificationHandler::new(store.clone(), icd.clone(), snomed.clone()),
            chat: ChatAgent::new(generator),
            routing: RoutingRules::new(),
            classifier: ModificationClassifier::new(),
            histories: Mutex::new(HashMap::new()),
            history_repository: None,
            active_session: Mutex::new(None),
            config,
            store,
            context_builder,
            icd,
            snomed,
            relationships,
            concept_sets,
            memory,
        }
    }

    /// Persists conversation histories through `repository`.
    pub fn with_history_repository(mut self, repository: Arc<dyn HistoryRepository>) -> Self {
        self.history_repository = Some(repository);
        self
    }

    /// Builds the production wiring: Azure OpenAI for generation and
    /// embeddings, Azure AI Search for retrieval, sessions under the data dir.
    pub async fn from_env() -> anyhow::Result<Self> {
        let config = ConfigService::new().get_config();

        let generator: Arc<dyn Generator> = Arc::new(
            AzureOpenAiChat::try_from_env()
                .map_err(anyhow::Error::msg)?
                .with_timeout(config.timeouts.generation()),
        );
        let embedder: Arc<dyn Embedder> = Arc::new(
            AzureOpenAiEmbedder::try_from_env()
                .map_err(anyhow::Error::msg)?
                .with_timeout(config.timeouts.embedding()),
        );
        let retriever = AzureSearchRetriever::try_from_env()
            .map_err(anyhow::Error::msg)?
            .with_vector_field(config.vector_field.clone())
            .with_timeout(config.timeouts.search());
        let repository = AsyncDirSessionRepository::default_location().await?;
        let histories = AsyncDirHistoryRepository::default_location().await?;
        let fact_generator: Arc<dyn Generator> = Arc::new(RetryingGenerator::new(
            generator.clone(),
            config.retry.clone(),
            config.timeouts.generation(),
        ));
        let memory = Arc::new(
            EmbeddingMemory::new(embedder.clone())
                .with_fact_extraction(fact_generator, DEFAULT_EXTRACTION_INTERVAL),
        );

        Ok(Self::new(
            config,
            generator,
            Arc::new(retriever),
            embedder,
            memory,
            Arc::new(repository),
        )
        .with_history_repository(Arc::new(histories)))
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn active_session(&self) -> Option<String> {
        self.active_session.lock().await.clone()
    }

    /// The cached conversation history of `session_id`, if loaded.
    pub async fn history(&self, session_id: &str) -> Option<ConversationHistory> {
        self.histories.lock().await.get(session_id).cloned()
    }

    /// Answers `query` within `session_id`.
    pub async fn chat(&self, query: &str, session_id: &str) -> String {
        self.switch_session(session_id).await;

        let (response, route) = match self.route(query, session_id).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::error!(session_id, error = %e, "Query failed");
                (e.user_message(), Route::Failed)
            }
        };
        tracing::info!(session_id, route = route.agent_name(), "Query answered");

        self.store.record_query(session_id, query).await;
        self.append_history(session_id, query, &response).await;
        self.remember(ConversationTurn::new(
            session_id,
            query,
            response.as_str(),
            route.agent_name(),
        ));

        response
    }

    /// Applies the configured retention and memory cap.
    ///
    /// Evicted sessions also lose their cached history and concept sets;
    /// expired sessions lose their stored history too.
    pub async fn cleanup(&self) -> CleanupReport {
        let report = self
            .store
            .cleanup(self.config.max_age_days, self.config.max_memory_sessions)
            .await;

        let registry = self.concept_sets.registry();
        {
            let mut histories = self.histories.lock().await;
            for id in report.evicted.iter().chain(&report.durable_deleted) {
                histories.remove(id);
            }
        }
        for id in report.evicted.iter().chain(&report.durable_deleted) {
            registry.clear(id).await;
        }
        if let Some(repository) = &self.history_repository {
            for id in &report.durable_deleted {
                if let Err(e) = repository.delete_history(id).await {
                    tracing::warn!(session_id = %id, "Failed to delete conversation history: {}", e);
                }
            }
        }
        report
    }

    /// Runs [`Self::cleanup`] every `period` until the handle is aborted.
    pub fn spawn_cleanup(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let report = orchestrator.cleanup().await;
                tracing::debug!(
                    evicted = report.evicted.len(),
                    deleted = report.durable_deleted.len(),
                    "Periodic session cleanup"
                );
            }
        })
    }

    /// Saves the outgoing session before making `session_id` current.
    async fn switch_session(&self, session_id: &str) {
        let mut active = self.active_session.lock().await;
        if active.as_deref() != Some(session_id) {
            if let Some(previous) = active.take() {
                if !self.store.save(&previous).await {
                    tracing::warn!(session_id = %previous, "Outgoing session was not saved");
                }
            }
            tracing::info!(session_id, "Switching session");
            *active = Some(session_id.to_string());
        }
        // Idempotent; reloads a session evicted since the last turn.
        self.store.start_session(session_id).await;
        self.load_history(session_id).await;
    }

    /// Fills the history cache for `session_id` from the repository, once.
    async fn load_history(&self, session_id: &str) {
        let mut histories = self.histories.lock().await;
        if histories.contains_key(session_id) {
            return;
        }
        let stored = match &self.history_repository {
            Some(repository) => match repository.find_history(session_id).await {
                Ok(stored) => stored,
                Err(e) => {
                    tracing::warn!(session_id, "Failed to load conversation history: {}", e);
                    None
                }
            },
            None => None,
        };
        let history = match stored {
            Some(record) => {
                tracing::debug!(session_id, messages = record.messages.len(), "History restored");
                ConversationHistory::from_record(record, self.config.max_history_messages)
            }
            None => ConversationHistory::new(self.config.max_history_messages),
        };
        histories.insert(session_id.to_string(), history);
    }

    async fn append_history(&self, session_id: &str, query: &str, response: &str) {
        let record = {
            let mut histories = self.histories.lock().await;
            let history = histories
                .entry(session_id.to_string())
                .or_insert_with(|| ConversationHistory::new(self.config.max_history_messages));
            history.push_user(query);
            history.push_assistant(response);
            history.to_record(session_id)
        };
        if let Some(repository) = &self.history_repository {
            if let Err(e) = repository.save_history(&record).await {
                tracing::warn!(session_id, "Failed to save conversation history: {}", e);
            }
        }
    }

    async fn route(&self, query: &str, session_id: &str) -> Result<(String, Route)> {
        if self.concept_sets.is_creation_request(query).await {
            let outcome = self.concept_sets.create(session_id, query).await?;
            return Ok((outcome.response, Route::ConceptSet));
        }

        if concept_set::is_followup(query)
            && self.concept_sets.registry().has_entries(session_id).await
        {
            let response = self.concept_sets.handle_followup(session_id, query).await?;
            return Ok((response, Route::ConceptSetFollowup));
        }

        let has_data = self.store.has_data(session_id).await;
        if has_data && self.classifier.is_modification_request(query) {
            let outcome = self.modification.handle(session_id, query).await?;
            if !outcome.items.is_empty() {
                self.store.add_items(session_id, outcome.items).await;
            }
            return Ok((outcome.response, Route::Modification));
        }

        let recent = self.recent_conversation(session_id).await;
        // With data in view the context is assembled before deciding between
        // a follow-up and a new search; a new search receives it too.
        let context = if has_data {
            let items = self.store.items(session_id).await;
            self.context_builder.build(query, items, &recent).await
        } else {
            recent
        };

        let wants_search = self.routing.is_explicit_new_search(query)
            || self.routing.needs_relationship_lookup(query);
        if has_data && !wants_search {
            let answer = self.chat.answer(query, &context, Vec::new()).await?;
            return Ok((answer, Route::Followup));
        }

        let category = self.routing.classify(query);
        tracing::debug!(session_id, %category, "Dispatching by category");
        if category != AgentCategory::Chat && self.routing.is_relationship_query(query) {
            let kind = self.routing.relationship_query(query);
            let outcome = self.relationships.run(query, kind).await?;
            let added = self.store.add_items(session_id, outcome.items).await;
            tracing::debug!(session_id, added, "Relationship results stored");
            return Ok((outcome.response, Route::Relationship));
        }
        match category {
            AgentCategory::Icd => self.lookup(&self.icd, session_id, query, &context).await,
            AgentCategory::Snomed => self.lookup(&self.snomed, session_id, query, &context).await,
            AgentCategory::Chat => {
                let context = self.context_builder.build(query, Vec::new(), "").await;
                let history = self.history_messages(session_id).await;
                let answer = self.chat.answer(query, &context, history).await?;
                Ok((answer, Route::Chat))
            }
        }
    }

    async fn lookup(
        &self,
        agent: &LookupAgent,
        session_id: &str,
        query: &str,
        context: &str,
    ) -> Result<(String, Route)> {
        let outcome = agent.run(query, context).await?;
        let added = self.store.add_items(session_id, outcome.items).await;
        tracing::debug!(session_id, added, "Lookup results stored");
        Ok((outcome.response, Route::Lookup(agent.vocabulary())))
    }

    async fn recent_conversation(&self, session_id: &str) -> String {
        self.histories
            .lock()
            .await
            .get(session_id)
            .map(|history| history.recent_context(self.config.max_history_messages))
            .unwrap_or_default()
    }

    async fn history_messages(&self, session_id: &str) -> Vec<ChatMessage> {
        self.histories
            .lock()
            .await
            .get(session_id)
            .map(|history| history.to_chat_messages(self.config.max_history_messages))
            .unwrap_or_default()
    }

    /// Stores the turn in long-term memory off the request path.
    fn remember(&self, turn: ConversationTurn) {
        let memory = Arc::clone(&self.memory);
        tokio::spawn(async move {
            if let Err(e) = memory.store_turn(turn).await {
                tracing::debug!("Conversation turn not stored: {}", e);
            }
        });
    }
}

#[cfg(test)]
#[path = "orchestrator_test.rs"]
mod tests;
