//! In-process fakes for the capability and repository traits.

use async_trait::async_trait;
use medroute_core::capability::{
    ChatMessage, Embedder, GenerationConfig, GenerationError, Generator, Retriever, SearchHit,
};
use medroute_core::error::{MedrouteError, Result};
use medroute_core::session::{
    ConversationRecord, HistoryRepository, SessionContext, SessionRepository,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Session repository backed by a map, with switchable save failures.
#[derive(Default)]
pub struct MockSessionRepository {
    records: Mutex<HashMap<String, SessionContext>>,
    pub fail_saves: AtomicBool,
    pub saves: AtomicUsize,
}

impl MockSessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: SessionContext) {
        self.records
            .lock()
            .unwrap()
            .insert(session.session_id.clone(), session);
    }

    pub fn get(&self, session_id: &str) -> Option<SessionContext> {
        self.records.lock().unwrap().get(session_id).cloned()
    }
}

#[async_trait]
impl SessionRepository for MockSessionRepository {
    async fn find_by_id(&self, session_id: &str) -> anyhow::Result<Option<SessionContext>> {
        Ok(self.get(session_id))
    }

    async fn save(&self, session: &SessionContext) -> anyhow::Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            anyhow::bail!("disk full");
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.insert(session.clone());
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> anyhow::Result<()> {
        self.records.lock().unwrap().remove(session_id);
        Ok(())
    }

    async fn list_ids(&self) -> anyhow::Result<Vec<String>> {
        let mut ids: Vec<String> = self.records.lock().unwrap().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn list_all(&self) -> anyhow::Result<Vec<SessionContext>> {
        let mut all: Vec<SessionContext> = self.records.lock().unwrap().values().cloned().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(all)
    }
}

type Script = Box<dyn Fn(&[ChatMessage], GenerationConfig) -> std::result::Result<String, GenerationError> + Send + Sync>;

/// Generator answering through a closure and recording every call.
pub struct ScriptedGenerator {
    script: Script,
    pub calls: Mutex<Vec<(Vec<ChatMessage>, GenerationConfig)>>,
}

impl ScriptedGenerator {
    pub fn new(
        script: impl Fn(&[ChatMessage], GenerationConfig) -> std::result::Result<String, GenerationError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Always answers `text`.
    pub fn constant(text: &'static str) -> Self {
        Self::new(move |_, _| Ok(text.to_string()))
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Calls made with `max_tokens`.
    pub fn calls_with_max_tokens(&self, max_tokens: u32) -> Vec<Vec<ChatMessage>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, config)| config.max_tokens == max_tokens)
            .map(|(messages, _)| messages.clone())
            .collect()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        config: GenerationConfig,
    ) -> std::result::Result<String, GenerationError> {
        self.calls.lock().unwrap().push((messages.to_vec(), config));
        (self.script)(messages, config)
    }
}

/// Generator replaying a fixed sequence of outcomes, optionally slowly.
pub struct SequenceGenerator {
    outcomes: Mutex<VecDeque<std::result::Result<String, GenerationError>>>,
    delay: Duration,
    pub calls: AtomicUsize,
}

impl SequenceGenerator {
    pub fn new(outcomes: Vec<std::result::Result<String, GenerationError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Generator for SequenceGenerator {
    async fn generate(
        &self,
        _messages: &[ChatMessage],
        _config: GenerationConfig,
    ) -> std::result::Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(GenerationError::Unavailable("script exhausted".to_string())))
    }
}

/// Conversation histories kept in a map.
#[derive(Default)]
pub struct MockHistoryRepository {
    records: Mutex<HashMap<String, ConversationRecord>>,
}

impl MockHistoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session_id: &str) -> Option<ConversationRecord> {
        self.records.lock().unwrap().get(session_id).cloned()
    }
}

#[async_trait]
impl HistoryRepository for MockHistoryRepository {
    async fn find_history(&self, session_id: &str) -> anyhow::Result<Option<ConversationRecord>> {
        Ok(self.get(session_id))
    }

    async fn save_history(&self, record: &ConversationRecord) -> anyhow::Result<()> {
        self.records
            .lock()
            .unwrap()
            .insert(record.session_id.clone(), record.clone());
        Ok(())
    }

    async fn delete_history(&self, session_id: &str) -> anyhow::Result<()> {
        self.records.lock().unwrap().remove(session_id);
        Ok(())
    }
}

/// Retriever serving canned hits per index and recording queries.
#[derive(Default)]
pub struct FakeRetriever {
    hits: HashMap<String, Vec<SearchHit>>,
    failure: Option<String>,
    delay: Duration,
    pub queries: Mutex<Vec<(String, String)>>,
}

impl FakeRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hits(mut self, index: &str, hits: Vec<SearchHit>) -> Self {
        self.hits.insert(index.to_string(), hits);
        self
    }

    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::default()
        }
    }

    /// Answers only after `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn queries(&self) -> Vec<(String, String)> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Retriever for FakeRetriever {
    async fn search(&self, index: &str, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        self.queries
            .lock()
            .unwrap()
            .push((index.to_string(), query.to_string()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(message) = &self.failure {
            return Err(MedrouteError::retrieval(message.clone()));
        }
        Ok(self
            .hits
            .get(index)
            .map(|hits| hits.iter().take(top_k).cloned().collect())
            .unwrap_or_default())
    }
}

/// Bag-of-words embedder over a fixed vocabulary.
///
/// Text mentioning none of the words cannot be embedded.
pub struct KeywordEmbedder {
    vocabulary: Vec<&'static str>,
}

impl KeywordEmbedder {
    pub fn new(vocabulary: &[&'static str]) -> Self {
        Self {
            vocabulary: vocabulary.to_vec(),
        }
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let lower = text.to_lowercase();
        let vector: Vec<f32> = self
            .vocabulary
            .iter()
            .map(|word| if lower.contains(word) { 1.0 } else { 0.0 })
            .collect();
        vector.iter().any(|v| *v > 0.0).then_some(vector)
    }
}

/// Embedder that answers only after `delay`.
pub struct SlowEmbedder {
    inner: KeywordEmbedder,
    delay: Duration,
}

impl SlowEmbedder {
    pub fn new(vocabulary: &[&'static str], delay: Duration) -> Self {
        Self {
            inner: KeywordEmbedder::new(vocabulary),
            delay,
        }
    }
}

#[async_trait]
impl Embedder for SlowEmbedder {
    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        tokio::time::sleep(self.delay).await;
        self.inner.embed(text).await
    }
}

/// A search hit with the usual index fields.
pub fn hit(code: &str, label: &str, score: f64) -> SearchHit {
    let mut document = HashMap::new();
    document.insert("id".to_string(), format!("doc-{}", code));
    document.insert("CODE".to_string(), code.to_string());
    document.insert("STR".to_string(), label.to_string());
    document.insert("SAB".to_string(), "ICD10CM".to_string());
    SearchHit { document, score }
}

/// A hit whose `REL` field lists `(kind, code, label, source)` entries,
/// encoded the way the search index returns them.
pub fn hit_with_relationships(
    code: &str,
    label: &str,
    relationships: &[(&str, &str, &str, &str)],
) -> SearchHit {
    let entries: Vec<String> = relationships
        .iter()
        .map(|(kind, rel_code, rel_label, source)| {
            serde_json::json!({"REL": kind, "CODE": rel_code, "STR": rel_label, "SAB": source})
                .to_string()
        })
        .collect();
    let mut result = hit(code, label, 0.9);
    result
        .document
        .insert("REL".to_string(), serde_json::json!(entries).to_string());
    result
}
