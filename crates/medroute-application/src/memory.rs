//! In-process long-term memory recalled by embedding similarity.

use crate::prompts;
use async_trait::async_trait;
use medroute_core::capability::{ChatMessage, Embedder, GenerationConfig, Generator};
use medroute_core::memory::{
    ConversationMemory, ConversationTurn, Fact, FactConfidence, RecalledEpisode, parse_facts,
};
use minijinja::context;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

pub const DEFAULT_MAX_EPISODES: usize = 500;
pub const DEFAULT_MAX_FACTS: usize = 200;
/// Facts are extracted from every n-th stored turn.
pub const DEFAULT_EXTRACTION_INTERVAL: usize = 5;

const EXTRACTION_CONFIG: GenerationConfig = GenerationConfig::new(500, 0.0);

struct FactExtractor {
    generator: Arc<dyn Generator>,
    interval: usize,
}

struct Episode {
    turn: ConversationTurn,
    vector: Vec<f32>,
}

/// Keeps the most recent turns with their embeddings, plus the facts
/// extracted from them.
///
/// Once `max_episodes` is reached the oldest turn is dropped. Fact
/// extraction is off until [`EmbeddingMemory::with_fact_extraction`].
pub struct EmbeddingMemory {
    embedder: Arc<dyn Embedder>,
    episodes: RwLock<VecDeque<Episode>>,
    max_episodes: usize,
    extractor: Option<FactExtractor>,
    facts: RwLock<VecDeque<Fact>>,
    stored_turns: AtomicUsize,
}

impl EmbeddingMemory {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self::with_capacity(embedder, DEFAULT_MAX_EPISODES)
    }

    pub fn with_capacity(embedder: Arc<dyn Embedder>, max_episodes: usize) -> Self {
        Self {
            embedder,
            episodes: RwLock::new(VecDeque::new()),
            max_episodes: max_episodes.max(1),
            extractor: None,
            facts: RwLock::new(VecDeque::new()),
            stored_turns: AtomicUsize::new(0),
        }
    }

    /// Extracts facts with `generator` from every `interval`-th stored turn.
    pub fn with_fact_extraction(mut self, generator: Arc<dyn Generator>, interval: usize) -> Self {
        self.extractor = Some(FactExtractor {
            generator,
            interval: interval.max(1),
        });
        self
    }

    pub async fn fact_count(&self) -> usize {
        self.facts.read().await.len()
    }

    async fn extract_facts(
        &self,
        extractor: &FactExtractor,
        turn: &ConversationTurn,
    ) -> Result<usize, String> {
        let prompt = prompts::render(
            prompts::FACT_EXTRACTION,
            context! { conversation => turn.as_text() },
        )
        .map_err(|e| e.to_string())?;
        let answer = extractor
            .generator
            .generate(&[ChatMessage::user(prompt)], EXTRACTION_CONFIG)
            .await
            .map_err(|e| format!("fact extraction failed: {}", e))?;

        let extracted = parse_facts(&answer);
        let count = extracted.len();
        let mut facts = self.facts.write().await;
        facts.extend(extracted);
        while facts.len() > DEFAULT_MAX_FACTS {
            facts.pop_front();
        }
        tracing::debug!(session_id = %turn.session_id, count, "Facts extracted");
        Ok(count)
    }

    pub async fn len(&self) -> usize {
        self.episodes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.episodes.read().await.is_empty()
    }
}

#[async_trait]
impl ConversationMemory for EmbeddingMemory {
    async fn store_turn(&self, turn: ConversationTurn) -> Result<(), String> {
        let vector = self
            .embedder
            .embed(&turn.as_text())
            .await
            .ok_or_else(|| "failed to embed conversation turn".to_string())?;

        let stored = self.stored_turns.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(extractor) = &self.extractor {
            if stored % extractor.interval == 0 {
                if let Err(e) = self.extract_facts(extractor, &turn).await {
                    tracing::warn!("{}", e);
                }
            }
        }

        let mut episodes = self.episodes.write().await;
        episodes.push_back(Episode { turn, vector });
        while episodes.len() > self.max_episodes {
            episodes.pop_front();
        }
        Ok(())
    }

    /// Medium and high confidence facts whose entities occur in `query`,
    /// most confident first, newest first within a level.
    async fn facts(&self, query: &str, limit: usize) -> Result<Vec<String>, String> {
        let facts = self.facts.read().await;
        let mut relevant: Vec<&Fact> = facts
            .iter()
            .rev()
            .filter(|fact| fact.confidence >= FactConfidence::Medium && fact.mentioned_in(query))
            .collect();
        relevant.sort_by(|a, b| b.confidence.cmp(&a.confidence));
        Ok(relevant
            .into_iter()
            .take(limit)
            .map(Fact::as_context_line)
            .collect())
    }

    async fn recall(&self, query: &str, limit: usize) -> Result<Vec<RecalledEpisode>, String> {
        let query_vector = self
            .embedder
            .embed(query)
            .await
            .ok_or_else(|| "failed to embed recall query".to_string())?;

        let episodes = self.episodes.read().await;
        let mut recalled: Vec<RecalledEpisode> = episodes
            .iter()
            .map(|episode| RecalledEpisode {
                turn: episode.turn.clone(),
                similarity: self.embedder.similarity(&query_vector, &episode.vector),
            })
            .collect();
        recalled.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        recalled.truncate(limit);
        Ok(recalled)
    }
}
