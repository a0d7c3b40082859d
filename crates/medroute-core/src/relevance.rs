//! Relevance filtering of session data against a new query.

use crate::capability::Embedder;
use crate::session::{DataItem, render};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;

/// Default similarity threshold.
pub const DEFAULT_THRESHOLD: f64 = 0.3;

const DEFAULT_EMBED_TIMEOUT: Duration = Duration::from_secs(15);

/// Item embeddings in flight at once.
const MAX_CONCURRENT_EMBEDS: usize = 8;

/// An item together with its similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredItem {
    pub item: DataItem,
    pub score: f64,
}

/// Ranks session items by embedding similarity to a query.
///
/// Fails open: when the query cannot be embedded every item is returned in
/// its original order. An item that cannot be embedded is kept after the
/// ranked ones.
#[derive(Clone)]
pub struct RelevanceFilter {
    embedder: Arc<dyn Embedder>,
    threshold: f64,
    embed_timeout: Duration,
}

impl RelevanceFilter {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            threshold: DEFAULT_THRESHOLD,
            embed_timeout: DEFAULT_EMBED_TIMEOUT,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_embed_timeout(mut self, timeout: Duration) -> Self {
        self.embed_timeout = timeout;
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Filters with the configured threshold.
    pub async fn filter_default(&self, items: Vec<DataItem>, query: Option<&str>) -> Vec<DataItem> {
        self.filter(items, query, self.threshold).await
    }

    /// Items scoring at least `threshold`, best first.
    ///
    /// `query = None` asks for the full, unfiltered set.
    pub async fn filter(
        &self,
        items: Vec<DataItem>,
        query: Option<&str>,
        threshold: f64,
    ) -> Vec<DataItem> {
        let query = match query {
            Some(q) if !q.trim().is_empty() => q,
            _ => return items,
        };
        if items.is_empty() {
            return items;
        }

        let Some(query_vector) = self.embed(query).await else {
            tracing::warn!(
                item_count = items.len(),
                "Query embedding failed, returning session data unfiltered"
            );
            return items;
        };

        let texts: Vec<String> = items.iter().map(render::relevance_text).collect();
        let vectors: Vec<Option<Vec<f32>>> = stream::iter(texts.iter())
            .map(|text| self.embed(text))
            .buffered(MAX_CONCURRENT_EMBEDS)
            .collect()
            .await;

        let mut scored = Vec::new();
        let mut unscored = Vec::new();
        for (item, vector) in items.into_iter().zip(vectors) {
            match vector {
                Some(vector) => {
                    let score = self.embedder.similarity(&query_vector, &vector);
                    if score >= threshold {
                        scored.push(ScoredItem { item, score });
                    }
                }
                // Unscored items stay in the result, after the ranked ones.
                None => unscored.push(item),
            }
        }

        if !unscored.is_empty() {
            tracing::warn!(
                count = unscored.len(),
                "Item embeddings failed, keeping those items unranked"
            );
        }

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        tracing::debug!(kept = scored.len(), threshold, "Relevance filter applied");

        scored
            .into_iter()
            .map(|s| s.item)
            .chain(unscored)
            .collect()
    }

    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        match tokio::time::timeout(self.embed_timeout, self.embedder.embed(text)).await {
            Ok(vector) => vector,
            Err(_) => {
                tracing::warn!(timeout = ?self.embed_timeout, "Embedding call timed out");
                None
            }
        }
    }
}
