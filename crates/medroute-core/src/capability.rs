//! External capabilities the engine depends on.
//!
//! The engine never talks to a language model, a search index or an embedding
//! service directly. It goes through these traits, which keeps routing and
//! session logic testable with in-process fakes.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Role of a chat message sent to the generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A single message in a generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Sampling parameters for one generation call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl GenerationConfig {
    pub const fn new(max_tokens: u32, temperature: f32) -> Self {
        Self {
            max_tokens,
            temperature,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self::new(1000, 0.3)
    }
}

/// Failure kinds reported by a generator.
///
/// Only `RateLimited` is worth retrying; the retry policy keys off this.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GenerationError {
    #[error("rate limited: {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl GenerationError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Server-suggested wait before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Text generation (chat completion).
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        config: GenerationConfig,
    ) -> std::result::Result<String, GenerationError>;
}

/// One ranked hit from the search backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Index fields (`CODE`, `STR`, `SAB`, optional `OHDSI`, `id`, ...).
    pub document: HashMap<String, String>,
    pub score: f64,
}

impl SearchHit {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.document.get(name).map(String::as_str)
    }

    pub fn code(&self) -> Option<&str> {
        self.field("CODE")
    }

    pub fn label(&self) -> Option<&str> {
        self.field("STR")
    }
}

/// Hybrid (keyword + vector) search over an external index.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn search(&self, index: &str, query: &str, top_k: usize) -> Result<Vec<SearchHit>>;
}

/// Embedding generation.
///
/// `embed` returns `None` on failure; callers are expected to fail open.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Option<Vec<f32>>;

    /// Cosine similarity mapped into `[0, 1]`.
    fn similarity(&self, a: &[f32], b: &[f32]) -> f64 {
        cosine_similarity(a, b)
    }
}

/// Cosine similarity clamped to `[0, 1]`.
///
/// Mismatched lengths and zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(0.0, 1.0)
}
