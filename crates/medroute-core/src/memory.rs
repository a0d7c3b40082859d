//! Long-term conversation memory.
//!
//! Past turns are stored asynchronously after a response is produced and
//! recalled by similarity when building context for later questions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One stored question/answer pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub session_id: String,
    pub query: String,
    pub response: String,
    /// Processing path that answered (`icd`, `snomed`, `chat`, ...)
    pub agent: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(
        session_id: impl Into<String>,
        query: impl Into<String>,
        response: impl Into<String>,
        agent: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            query: query.into(),
            response: response.into(),
            agent: agent.into(),
            timestamp: Utc::now(),
        }
    }

    /// Text form used for embedding and for context sections.
    pub fn as_text(&self) -> String {
        format!("User: {}\nAssistant: {}", self.query, self.response)
    }
}

/// How sure the extractor was about a fact.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FactConfidence {
    #[default]
    Low,
    Medium,
    High,
}

/// A durable fact extracted from conversation turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    /// `user_preference`, `domain_knowledge`, `context` or `reference`
    #[serde(default)]
    pub fact_type: String,
    pub content: String,
    #[serde(default)]
    pub confidence: FactConfidence,
    /// Codes, conditions and other entities the fact mentions
    #[serde(default)]
    pub entities: Vec<String>,
}

impl Fact {
    /// True when one of the fact's entities occurs in `query`.
    pub fn mentioned_in(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.entities
            .iter()
            .map(|entity| entity.trim().to_lowercase())
            .any(|entity| entity.chars().count() >= 2 && query.contains(&entity))
    }

    /// `[fact_type] content (confidence: level)`
    pub fn as_context_line(&self) -> String {
        format!("[{}] {} (confidence: {})", self.fact_type, self.content, self.confidence)
    }
}

/// Parses generator output holding a JSON array of facts.
///
/// Text around the outermost brackets (such as a code fence) is ignored.
/// Anything else that does not parse yields no facts.
pub fn parse_facts(text: &str) -> Vec<Fact> {
    let (Some(start), Some(end)) = (text.find('['), text.rfind(']')) else {
        return Vec::new();
    };
    if end < start {
        return Vec::new();
    }
    serde_json::from_str::<Vec<Fact>>(&text[start..=end])
        .map(|facts| {
            facts
                .into_iter()
                .filter(|fact| !fact.content.trim().is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// A recalled turn and its similarity to the current query.
#[derive(Debug, Clone, PartialEq)]
pub struct RecalledEpisode {
    pub turn: ConversationTurn,
    pub similarity: f64,
}

/// Store for past turns and durable facts.
#[async_trait]
pub trait ConversationMemory: Send + Sync {
    async fn store_turn(&self, turn: ConversationTurn) -> Result<(), String>;

    /// Most similar past turns, best first.
    async fn recall(&self, query: &str, limit: usize) -> Result<Vec<RecalledEpisode>, String>;

    /// Durable facts relevant to `query`. None by default.
    async fn facts(&self, _query: &str, _limit: usize) -> Result<Vec<String>, String> {
        Ok(vec![])
    }
}

/// A no-op implementation for when no long-term memory is configured.
pub struct NoOpMemory;

#[async_trait]
impl ConversationMemory for NoOpMemory {
    async fn store_turn(&self, _turn: ConversationTurn) -> Result<(), String> {
        Ok(())
    }

    async fn recall(&self, _query: &str, _limit: usize) -> Result<Vec<RecalledEpisode>, String> {
        Ok(vec![])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_facts_from_fenced_array() {
        let text = r#"```json
[
  {"fact_type": "domain_knowledge", "content": "Hypertension is coded as I10", "confidence": "high", "entities": ["I10", "hypertension"]},
  {"fact_type": "context", "content": "  ", "confidence": "low", "entities": []},
  {"content": "User works on cardiology concept sets"}
]
```"#;

        let facts = parse_facts(text);

        assert_eq!(facts.len(), 2);
        assert_eq!(facts[0].confidence, FactConfidence::High);
        assert_eq!(facts[1].confidence, FactConfidence::Low);
        assert!(facts[0].mentioned_in("what about I10?"));
        assert!(!facts[1].mentioned_in("what about I10?"));
        assert_eq!(
            facts[0].as_context_line(),
            "[domain_knowledge] Hypertension is coded as I10 (confidence: high)"
        );
    }

    #[test]
    fn test_parse_facts_rejects_non_arrays() {
        assert!(parse_facts("no facts here").is_empty());
        assert!(parse_facts("] backwards [").is_empty());
        assert!(parse_facts("[not json]").is_empty());
    }
}
