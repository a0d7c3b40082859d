//! Retrieval-augmented code lookup against one index.

use super::AgentOutcome;
use crate::prompts;
use medroute_core::capability::{ChatMessage, GenerationConfig, Generator, Retriever, SearchHit};
use medroute_core::error::{MedrouteError, Result};
use medroute_core::session::{DataItem, ICD_CODE, Metadata, SNOMED_CODE};
use medroute_core::text::{normalize_citations, strip_tags};
use minijinja::context;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

const ANSWER_CONFIG: GenerationConfig = GenerationConfig::new(1000, 0.3);

/// Code system served by a [`LookupAgent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vocabulary {
    Icd,
    Snomed,
}

impl Vocabulary {
    /// Item type of the data items produced from hits.
    pub fn item_type(self) -> &'static str {
        match self {
            Self::Icd => ICD_CODE,
            Self::Snomed => SNOMED_CODE,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Icd => "ICD-10",
            Self::Snomed => "SNOMED CT",
        }
    }

    /// Agent name recorded with conversation turns.
    pub fn agent_name(self) -> &'static str {
        match self {
            Self::Icd => "icd",
            Self::Snomed => "snomed",
        }
    }
}

/// Searches one index, answers from the hits and turns them into session items.
pub struct LookupAgent {
    vocabulary: Vocabulary,
    index: String,
    retriever: Arc<dyn Retriever>,
    generator: Arc<dyn Generator>,
    top_k: usize,
    search_timeout: Duration,
}

impl LookupAgent {
    pub fn new(
        vocabulary: Vocabulary,
        index: impl Into<String>,
        retriever: Arc<dyn Retriever>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            vocabulary,
            index: index.into(),
            retriever,
            generator,
            top_k: 20,
            search_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_search_timeout(mut self, timeout: Duration) -> Self {
        self.search_timeout = timeout;
        self
    }

    pub fn vocabulary(&self) -> Vocabulary {
        self.vocabulary
    }

    /// Raw hits for `query`, bounded by the search timeout.
    pub async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let hits = tokio::time::timeout(
            self.search_timeout,
            self.retriever.search(&self.index, query, self.top_k),
        )
        .await
        .map_err(|_| MedrouteError::timeout("search", self.search_timeout))??;

        tracing::debug!(index = %self.index, hits = hits.len(), "Lookup search finished");
        Ok(hits)
    }

    /// Answers `query` from a fresh search. `context` is optional conversation context.
    pub async fn run(&self, query: &str, context: &str) -> Result<AgentOutcome> {
        let hits = self.search(query).await?;
        if hits.is_empty() {
            return Ok(AgentOutcome::text(format!(
                "No matching {} codes found for \"{}\".",
                self.vocabulary.display_name(),
                query
            )));
        }

        let results: Vec<Value> = hits
            .iter()
            .map(|hit| {
                json!({
                    "code": hit.code().unwrap_or("N/A"),
                    "label": hit.label().unwrap_or(""),
                    "sab": hit.field("SAB").unwrap_or(""),
                })
            })
            .collect();

        let messages = vec![
            ChatMessage::system(prompts::render(
                prompts::LOOKUP_SYSTEM,
                context! { vocabulary => self.vocabulary.display_name() },
            )?),
            ChatMessage::user(prompts::render(
                prompts::LOOKUP_USER,
                context! { query, context, results },
            )?),
        ];
        let answer = self.generator.generate(&messages, ANSWER_CONFIG).await?;

        let codes: Vec<String> = hits
            .iter()
            .map(|hit| hit.code().unwrap_or("N/A").to_string())
            .collect();
        let response = strip_tags(&normalize_citations(&answer, &codes));

        Ok(AgentOutcome {
            response,
            items: hits_to_items(&hits, self.vocabulary.item_type(), query),
        })
    }
}

/// Converts hits into session items keyed by `CODE`.
///
/// Hits without a code are skipped. Metadata carries the score, the
/// document id and every document field under `full_document`.
pub fn hits_to_items(hits: &[SearchHit], item_type: &str, query: &str) -> Vec<DataItem> {
    hits.iter()
        .filter_map(|hit| {
            let code = hit.code()?;
            let full_document: serde_json::Map<String, Value> = hit
                .document
                .iter()
                .map(|(field, value)| (field.clone(), Value::String(value.clone())))
                .collect();

            let mut metadata = Metadata::new();
            metadata.insert("score".to_string(), json!(hit.score));
            metadata.insert(
                "document_id".to_string(),
                json!(hit.field("id").unwrap_or(code)),
            );
            metadata.insert("full_document".to_string(), Value::Object(full_document));

            Some(
                DataItem::new(item_type, code, hit.label().unwrap_or_default())
                    .with_metadata(metadata)
                    .with_source_query(query),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeRetriever, ScriptedGenerator, hit};

    #[tokio::test]
    async fn test_run_normalizes_citations_and_builds_items() {
        let retriever = Arc::new(FakeRetriever::new().with_hits(
            "icd",
            vec![
                hit("I10", "Essential (primary) hypertension", 0.91),
                hit("I15.0", "Renovascular hypertension", 0.72),
            ],
        ));
        let generator = Arc::new(ScriptedGenerator::constant(
            "<b>Primary</b> hypertension is coded as [1]; renovascular as [2].",
        ));
        let agent = LookupAgent::new(Vocabulary::Icd, "icd", retriever.clone(), generator.clone());

        let outcome = agent.run("hypertension codes", "").await.unwrap();

        assert_eq!(
            outcome.response,
            "Primary hypertension is coded as [I10]; renovascular as [I15.0]."
        );
        assert_eq!(outcome.items.len(), 2);
        let first = &outcome.items[0];
        assert_eq!(first.item_type, ICD_CODE);
        assert_eq!(first.key, "I10");
        assert_eq!(first.metadata["score"], 0.91);
        assert_eq!(first.metadata["document_id"], "doc-I10");
        assert_eq!(first.document_field("SAB"), Some("ICD10CM"));
        assert_eq!(first.source_query.as_deref(), Some("hypertension codes"));

        let prompt = &generator.calls.lock().unwrap()[0].0[1].content;
        assert!(prompt.contains("[2] I15.0: Renovascular hypertension"));
        assert_eq!(retriever.queries(), vec![("icd".to_string(), "hypertension codes".to_string())]);
    }

    #[tokio::test]
    async fn test_no_hits_skips_generation() {
        let generator = Arc::new(ScriptedGenerator::constant("unused"));
        let agent = LookupAgent::new(
            Vocabulary::Snomed,
            "snomed",
            Arc::new(FakeRetriever::new()),
            generator.clone(),
        );

        let outcome = agent.run("zzz", "").await.unwrap();

        assert!(outcome.response.starts_with("No matching SNOMED CT codes found"));
        assert!(outcome.items.is_empty());
        assert_eq!(generator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_search_failure_is_retrieval_error() {
        let agent = LookupAgent::new(
            Vocabulary::Icd,
            "icd",
            Arc::new(FakeRetriever::failing("index offline")),
            Arc::new(ScriptedGenerator::constant("unused")),
        );

        let err = agent.run("I10", "").await.unwrap_err();
        assert!(err.is_retrieval());
        assert_eq!(err.user_message(), "Search failed: index offline");
    }
}
