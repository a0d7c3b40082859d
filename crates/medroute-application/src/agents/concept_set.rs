//! Concept-set creation and follow-up modification.

use super::AgentOutcome;
use crate::prompts;
use medroute_core::capability::{ChatMessage, GenerationConfig, Generator, Retriever, SearchHit};
use medroute_core::concept_set::{
    ConceptSetEntry, ConceptSetRegistry, TargetResolution, clarification_message,
};
use medroute_core::error::{MedrouteError, Result};
use medroute_core::text::{clean_html, strip_tags};
use minijinja::context;
use std::sync::Arc;
use std::time::Duration;

const CLASSIFY_CONFIG: GenerationConfig = GenerationConfig::new(5, 0.0);
const SUBJECT_CONFIG: GenerationConfig = GenerationConfig::new(20, 0.0);
const EXPAND_CONFIG: GenerationConfig = GenerationConfig::new(150, 0.3);
const FORMAT_CONFIG: GenerationConfig = GenerationConfig::new(4000, 0.3);
const MODIFY_CONFIG: GenerationConfig = GenerationConfig::new(8000, 0.3);

const RAW_HEADER: &str = "Here are the extracted ICD concepts for the concept set:";

/// Builds named concept sets from a search and rewrites them on follow-ups.
///
/// Follow-ups always start from the stored raw records, never from the last
/// rendered table.
pub struct ConceptSetWorkflow {
    generator: Arc<dyn Generator>,
    retriever: Arc<dyn Retriever>,
    registry: Arc<ConceptSetRegistry>,
    index: String,
    top_k: usize,
    search_timeout: Duration,
}

impl ConceptSetWorkflow {
    pub fn new(
        generator: Arc<dyn Generator>,
        retriever: Arc<dyn Retriever>,
        registry: Arc<ConceptSetRegistry>,
        index: impl Into<String>,
    ) -> Self {
        Self {
            generator,
            retriever,
            registry,
            index: index.into(),
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

    pub fn registry(&self) -> &Arc<ConceptSetRegistry> {
        &self.registry
    }

    /// Asks the generator whether `query` requests a concept set.
    ///
    /// Any failure counts as "no".
    pub async fn is_creation_request(&self, query: &str) -> bool {
        let prompt = match prompts::render(prompts::CONCEPT_SET_CLASSIFY, context! { query }) {
            Ok(prompt) => prompt,
            Err(e) => {
                tracing::warn!("Concept set classification prompt failed: {}", e);
                return false;
            }
        };
        match self
            .generator
            .generate(&[ChatMessage::user(prompt)], CLASSIFY_CONFIG)
            .await
        {
            Ok(answer) => {
                let is_request = answer.to_lowercase().contains("true");
                tracing::debug!(is_request, "Concept set classification");
                is_request
            }
            Err(e) => {
                tracing::warn!("Concept set classification failed: {}", e);
                false
            }
        }
    }

    /// Searches for the subject of `query`, formats the result and stores it
    /// as a new concept set for `session_id`.
    pub async fn create(&self, session_id: &str, query: &str) -> Result<AgentOutcome> {
        let (search_query, name) = self.expand_query(query).await;
        tracing::info!(session_id, name = %name, "Building concept set");

        let hits = tokio::time::timeout(
            self.search_timeout,
            self.retriever.search(&self.index, &search_query, self.top_k),
        )
        .await
        .map_err(|_| MedrouteError::timeout("search", self.search_timeout))??;

        if hits.is_empty() {
            return Ok(AgentOutcome::text(format!(
                "No ICD codes found for '{}'. Could you try a different condition or be more specific?",
                name
            )));
        }

        let raw_data = raw_records(&hits);
        let prompt = prompts::render(
            prompts::CONCEPT_SET_FORMAT,
            context! { name => &name, raw_data => &raw_data },
        )?;
        let formatted = strip_tags(
            &self
                .generator
                .generate(&[ChatMessage::user(prompt)], FORMAT_CONFIG)
                .await?,
        );

        self.registry
            .store(
                session_id,
                ConceptSetEntry::new(&name, raw_data, formatted.clone(), query),
            )
            .await;
        Ok(AgentOutcome::text(formatted))
    }

    /// Applies `query` to the concept set it refers to.
    ///
    /// When several sets could be meant, the reply lists them and asks which
    /// one; nothing is changed.
    pub async fn handle_followup(&self, session_id: &str, query: &str) -> Result<String> {
        let entry = match self.registry.resolve(session_id, query).await {
            TargetResolution::Resolved(entry) => entry,
            TargetResolution::Ambiguous(names) => {
                tracing::info!(session_id, candidates = names.len(), "Concept set follow-up is ambiguous");
                return Ok(clarification_message(&names));
            }
            TargetResolution::Empty => {
                return Ok("There are no concept sets in this conversation yet.".to_string());
            }
        };

        tracing::info!(session_id, name = %entry.name, "Modifying concept set");
        let prompt = prompts::render(
            prompts::CONCEPT_SET_MODIFY,
            context! {
                name => &entry.name,
                raw_data => &entry.raw_data,
                instruction => query,
            },
        )?;
        let table = strip_tags(
            &self
                .generator
                .generate(&[ChatMessage::user(prompt)], MODIFY_CONFIG)
                .await?,
        );

        self.registry
            .update_formatted(session_id, &entry.id, table.clone())
            .await;
        Ok(table)
    }

    /// Search query (terms joined by ` OR `) and the set's name (first term).
    ///
    /// Falls back to the raw query when extraction or expansion fails.
    async fn expand_query(&self, query: &str) -> (String, String) {
        let subject = match self
            .ask(prompts::CONCEPT_SET_SUBJECT, context! { query }, SUBJECT_CONFIG)
            .await
        {
            Some(subject) => subject.to_lowercase(),
            None => query.to_lowercase(),
        };

        let terms: Vec<String> = self
            .ask(prompts::CONCEPT_SET_EXPAND, context! { subject => &subject }, EXPAND_CONFIG)
            .await
            .map(|answer| parse_terms(&answer))
            .unwrap_or_default();

        if terms.is_empty() {
            return (subject.clone(), subject);
        }
        let name = terms[0].to_lowercase();
        (terms.join(" OR "), name)
    }

    async fn ask(&self, template: &str, ctx: minijinja::Value, config: GenerationConfig) -> Option<String> {
        let prompt = prompts::render(template, ctx).ok()?;
        match self.generator.generate(&[ChatMessage::user(prompt)], config).await {
            Ok(answer) if !answer.trim().is_empty() => Some(answer.trim().to_string()),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(template, "Concept set query expansion failed: {}", e);
                None
            }
        }
    }
}

/// One term per line, list markers and numbering stripped.
fn parse_terms(answer: &str) -> Vec<String> {
    answer
        .lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(|c: char| c.is_ascii_digit() || matches!(c, '-' | '*' | '.' | ')'))
                .trim()
                .to_string()
        })
        .filter(|term| !term.is_empty())
        .collect()
}

/// Raw records kept with a concept set, one line per hit.
fn raw_records(hits: &[SearchHit]) -> String {
    let mut lines = vec![RAW_HEADER.to_string()];
    for hit in hits {
        let mut line = format!(
            "Code: {}, Label: {}, Score: {:.4}",
            hit.code().unwrap_or("N/A"),
            hit.label().unwrap_or("N/A"),
            hit.score
        );
        if let Some(sab) = hit.field("SAB") {
            line.push_str(&format!(", SAB: {}", sab));
        }
        if let Some(ohdsi) = hit.field("OHDSI") {
            line.push_str(&format!(", OHDSI: {}", clean_html(ohdsi)));
        }
        lines.push(line);
    }
    lines.join("\n")
}
