//! Hierarchy, SNOMED CT mapping and general relationship lookups.

use super::AgentOutcome;
use crate::prompts;
use medroute_core::capability::{ChatMessage, GenerationConfig, Generator, Retriever, SearchHit};
use medroute_core::classify::RelationshipQuery;
use medroute_core::error::{MedrouteError, Result};
use medroute_core::relationship::{
    Hierarchy, Relationship, SnomedMapping, format_relationships, hierarchy_from_hits,
    parse_relationships, snomed_mappings_from_hits,
};
use medroute_core::session::{DataItem, Metadata, SNOMED_CODE};
use medroute_core::text::strip_tags;
use minijinja::context;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

pub const PARENT_CODE: &str = "parent_code";
pub const CHILD_CODE: &str = "child_code";
pub const RELATIONSHIP: &str = "relationship";

const ANSWER_CONFIG: GenerationConfig = GenerationConfig::new(1000, 0.3);
const HIERARCHY_TOP_K: usize = 10;
const MAPPING_TOP_K: usize = 5;
const GENERAL_TOP_K: usize = 15;

/// Answers relationship questions from the `REL` and `OHDSI` fields of the
/// ICD index.
pub struct RelationshipAgent {
    index: String,
    retriever: Arc<dyn Retriever>,
    generator: Arc<dyn Generator>,
    search_timeout: Duration,
}

impl RelationshipAgent {
    pub fn new(
        index: impl Into<String>,
        retriever: Arc<dyn Retriever>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            index: index.into(),
            retriever,
            generator,
            search_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_search_timeout(mut self, timeout: Duration) -> Self {
        self.search_timeout = timeout;
        self
    }

    pub async fn run(&self, query: &str, kind: RelationshipQuery) -> Result<AgentOutcome> {
        tracing::debug!(?kind, "Relationship lookup");
        match kind {
            RelationshipQuery::Hierarchy(code) => self.hierarchy(query, &code).await,
            RelationshipQuery::SnomedMapping(code) => self.snomed_mapping(query, &code).await,
            RelationshipQuery::General => self.general(query).await,
        }
    }

    async fn search(&self, text: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        tokio::time::timeout(
            self.search_timeout,
            self.retriever.search(&self.index, text, top_k),
        )
        .await
        .map_err(|_| MedrouteError::timeout("search", self.search_timeout))?
    }

    async fn hierarchy(&self, query: &str, code: &str) -> Result<AgentOutcome> {
        let hits = self.search(code, HIERARCHY_TOP_K).await?;
        let hierarchy = hierarchy_from_hits(code, &hits);
        if hierarchy.is_empty() {
            return Ok(AgentOutcome::text(format!(
                "No parent-child relationships found for code {}.",
                code
            )));
        }

        let response = self
            .answer(query, "ICD code hierarchies", "Hierarchy Data", &hierarchy.describe())
            .await?;
        Ok(AgentOutcome {
            response,
            items: hierarchy_items(&hierarchy, query),
        })
    }

    async fn snomed_mapping(&self, query: &str, code: &str) -> Result<AgentOutcome> {
        let hits = self.search(code, MAPPING_TOP_K).await?;
        let mappings = snomed_mappings_from_hits(code, &hits);
        if mappings.is_empty() {
            return Ok(AgentOutcome::text(format!(
                "No SNOMED mappings found for ICD code {}.",
                code
            )));
        }

        let data: String = mappings
            .iter()
            .map(|m| {
                format!(
                    "ICD Code: {} - {}\nSNOMED Code: {} - {}\nRelationship: {}\n",
                    m.icd_code, m.icd_label, m.snomed_code, m.snomed_label, m.relationship
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        let response = self
            .answer(query, "SNOMED CT and ICD code mappings", "SNOMED Mapping Data", &data)
            .await?;
        Ok(AgentOutcome {
            response,
            items: mapping_items(&mappings, query),
        })
    }

    async fn general(&self, query: &str) -> Result<AgentOutcome> {
        let hits = self.search(query, GENERAL_TOP_K).await?;
        let related: Vec<(&SearchHit, Vec<Relationship>)> = hits
            .iter()
            .filter_map(|hit| {
                let rels = parse_relationships(hit.field("REL")?);
                (!rels.is_empty()).then_some((hit, rels))
            })
            .collect();
        if related.is_empty() {
            return Ok(AgentOutcome::text("No relationship data found for your query."));
        }

        let data: String = related
            .iter()
            .map(|(hit, rels)| {
                format!(
                    "Code: {} - {}\n{}\n",
                    hit.code().unwrap_or("N/A"),
                    hit.label().unwrap_or_default(),
                    format_relationships(rels)
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        let response = self
            .answer(query, "medical code relationships", "Relationship Data", &data)
            .await?;

        let items = related
            .iter()
            .flat_map(|(hit, rels)| {
                let source_code = hit.code().unwrap_or_default().to_string();
                rels.iter()
                    .map(move |rel| relationship_item(RELATIONSHIP, rel, &source_code, query))
            })
            .collect();
        Ok(AgentOutcome { response, items })
    }

    async fn answer(&self, query: &str, topic: &str, heading: &str, data: &str) -> Result<String> {
        let messages = vec![
            ChatMessage::system(prompts::render(
                prompts::RELATIONSHIP_SYSTEM,
                context! { topic },
            )?),
            ChatMessage::user(prompts::render(
                prompts::RELATIONSHIP_USER,
                context! { query, heading, data },
            )?),
        ];
        let answer = self.generator.generate(&messages, ANSWER_CONFIG).await?;
        Ok(strip_tags(&answer))
    }
}

fn relationship_item(item_type: &str, rel: &Relationship, related_to: &str, query: &str) -> DataItem {
    let mut metadata = Metadata::new();
    metadata.insert("relationship".to_string(), json!(rel.kind));
    metadata.insert("source".to_string(), json!(rel.source));
    metadata.insert("related_to".to_string(), json!(related_to));
    if !rel.attribute.is_empty() {
        metadata.insert("attribute".to_string(), json!(rel.attribute));
    }
    DataItem::new(item_type, rel.code.as_str(), rel.label.as_str())
        .with_metadata(metadata)
        .with_source_query(query)
}

fn hierarchy_items(hierarchy: &Hierarchy, query: &str) -> Vec<DataItem> {
    let parents = hierarchy
        .parents
        .iter()
        .map(|rel| relationship_item(PARENT_CODE, rel, &hierarchy.query_code, query));
    let children = hierarchy
        .children
        .iter()
        .map(|rel| relationship_item(CHILD_CODE, rel, &hierarchy.query_code, query));
    parents.chain(children).collect()
}

fn mapping_items(mappings: &[SnomedMapping], query: &str) -> Vec<DataItem> {
    mappings
        .iter()
        .filter(|m| !m.snomed_code.is_empty())
        .map(|m| {
            let mut metadata = Metadata::new();
            metadata.insert("mapped_from".to_string(), json!(m.icd_code));
            metadata.insert("relationship".to_string(), json!(m.relationship));
            metadata.insert("origin".to_string(), json!(m.origin));
            DataItem::new(SNOMED_CODE, m.snomed_code.as_str(), m.snomed_label.as_str())
                .with_metadata(metadata)
                .with_source_query(query)
        })
        .collect()
}
