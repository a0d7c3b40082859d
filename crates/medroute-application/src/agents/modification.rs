//! Deterministic handling of requests that change the data in view.

use super::{AgentOutcome, LookupAgent};
use super::lookup::hits_to_items;
use crate::session::SessionStore;
use medroute_core::classify::{ModificationClassifier, ModificationType};
use medroute_core::error::Result;
use medroute_core::session::{DataItem, SNOMED_CODE, render};
use std::collections::BTreeSet;
use std::sync::Arc;

const MODIFY_HELP: &str = "\n\nTell me what to change, for example:\n\
- \"remove I10\" or \"remove the SNOMED codes\"\n\
- \"add SNOMED codes for these\"\n\
- \"only show ICD codes\"\n\
- \"show as table\" or \"format as json\"";

/// Applies add/remove/format/filter requests to a session.
///
/// Removal and rendering act on the store directly; an add request searches
/// first (no lock held) and returns the hits as items for the caller to upsert.
pub struct ModificationHandler {
    classifier: ModificationClassifier,
    store: Arc<SessionStore>,
    icd: Arc<LookupAgent>,
    snomed: Arc<LookupAgent>,
}

impl ModificationHandler {
    pub fn new(store: Arc<SessionStore>, icd: Arc<LookupAgent>, snomed: Arc<LookupAgent>) -> Self {
        Self {
            classifier: ModificationClassifier::new(),
            store,
            icd,
            snomed,
        }
    }

    pub async fn handle(&self, session_id: &str, query: &str) -> Result<AgentOutcome> {
        let kind = self.classifier.detect_type(query);
        let data_types = self.classifier.extract_data_types(query);
        tracing::debug!(session_id, kind = %kind, ?data_types, "Handling modification");

        match kind {
            ModificationType::Remove => Ok(AgentOutcome::text(
                self.remove(session_id, query, &data_types).await,
            )),
            ModificationType::Format => Ok(AgentOutcome::text(self.format(session_id, query).await)),
            ModificationType::Filter => Ok(AgentOutcome::text(
                self.filter(session_id, &data_types).await,
            )),
            ModificationType::Add => self.add(query, &data_types).await,
            ModificationType::Modify => Ok(AgentOutcome::text(format!(
                "{}{}",
                self.store.summarize(session_id).await,
                MODIFY_HELP
            ))),
        }
    }

    /// Removes code-shaped tokens named in the query, or else every item of
    /// the requested types.
    async fn remove(&self, session_id: &str, query: &str, data_types: &BTreeSet<String>) -> String {
        if !self.store.has_data(session_id).await {
            return "No data in current session to remove.".to_string();
        }

        let mut removed = Vec::new();
        for code in self.classifier.extract_codes(query) {
            if self.store.remove_item(session_id, &code).await {
                removed.push(code);
            }
        }

        if removed.is_empty() && !data_types.is_empty() {
            for item in self.store.items(session_id).await {
                if data_types.contains(&item.item_type)
                    && self.store.remove_item(session_id, &item.key).await
                {
                    removed.push(format!("{} ({})", item.key, item.item_type));
                }
            }
        }

        if removed.is_empty() {
            return "No items were removed. Please specify codes or data types to remove.".to_string();
        }
        format!(
            "Removed {} item(s): {}\n\n{}",
            removed.len(),
            removed.join(", "),
            self.store.summarize(session_id).await
        )
    }

    async fn format(&self, session_id: &str, query: &str) -> String {
        let lower = query.to_lowercase();
        if lower.contains("json") {
            let json = self
                .store
                .to_json(session_id)
                .await
                .unwrap_or_else(|| "{}".to_string());
            format!("**Data as JSON:**\n```json\n{}\n```", json)
        } else if lower.contains("summary") || lower.contains("summarize") {
            self.store.summarize(session_id).await
        } else {
            format!("**Data as Table:**\n\n{}", self.store.to_table(session_id).await)
        }
    }

    async fn filter(&self, session_id: &str, data_types: &BTreeSet<String>) -> String {
        let items: Vec<DataItem> = self
            .store
            .items(session_id)
            .await
            .into_iter()
            .filter(|item| data_types.is_empty() || data_types.contains(&item.item_type))
            .collect();

        if items.is_empty() {
            let wanted: Vec<String> = data_types.iter().map(|t| t.replace('_', " ")).collect();
            return format!("No {} items found in session.", wanted.join(" or "));
        }
        format!("**Filtered Data:**\n\n{}", render::table_of(&items))
    }

    /// Searches the index matching the requested types (SNOMED when asked
    /// for, ICD otherwise).
    async fn add(&self, query: &str, data_types: &BTreeSet<String>) -> Result<AgentOutcome> {
        let agent = if data_types.contains(SNOMED_CODE) {
            &self.snomed
        } else {
            &self.icd
        };
        let vocabulary = agent.vocabulary();
        let hits = agent.search(query).await?;
        let items = hits_to_items(&hits, vocabulary.item_type(), query);

        if items.is_empty() {
            return Ok(AgentOutcome::text(format!(
                "No matching {} codes found to add.",
                vocabulary.display_name()
            )));
        }

        let keys: Vec<&str> = items.iter().map(|item| item.key.as_str()).collect();
        let response = format!(
            "Added {} {} item(s): {}\n\n{}",
            items.len(),
            vocabulary.display_name(),
            keys.join(", "),
            render::table_of(&items)
        );
        Ok(AgentOutcome { response, items })
    }
}
