//! Processing paths the orchestrator dispatches to.
//!
//! Agents never touch the session lock: they take snapshots as input and
//! return the items to upsert, so network calls run unlocked.

pub mod chat;
pub mod concept_set;
pub mod lookup;
pub mod modification;
pub mod relationship;

pub use chat::ChatAgent;
pub use concept_set::ConceptSetWorkflow;
pub use lookup::{LookupAgent, Vocabulary};
pub use modification::ModificationHandler;
pub use relationship::RelationshipAgent;

use medroute_core::session::DataItem;

/// Response text plus the structured data it produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentOutcome {
    pub response: String,
    pub items: Vec<DataItem>,
}

impl AgentOutcome {
    pub fn text(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            items: Vec::new(),
        }
    }
}
