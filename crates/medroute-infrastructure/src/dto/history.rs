//! Conversation history DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use version_migrate::{FromDomain, IntoDomain, Versioned};

use medroute_core::session::{ConversationRecord, HistoryMessage};

/// Conversation history record V1.0.0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Versioned)]
#[versioned(version = "1.0.0")]
pub struct ConversationV1_0_0 {
    pub session_id: String,
    #[serde(default)]
    pub messages: Vec<HistoryMessage>,
    pub saved_at: DateTime<Utc>,
}

impl IntoDomain<ConversationRecord> for ConversationV1_0_0 {
    fn into_domain(self) -> ConversationRecord {
        ConversationRecord {
            session_id: self.session_id,
            messages: self.messages,
            saved_at: self.saved_at,
        }
    }
}

impl FromDomain<ConversationRecord> for ConversationV1_0_0 {
    fn from_domain(record: ConversationRecord) -> Self {
        ConversationV1_0_0 {
            session_id: record.session_id,
            messages: record.messages,
            saved_at: record.saved_at,
        }
    }
}

/// Creates a Migrator for conversation history records.
pub fn create_history_migrator() -> version_migrate::Migrator {
    let mut migrator = version_migrate::Migrator::builder().build();
    let path = version_migrate::Migrator::define("conversation")
        .from::<ConversationV1_0_0>()
        .into_with_save::<ConversationRecord>();
    migrator
        .register(path)
        .expect("Failed to register conversation migration path");
    migrator
}
