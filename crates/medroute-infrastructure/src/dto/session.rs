//! Session record DTOs and migrations

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use version_migrate::{FromDomain, IntoDomain, MigratesTo, Versioned};

use medroute_core::session::{
    DataItem, Metadata, ModificationAction, ModificationRecord, SessionContext,
};

// ============================================================================
// V1.0.0: loosely typed records
// ============================================================================

/// Legacy data item: string timestamps, `type` accepted as an alias of `item_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataItemV1_0_0 {
    #[serde(alias = "type")]
    pub item_type: String,
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub added_at: Option<String>,
    #[serde(default)]
    pub source_query: Option<String>,
}

/// Represents V1.0.0 of the session record.
///
/// Items are a map keyed by code, timestamps are ISO 8601 strings (with or
/// without offset) and the audit log is free-form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Versioned)]
#[versioned(version = "1.0.0")]
pub struct SessionV1_0_0 {
    pub session_id: String,
    #[serde(default)]
    pub current_data: BTreeMap<String, DataItemV1_0_0>,
    #[serde(default)]
    pub query_history: Vec<String>,
    #[serde(default)]
    pub modifications: Vec<Value>,
    #[serde(default)]
    pub created_at: Option<String>,
}

// ============================================================================
// V2.0.0: typed records
// ============================================================================

/// Represents V2.0.0 of the session record.
///
/// Items are an ordered list (insertion order is display order), timestamps
/// are typed and `updated_at` drives retention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Versioned)]
#[versioned(version = "2.0.0")]
pub struct SessionV2_0_0 {
    pub session_id: String,
    #[serde(default)]
    pub items: Vec<DataItem>,
    #[serde(default)]
    pub query_history: Vec<String>,
    #[serde(default)]
    pub modifications: Vec<ModificationRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parses RFC 3339, or a naive ISO timestamp taken as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn migrate_modification(raw: &Value) -> Option<ModificationRecord> {
    let action = match raw.get("action")?.as_str()? {
        "add" => ModificationAction::Add,
        "remove" => ModificationAction::Remove,
        "clear_all" | "clear" => ModificationAction::ClearAll,
        _ => return None,
    };
    let text = |field: &str| raw.get(field).and_then(Value::as_str).map(str::to_string);

    Some(ModificationRecord {
        action,
        item_type: text("item_type").or_else(|| text("type")),
        key: text("key"),
        timestamp: text("timestamp")
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
    })
}

/// Migration from V1.0.0 to V2.0.0.
///
/// Items are re-keyed by their own `key`; unparseable timestamps fall back to
/// the session creation time; unknown audit actions are dropped.
impl MigratesTo<SessionV2_0_0> for SessionV1_0_0 {
    fn migrate(self) -> SessionV2_0_0 {
        let created_at = self
            .created_at
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        let mut items: Vec<DataItem> = self
            .current_data
            .into_values()
            .map(|legacy| DataItem {
                item_type: legacy.item_type,
                key: legacy.key,
                value: legacy.value,
                metadata: match legacy.metadata {
                    Value::Object(map) => map,
                    _ => Metadata::new(),
                },
                added_at: legacy
                    .added_at
                    .as_deref()
                    .and_then(parse_timestamp)
                    .unwrap_or(created_at),
                source_query: legacy.source_query,
            })
            .collect();
        items.sort_by(|a, b| a.added_at.cmp(&b.added_at));

        let modifications: Vec<ModificationRecord> = self
            .modifications
            .iter()
            .filter_map(migrate_modification)
            .collect();

        let updated_at = items
            .iter()
            .map(|i| i.added_at)
            .chain(modifications.iter().map(|m| m.timestamp))
            .max()
            .unwrap_or(created_at)
            .max(created_at);

        SessionV2_0_0 {
            session_id: self.session_id,
            items,
            query_history: self.query_history,
            modifications,
            created_at,
            updated_at,
        }
    }
}

/// Convert SessionV2_0_0 DTO to domain model.
impl IntoDomain<SessionContext> for SessionV2_0_0 {
    fn into_domain(self) -> SessionContext {
        SessionContext::restore(
            self.session_id,
            self.items,
            self.query_history,
            self.modifications,
            self.created_at,
            self.updated_at,
        )
    }
}

/// Convert domain model to SessionV2_0_0 DTO for persistence.
impl FromDomain<SessionContext> for SessionV2_0_0 {
    fn from_domain(session: SessionContext) -> Self {
        SessionV2_0_0 {
            items: session.items().cloned().collect(),
            session_id: session.session_id,
            query_history: session.query_history,
            modifications: session.modifications,
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }
}

// ============================================================================
// Migrator factory
// ============================================================================

/// Creates and configures a Migrator instance for session records.
///
/// The migrator handles automatic schema migration from V1.0.0 to V2.0.0
/// and conversion to the domain model.
pub fn create_session_migrator() -> version_migrate::Migrator {
    let mut migrator = version_migrate::Migrator::builder().build();

    // Register migration path: V1.0.0 -> V2.0.0 -> SessionContext
    let session_path = version_migrate::Migrator::define("session")
        .from::<SessionV1_0_0>()
        .step::<SessionV2_0_0>()
        .into_with_save::<SessionContext>();

    migrator
        .register(session_path)
        .expect("Failed to register session migration path");

    migrator
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn legacy_record() -> SessionV1_0_0 {
        serde_json::from_value(json!({
            "session_id": "legacy-1",
            "current_data": {
                "I10": {
                    "type": "icd_code",
                    "key": "I10",
                    "value": "Essential hypertension",
                    "metadata": {"score": 0.92, "full_document": {"SAB": "ICD10CM"}},
                    "added_at": "2024-05-01T10:00:05.123456",
                    "source_query": "hypertension codes"
                },
                "E11.9": {
                    "item_type": "icd_code",
                    "key": "E11.9",
                    "value": "Type 2 diabetes",
                    "metadata": null,
                    "added_at": "2024-05-01T10:00:01"
                }
            },
            "query_history": ["hypertension codes"],
            "modifications": [
                {"action": "add", "type": "icd_code", "key": "E11.9", "timestamp": "2024-05-01T10:00:01"},
                {"action": "add", "type": "icd_code", "key": "I10", "timestamp": "2024-05-01T10:00:05"},
                {"action": "rename", "key": "I10", "timestamp": "2024-05-01T10:00:06"}
            ],
            "created_at": "2024-05-01T09:59:00"
        }))
        .unwrap()
    }

    #[test]
    fn test_v1_to_v2_migration() {
        let migrated: SessionV2_0_0 = legacy_record().migrate();

        assert_eq!(migrated.session_id, "legacy-1");
        let keys: Vec<&str> = migrated.items.iter().map(|i| i.key.as_str()).collect();
        // Ordered by added_at
        assert_eq!(keys, vec!["E11.9", "I10"]);
        assert_eq!(migrated.items[1].document_field("SAB"), Some("ICD10CM"));
        assert!(migrated.items[0].metadata.is_empty());
        assert_eq!(migrated.modifications.len(), 2);
        assert_eq!(
            migrated.created_at,
            parse_timestamp("2024-05-01T09:59:00Z").unwrap()
        );
        assert_eq!(migrated.updated_at, migrated.items[1].added_at);
    }

    #[test]
    fn test_domain_round_trip_through_dto() {
        let mut session = SessionContext::new("round-trip");
        let mut metadata = Metadata::new();
        metadata.insert("score".to_string(), json!(0.8123));
        metadata.insert("full_document".to_string(), json!({"CODE": "I10", "OHDSI": "a<br/>b"}));
        session.upsert(DataItem::new("icd_code", "I10", "Essential hypertension").with_metadata(metadata));
        session.upsert(DataItem::new("snomed_code", "38341003", "Hypertensive disorder"));
        session.record_query("hypertension");

        let dto = SessionV2_0_0::from_domain(session.clone());
        let encoded = serde_json::to_string(&dto).unwrap();
        let decoded: SessionV2_0_0 = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded.into_domain(), session);
    }

    #[test]
    fn test_parse_timestamp_variants() {
        assert!(parse_timestamp("2024-05-01T10:00:00+02:00").is_some());
        assert!(parse_timestamp("2024-05-01T10:00:00.5").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_session_migrator_creation() {
        let _migrator = create_session_migrator();
    }
}
