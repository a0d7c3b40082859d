use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form structured payload attached to a [`DataItem`].
pub type Metadata = Map<String, Value>;

/// Item type tags produced by the lookup agents.
pub const ICD_CODE: &str = "icd_code";
pub const SNOMED_CODE: &str = "snomed_code";

/// One retrieved fact currently in view for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataItem {
    /// Tag such as `icd_code`, `snomed_code` or `description`
    pub item_type: String,
    /// Unique within a session; re-adding the same key overwrites the item
    pub key: String,
    /// Primary display text
    pub value: String,
    /// May carry a `full_document` object with the raw index fields
    #[serde(default)]
    pub metadata: Metadata,
    pub added_at: DateTime<Utc>,
    #[serde(default)]
    pub source_query: Option<String>,
}

impl DataItem {
    pub fn new(
        item_type: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            item_type: item_type.into(),
            key: key.into(),
            value: value.into(),
            metadata: Metadata::new(),
            added_at: Utc::now(),
            source_query: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_source_query(mut self, query: impl Into<String>) -> Self {
        self.source_query = Some(query.into());
        self
    }

    /// The raw index document stored under `metadata.full_document`, if any.
    pub fn full_document(&self) -> Option<&Map<String, Value>> {
        self.metadata.get("full_document").and_then(Value::as_object)
    }

    /// A string field of the raw index document.
    pub fn document_field(&self, name: &str) -> Option<&str> {
        self.full_document()
            .and_then(|doc| doc.get(name))
            .and_then(Value::as_str)
    }
}

/// Kind of change recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ModificationAction {
    Add,
    Remove,
    ClearAll,
}

/// One audit record of a mutation on `current_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModificationRecord {
    pub action: ModificationAction,
    #[serde(default)]
    pub item_type: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ModificationRecord {
    fn now(action: ModificationAction, item_type: Option<String>, key: Option<String>) -> Self {
        Self {
            action,
            item_type,
            key,
            timestamp: Utc::now(),
        }
    }
}

/// Mutable state of one conversation.
///
/// `current_data` is private: every item is stored under its own `key`, and
/// the only ways in are [`SessionContext::upsert`] and [`SessionContext::restore`],
/// both of which key by `item.key`. Serde goes through an item-list shape
/// for the same reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "SessionContextRepr", into = "SessionContextRepr")]
pub struct SessionContext {
    pub session_id: String,
    current_data: IndexMap<String, DataItem>,
    /// Past queries, oldest first
    pub query_history: Vec<String>,
    /// Append-only audit log
    pub modifications: Vec<ModificationRecord>,
    /// Tie-break for memory eviction (oldest evicted first)
    pub created_at: DateTime<Utc>,
    /// Last mutation or recorded query; drives durable retention
    pub updated_at: DateTime<Utc>,
}

/// Serialized shape of a [`SessionContext`]: items as an ordered list.
#[derive(Serialize, Deserialize)]
struct SessionContextRepr {
    session_id: String,
    items: Vec<DataItem>,
    query_history: Vec<String>,
    modifications: Vec<ModificationRecord>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<SessionContextRepr> for SessionContext {
    fn from(repr: SessionContextRepr) -> Self {
        Self::restore(
            repr.session_id,
            repr.items,
            repr.query_history,
            repr.modifications,
            repr.created_at,
            repr.updated_at,
        )
    }
}

impl From<SessionContext> for SessionContextRepr {
    fn from(ctx: SessionContext) -> Self {
        Self {
            session_id: ctx.session_id,
            items: ctx.current_data.into_values().collect(),
            query_history: ctx.query_history,
            modifications: ctx.modifications,
            created_at: ctx.created_at,
            updated_at: ctx.updated_at,
        }
    }
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            current_data: IndexMap::new(),
            query_history: Vec::new(),
            modifications: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuilds a context from persisted parts.
    ///
    /// Items are keyed by their own `key`; a later item with a duplicate key
    /// replaces the earlier one.
    pub fn restore(
        session_id: impl Into<String>,
        items: impl IntoIterator<Item = DataItem>,
        query_history: Vec<String>,
        modifications: Vec<ModificationRecord>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        let current_data = items
            .into_iter()
            .map(|item| (item.key.clone(), item))
            .collect();
        Self {
            session_id: session_id.into(),
            current_data,
            query_history,
            modifications,
            created_at,
            updated_at,
        }
    }

    /// Inserts or replaces the item stored under `item.key`.
    ///
    /// Returns the replaced item. An `add` audit record is appended either way.
    pub fn upsert(&mut self, item: DataItem) -> Option<DataItem> {
        self.modifications.push(ModificationRecord::now(
            ModificationAction::Add,
            Some(item.item_type.clone()),
            Some(item.key.clone()),
        ));
        self.touch();
        self.current_data.insert(item.key.clone(), item)
    }

    /// Removes the item under `key`, keeping the order of the rest.
    pub fn remove(&mut self, key: &str) -> Option<DataItem> {
        let removed = self.current_data.shift_remove(key)?;
        self.modifications.push(ModificationRecord::now(
            ModificationAction::Remove,
            Some(removed.item_type.clone()),
            Some(key.to_string()),
        ));
        self.touch();
        Some(removed)
    }

    /// Empties `current_data` and logs a `clear_all` record.
    pub fn clear(&mut self) {
        self.current_data.clear();
        self.modifications.push(ModificationRecord::now(
            ModificationAction::ClearAll,
            None,
            None,
        ));
        self.touch();
    }

    pub fn record_query(&mut self, query: impl Into<String>) {
        self.query_history.push(query.into());
        self.touch();
    }

    pub fn get(&self, key: &str) -> Option<&DataItem> {
        self.current_data.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.current_data.contains_key(key)
    }

    /// Items in insertion order.
    pub fn items(&self) -> impl Iterator<Item = &DataItem> {
        self.current_data.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.current_data.keys().map(String::as_str)
    }

    pub fn items_of_type<'a>(&'a self, item_type: &'a str) -> impl Iterator<Item = &'a DataItem> {
        self.items().filter(move |item| item.item_type == item_type)
    }

    pub fn len(&self) -> usize {
        self.current_data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current_data.is_empty()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_upsert_replaces_value_and_logs_add() {
        let mut ctx = SessionContext::new("s1");
        ctx.upsert(DataItem::new(ICD_CODE, "I10", "Essential hypertension"));
        let previous = ctx.upsert(DataItem::new(ICD_CODE, "I10", "Hypertension, essential"));

        assert_eq!(ctx.len(), 1);
        assert_eq!(previous.map(|p| p.value), Some("Essential hypertension".to_string()));
        assert_eq!(ctx.get("I10").map(|i| i.value.as_str()), Some("Hypertension, essential"));
        assert_eq!(ctx.modifications.len(), 2);
        assert!(ctx
            .modifications
            .iter()
            .all(|m| m.action == ModificationAction::Add));
    }

    #[test]
    fn test_remove_keeps_insertion_order() {
        let mut ctx = SessionContext::new("s1");
        for key in ["A01", "B02", "C03"] {
            ctx.upsert(DataItem::new(ICD_CODE, key, key));
        }

        assert!(ctx.remove("B02").is_some());
        assert!(ctx.remove("B02").is_none());
        assert_eq!(ctx.keys().collect::<Vec<_>>(), vec!["A01", "C03"]);
        // add, add, add, remove: the failed remove is not logged
        assert_eq!(ctx.modifications.len(), 4);
    }

    #[test]
    fn test_clear_logs_clear_all() {
        let mut ctx = SessionContext::new("s1");
        ctx.upsert(DataItem::new(ICD_CODE, "I10", "x"));
        ctx.clear();
        assert!(ctx.is_empty());
        assert_eq!(
            ctx.modifications.last().map(|m| m.action),
            Some(ModificationAction::ClearAll)
        );
    }

    #[test]
    fn test_restore_keys_items_by_their_own_key() {
        let ctx = SessionContext::restore(
            "s1",
            vec![
                DataItem::new(ICD_CODE, "I10", "first"),
                DataItem::new(ICD_CODE, "I10", "second"),
            ],
            vec![],
            vec![],
            Utc::now(),
            Utc::now(),
        );
        assert_eq!(ctx.len(), 1);
        assert_eq!(ctx.get("I10").map(|i| i.value.as_str()), Some("second"));
    }

    #[test]
    fn test_document_field() {
        let mut metadata = Metadata::new();
        metadata.insert("full_document".to_string(), json!({"SAB": "ICD10CM", "CODE": "I10"}));
        let item = DataItem::new(ICD_CODE, "I10", "x").with_metadata(metadata);
        assert_eq!(item.document_field("SAB"), Some("ICD10CM"));
        assert_eq!(item.document_field("OHDSI"), None);
    }
}
