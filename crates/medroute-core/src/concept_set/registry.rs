use super::{ConceptSetEntry, TargetResolution, resolve_target};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Default number of concept sets kept per session.
pub const DEFAULT_MAX_ENTRIES: usize = 10;

/// In-process store of concept sets, keyed by session id.
///
/// Not persisted. When a session holds more than `max_entries` sets the
/// oldest one is dropped.
#[derive(Debug)]
pub struct ConceptSetRegistry {
    entries: RwLock<HashMap<String, Vec<ConceptSetEntry>>>,
    max_entries: usize,
}

impl Default for ConceptSetRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl ConceptSetRegistry {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    pub async fn store(&self, session_id: &str, entry: ConceptSetEntry) {
        let mut entries = self.entries.write().await;
        let list = entries.entry(session_id.to_string()).or_default();
        list.push(entry);

        while list.len() > self.max_entries {
            if let Some(oldest) = list
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| e.timestamp)
                .map(|(i, _)| i)
            {
                let dropped = list.remove(oldest);
                tracing::debug!(session_id, name = %dropped.name, "Dropped oldest concept set");
            }
        }
    }

    /// Entries for a session, most recent first.
    pub async fn list(&self, session_id: &str) -> Vec<ConceptSetEntry> {
        let entries = self.entries.read().await;
        let mut list = entries.get(session_id).cloned().unwrap_or_default();
        list.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        list
    }

    pub async fn has_entries(&self, session_id: &str) -> bool {
        let entries = self.entries.read().await;
        entries.get(session_id).is_some_and(|list| !list.is_empty())
    }

    pub async fn resolve(&self, session_id: &str, query: &str) -> TargetResolution {
        let entries = self.entries.read().await;
        match entries.get(session_id) {
            Some(list) => resolve_target(query, list),
            None => TargetResolution::Empty,
        }
    }

    /// Replaces the cached rendering of one entry. Returns false if the entry
    /// is gone (evicted or cleared).
    pub async fn update_formatted(&self, session_id: &str, entry_id: &str, formatted: String) -> bool {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries
            .get_mut(session_id)
            .and_then(|list| list.iter_mut().find(|e| e.id == entry_id))
        else {
            return false;
        };
        entry.formatted = formatted;
        true
    }

    pub async fn clear(&self, session_id: &str) {
        self.entries.write().await.remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_list_is_most_recent_first() {
        let registry = ConceptSetRegistry::default();
        let now = Utc::now();
        registry
            .store("s1", ConceptSetEntry::new("older", "r", "", "q").with_timestamp(now - Duration::minutes(2)))
            .await;
        registry
            .store("s1", ConceptSetEntry::new("newer", "r", "", "q").with_timestamp(now))
            .await;

        let names: Vec<String> = registry.list("s1").await.into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["newer", "older"]);
        assert!(registry.list("other").await.is_empty());
        assert!(!registry.has_entries("other").await);
    }

    #[tokio::test]
    async fn test_cap_drops_oldest() {
        let registry = ConceptSetRegistry::new(2);
        let now = Utc::now();
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            registry
                .store("s1", ConceptSetEntry::new(name, "r", "", "q").with_timestamp(now + Duration::seconds(i as i64)))
                .await;
        }

        let names: Vec<String> = registry.list("s1").await.into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["c", "b"]);
    }

    #[tokio::test]
    async fn test_update_formatted_and_resolve() {
        let registry = ConceptSetRegistry::default();
        let entry = ConceptSetEntry::new("asthma", "Code: J45", "old", "q");
        let id = entry.id.clone();
        registry.store("s1", entry).await;

        assert!(registry.update_formatted("s1", &id, "new".to_string()).await);
        assert!(!registry.update_formatted("s1", "missing", "x".to_string()).await);

        match registry.resolve("s1", "remove J45").await {
            TargetResolution::Resolved(entry) => assert_eq!(entry.formatted, "new"),
            other => panic!("expected resolution, got {:?}", other),
        }

        registry.clear("s1").await;
        assert_eq!(registry.resolve("s1", "remove J45").await, TargetResolution::Empty);
    }
}
