use chrono::{Duration as ChronoDuration, Utc};
use medroute_core::session::{
    DataItem, SessionContext, SessionRepository, SessionStats, render,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// How often a mutation re-resolves a session that was evicted under it.
const MAX_SLOT_ATTEMPTS: usize = 3;

/// One resident session.
///
/// `evicted` is set (under the slot lock) after the context has been saved
/// and just before the slot leaves the map; a caller that wins the lock
/// afterwards must resolve the session again.
struct SessionSlot {
    context: SessionContext,
    evicted: bool,
}

type SharedSlot = Arc<Mutex<SessionSlot>>;

/// Outcome of a [`SessionStore::cleanup`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub sessions_before: usize,
    pub evicted: Vec<String>,
    pub durable_deleted: Vec<String>,
    pub durable_total: usize,
}

/// Snapshot of what is held in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    pub sessions_in_memory: usize,
    pub total_items: usize,
    pub items_per_session: BTreeMap<String, usize>,
}

/// Owns every resident [`SessionContext`] and keeps the durable records in step.
///
/// `SessionStore` is responsible for:
/// - Starting sessions (memory, then durable store, then fresh)
/// - Serializing mutations per session id
/// - Auto-saving after each mutation (best-effort)
/// - Evicting sessions from memory and expiring durable records
///
/// Mutations never raise: an unknown session yields `false`, and persistence
/// failures are logged while the in-memory context stays authoritative.
pub struct SessionStore {
    /// Resident sessions; each slot carries its own lock
    sessions: RwLock<HashMap<String, SharedSlot>>,
    /// Durable session records
    repository: Arc<dyn SessionRepository>,
}

impl SessionStore {
    /// Creates a new `SessionStore` backed by `repository`.
    pub fn new(repository: Arc<dyn SessionRepository>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            repository,
        }
    }

    /// Returns the session `session_id`, loading or creating it as needed.
    ///
    /// Calling this twice with the same id yields the same logical context.
    pub async fn start_session(&self, session_id: &str) -> SessionContext {
        if let Some(slot) = self.resident(session_id).await {
            return slot.lock().await.context.clone();
        }

        let context = match self.find_durable(session_id).await {
            Some(context) => {
                tracing::info!(session_id, item_count = context.len(), "Loaded session from storage");
                context
            }
            None => {
                tracing::info!(session_id, "Started new session");
                SessionContext::new(session_id)
            }
        };

        let slot = self.adopt(context).await;
        let guard = slot.lock().await;
        guard.context.clone()
    }

    /// Upserts `item` into the session. Returns `false` when the session is unknown.
    pub async fn add_item(&self, session_id: &str, item: DataItem) -> bool {
        let key = item.key.clone();
        let added = self
            .mutate(session_id, |ctx| {
                ctx.upsert(item);
            })
            .await
            .is_some();
        if !added {
            tracing::warn!(session_id, key = %key, "Cannot add item to unknown session");
        }
        added
    }

    /// Upserts several items under one lock acquisition. Returns how many were stored.
    pub async fn add_items(&self, session_id: &str, items: Vec<DataItem>) -> usize {
        let count = items.len();
        match self
            .mutate(session_id, |ctx| {
                for item in items {
                    ctx.upsert(item);
                }
            })
            .await
        {
            Some(()) => count,
            None => {
                tracing::warn!(session_id, item_count = count, "Cannot add items to unknown session");
                0
            }
        }
    }

    /// Removes the item under `key`. `false` when absent or the session is unknown.
    pub async fn remove_item(&self, session_id: &str, key: &str) -> bool {
        self.mutate(session_id, |ctx| ctx.remove(key).is_some())
            .await
            .unwrap_or(false)
    }

    /// Empties the session's data. `false` when the session is unknown.
    pub async fn clear(&self, session_id: &str) -> bool {
        self.mutate(session_id, SessionContext::clear).await.is_some()
    }

    /// Appends `query` to the session's query history.
    pub async fn record_query(&self, session_id: &str, query: &str) -> bool {
        self.mutate(session_id, |ctx| ctx.record_query(query))
            .await
            .is_some()
    }

    /// Snapshot of the session, if known.
    pub async fn snapshot(&self, session_id: &str) -> Option<SessionContext> {
        self.read(session_id, SessionContext::clone).await
    }

    /// Items in insertion order; empty for an unknown session.
    pub async fn items(&self, session_id: &str) -> Vec<DataItem> {
        self.read(session_id, |ctx| ctx.items().cloned().collect())
            .await
            .unwrap_or_default()
    }

    pub async fn items_by_type(&self, session_id: &str, item_type: &str) -> Vec<DataItem> {
        self.read(session_id, |ctx| ctx.items_of_type(item_type).cloned().collect())
            .await
            .unwrap_or_default()
    }

    /// Whether the session holds any data.
    pub async fn has_data(&self, session_id: &str) -> bool {
        self.read(session_id, |ctx| !ctx.is_empty())
            .await
            .unwrap_or(false)
    }

    pub async fn summarize(&self, session_id: &str) -> String {
        self.read(session_id, render::summarize)
            .await
            .unwrap_or_else(|| "No data in current session.".to_string())
    }

    /// Markdown table of the session's data, one line per item.
    pub async fn to_table(&self, session_id: &str) -> String {
        match self.read(session_id, render::to_table).await {
            Some(table) => table,
            None => render::to_table(&SessionContext::new(session_id)),
        }
    }

    /// Pretty JSON of the session's data keyed by item key.
    pub async fn to_json(&self, session_id: &str) -> Option<String> {
        let value = self.read(session_id, render::to_json).await?;
        match serde_json::to_string_pretty(&value) {
            Ok(json) => Some(json),
            Err(e) => {
                tracing::error!(session_id, "Failed to render session as JSON: {}", e);
                None
            }
        }
    }

    pub async fn stats(&self, session_id: &str) -> Option<SessionStats> {
        self.read(session_id, render::stats).await
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Saves the session to durable storage. Failures are logged and reported as `false`.
    pub async fn save(&self, session_id: &str) -> bool {
        let Some(guard) = self.live_slot(session_id).await else {
            tracing::warn!(session_id, "Cannot save unknown session");
            return false;
        };
        self.persist(&guard.context).await
    }

    /// Makes the durable record resident. `true` when the session is now in memory.
    pub async fn load(&self, session_id: &str) -> bool {
        self.live_slot(session_id).await.is_some()
    }

    /// Whether the session is in memory or in durable storage.
    pub async fn has_session(&self, session_id: &str) -> bool {
        if self.resident(session_id).await.is_some() {
            return true;
        }
        match self.repository.find_by_id(session_id).await {
            Ok(found) => found.is_some(),
            Err(e) => {
                tracing::warn!(session_id, "Failed to check durable session: {}", e);
                false
            }
        }
    }

    /// IDs of every durable record.
    pub async fn list_saved(&self) -> Vec<String> {
        match self.repository.list_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!("Failed to list saved sessions: {}", e);
                Vec::new()
            }
        }
    }

    /// Saves every resident session. Returns how many were saved.
    pub async fn save_all(&self) -> usize {
        let slots: Vec<SharedSlot> = self.sessions.read().await.values().cloned().collect();
        let mut saved = 0;
        for slot in slots {
            let guard = slot.lock().await;
            if !guard.evicted && self.persist(&guard.context).await {
                saved += 1;
            }
        }
        saved
    }

    /// Drops the session from memory, optionally deleting its durable record too.
    ///
    /// Without `delete_durable` the session is saved first, so it can be
    /// loaded again later.
    pub async fn forget(&self, session_id: &str, delete_durable: bool) -> bool {
        let slot = self.resident(session_id).await;
        let mut removed = false;

        if let Some(slot) = slot {
            let mut guard = slot.lock().await;
            if !guard.evicted {
                if !delete_durable && !self.persist(&guard.context).await {
                    tracing::warn!(session_id, "Keeping session in memory, save failed");
                    return false;
                }
                guard.evicted = true;
                self.detach(session_id, &slot).await;
                removed = true;
            }
        }

        if delete_durable {
            match self.repository.delete(session_id).await {
                Ok(()) => removed = true,
                Err(e) => tracing::warn!(session_id, "Failed to delete durable session: {}", e),
            }
        }
        removed
    }

    /// Sessions and items currently resident.
    pub async fn memory_usage(&self) -> MemoryUsage {
        let slots: Vec<(String, SharedSlot)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, slot)| (id.clone(), slot.clone()))
            .collect();

        let mut usage = MemoryUsage::default();
        for (id, slot) in slots {
            let guard = slot.lock().await;
            if guard.evicted {
                continue;
            }
            usage.sessions_in_memory += 1;
            usage.total_items += guard.context.len();
            usage.items_per_session.insert(id, guard.context.len());
        }
        usage
    }

    /// Expires durable records and evicts sessions from memory.
    ///
    /// Durable records last updated more than `max_age_days` ago are deleted,
    /// except for sessions that are resident. Then, while more than
    /// `max_memory_sessions` are resident, the oldest-created ones are saved
    /// and dropped from memory. A session whose save fails stays resident.
    pub async fn cleanup(&self, max_age_days: u32, max_memory_sessions: usize) -> CleanupReport {
        let mut report = CleanupReport::default();

        let resident: Vec<(String, SharedSlot)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, slot)| (id.clone(), slot.clone()))
            .collect();
        report.sessions_before = resident.len();

        let cutoff = Utc::now() - ChronoDuration::days(i64::from(max_age_days));
        match self.repository.list_all().await {
            Ok(records) => {
                report.durable_total = records.len();
                for record in records {
                    if record.updated_at >= cutoff
                        || resident.iter().any(|(id, _)| *id == record.session_id)
                    {
                        continue;
                    }
                    match self.repository.delete(&record.session_id).await {
                        Ok(()) => report.durable_deleted.push(record.session_id),
                        Err(e) => tracing::warn!(
                            session_id = %record.session_id,
                            "Failed to delete expired session: {}",
                            e
                        ),
                    }
                }
            }
            Err(e) => tracing::warn!("Failed to list durable sessions for cleanup: {}", e),
        }

        if resident.len() > max_memory_sessions {
            let mut by_age = Vec::with_capacity(resident.len());
            for (id, slot) in resident {
                let created_at = slot.lock().await.context.created_at;
                by_age.push((created_at, id, slot));
            }
            by_age.sort_by(|a, b| a.0.cmp(&b.0));

            let excess = by_age.len() - max_memory_sessions;
            for (_, id, slot) in by_age.into_iter().take(excess) {
                let mut guard = slot.lock().await;
                if guard.evicted {
                    continue;
                }
                if !self.persist(&guard.context).await {
                    tracing::warn!(session_id = %id, "Skipping eviction, save failed");
                    continue;
                }
                guard.evicted = true;
                self.detach(&id, &slot).await;
                report.evicted.push(id);
            }
        }

        tracing::info!(
            sessions_before = report.sessions_before,
            evicted = report.evicted.len(),
            durable_deleted = report.durable_deleted.len(),
            "Session cleanup finished"
        );
        report
    }

    /// IDs of resident sessions.
    pub async fn resident_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn resident(&self, session_id: &str) -> Option<SharedSlot> {
        self.sessions.read().await.get(session_id).cloned()
    }

    async fn find_durable(&self, session_id: &str) -> Option<SessionContext> {
        match self.repository.find_by_id(session_id).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(session_id, "Failed to load session: {}", e);
                None
            }
        }
    }

    /// Inserts `context` unless another task made the session resident first.
    async fn adopt(&self, context: SessionContext) -> SharedSlot {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(context.session_id.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(SessionSlot {
                    context,
                    evicted: false,
                }))
            })
            .clone()
    }

    /// Removes `slot` from the map if it is still the one stored under `session_id`.
    async fn detach(&self, session_id: &str, slot: &SharedSlot) {
        let mut sessions = self.sessions.write().await;
        if sessions
            .get(session_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            sessions.remove(session_id);
        }
    }

    /// Locks the live slot for `session_id`, loading a durable record when
    /// the session is not resident. `None` for an unknown session.
    async fn live_slot(&self, session_id: &str) -> Option<OwnedMutexGuard<SessionSlot>> {
        for _ in 0..MAX_SLOT_ATTEMPTS {
            let slot = match self.resident(session_id).await {
                Some(slot) => slot,
                None => {
                    let context = self.find_durable(session_id).await?;
                    tracing::debug!(session_id, "Lazily loaded session");
                    self.adopt(context).await
                }
            };
            let guard = slot.lock_owned().await;
            if !guard.evicted {
                return Some(guard);
            }
        }
        tracing::warn!(session_id, "Session kept being evicted while resolving it");
        None
    }

    async fn read<R>(&self, session_id: &str, f: impl FnOnce(&SessionContext) -> R) -> Option<R> {
        let guard = self.live_slot(session_id).await?;
        Some(f(&guard.context))
    }

    /// Applies `f` under the session lock, then auto-saves.
    async fn mutate<R>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut SessionContext) -> R,
    ) -> Option<R> {
        let mut guard = self.live_slot(session_id).await?;
        let result = f(&mut guard.context);
        self.persist(&guard.context).await;
        Some(result)
    }

    async fn persist(&self, context: &SessionContext) -> bool {
        match self.repository.save(context).await {
            Ok(()) => {
                tracing::debug!(session_id = %context.session_id, item_count = context.len(), "Session saved");
                true
            }
            Err(e) => {
                tracing::warn!(session_id = %context.session_id, "Failed to save session: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
#[path = "manager_test.rs"]
mod tests;
