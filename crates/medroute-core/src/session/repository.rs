//! Session repository traits.
//!
//! Defines the interfaces for durable session records and their
//! conversation histories.

use super::history::ConversationRecord;
use super::model::SessionContext;
use anyhow::Result;
use async_trait::async_trait;

/// An abstract repository for durable session records.
///
/// One record per session id, holding the full context: every item with all
/// fields, the audit log, the query history and both timestamps.
///
/// # Implementation Notes
///
/// Implementations should handle:
/// - Record versioning and migrations
/// - Reporting a missing record as `Ok(None)`, not as an error
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Finds a session by its ID.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(SessionContext))`: Session found
    /// - `Ok(None)`: Session not found
    /// - `Err(_)`: Error occurred during retrieval
    async fn find_by_id(&self, session_id: &str) -> Result<Option<SessionContext>>;

    /// Saves (creates or overwrites) the record for `session.session_id`.
    async fn save(&self, session: &SessionContext) -> Result<()>;

    /// Deletes a session record. Deleting a missing record is not an error.
    async fn delete(&self, session_id: &str) -> Result<()>;

    /// IDs of every stored session.
    async fn list_ids(&self) -> Result<Vec<String>>;

    /// Loads every stored session, most recently updated first.
    async fn list_all(&self) -> Result<Vec<SessionContext>>;
}

/// Durable conversation histories, one record per session id.
///
/// Kept apart from [`SessionRepository`] so the data record does not grow
/// with every turn.
#[async_trait]
pub trait HistoryRepository: Send + Sync {
    /// `Ok(None)` when no history was stored for `session_id`.
    async fn find_history(&self, session_id: &str) -> Result<Option<ConversationRecord>>;

    async fn save_history(&self, record: &ConversationRecord) -> Result<()>;

    /// Deleting a missing record is not an error.
    async fn delete_history(&self, session_id: &str) -> Result<()>;
}
