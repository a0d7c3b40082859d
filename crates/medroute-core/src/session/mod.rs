//! Session domain module.
//!
//! # Module Structure
//!
//! - `model`: `DataItem`, `SessionContext` and the audit log types
//! - `render`: table, summary, JSON and context renderings
//! - `history`: bounded conversation history
//! - `repository`: repository traits for durable session records and histories

mod history;
mod model;
pub mod render;
mod repository;

// Re-export public API
pub use history::{ConversationHistory, ConversationRecord, DEFAULT_MAX_MESSAGES, HistoryMessage};
pub use model::{
    DataItem, ICD_CODE, Metadata, ModificationAction, ModificationRecord, SNOMED_CODE,
    SessionContext,
};
pub use render::SessionStats;
pub use repository::{HistoryRepository, SessionRepository};
