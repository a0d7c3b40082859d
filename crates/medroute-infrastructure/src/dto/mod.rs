//! Data Transfer Objects (DTOs) for persistence.
//!
//! These DTOs represent the versioned schema for persisting data.
//! They are private to the infrastructure layer and handle the evolution
//! of the storage format over time.
//!
//! ### Session Version History
//! - **1.0.0**: Loosely typed records (item map, string timestamps, free-form audit log)
//! - **2.0.0**: Typed records with ordered items and `updated_at`
//!
//! ### Conversation Version History
//! - **1.0.0**: Role, content and timestamp per message

mod history;
mod session;

pub use history::{ConversationV1_0_0, create_history_migrator};

// Re-export session DTOs and migrator
pub use session::{DataItemV1_0_0, SessionV1_0_0, SessionV2_0_0, create_session_migrator};
