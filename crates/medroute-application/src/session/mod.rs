//! Session lifecycle management.
//!
//! # Module Structure
//!
//! - `manager`: [`SessionStore`], the resident session map with per-session
//!   locking, auto-save and eviction

mod manager;

pub use manager::{CleanupReport, MemoryUsage, SessionStore};
