pub mod capability;
pub mod classify;
pub mod concept_set;
pub mod config;
pub mod error;
pub mod memory;
pub mod relationship;
pub mod relevance;
pub mod session;
pub mod text;

// Re-export common error type
pub use error::MedrouteError;
