//! Error types for the medroute engine.

use crate::capability::GenerationError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Every failure the engine can produce.
///
/// Collaborator failures keep their kind (retrieval, generation, embedding,
/// timeout) so the orchestrator can phrase them for the analyst.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum MedrouteError {
    /// A session or concept set that does not exist
    #[error("{entity_type} not found: '{id}'")]
    NotFound {
        entity_type: &'static str,
        id: String,
    },

    #[error("I/O failure: {message}")]
    Io { message: String },

    /// Encoding or decoding a record or config file
    #[error("Could not process {format}: {message}")]
    Serialization {
        format: String,
        message: String,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Session record schema migration
    #[error("Record migration failed: {0}")]
    Migration(String),

    /// Durable session storage error
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Search backend error
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    /// Language model error
    #[error("Generation error: {0}")]
    Generation(GenerationError),

    /// Embedding backend error
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// An external call exceeded its time budget
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// Template rendering and other programming faults
    #[error("Internal failure: {0}")]
    Internal(String),
}

impl MedrouteError {
    pub fn not_found(entity_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type,
            id: id.into(),
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }

    pub fn retrieval(message: impl Into<String>) -> Self {
        Self::Retrieval(message.into())
    }

    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding(message.into())
    }

    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_retrieval(&self) -> bool {
        matches!(self, Self::Retrieval(_))
    }

    /// True for a call that ran out of time.
    ///
    /// Covers both the engine-level `Timeout` and a generator-reported timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Generation(GenerationError::Timeout(_))
        )
    }

    /// Rate-limit failure from the language model; the only retryable kind.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Generation(e) if e.is_rate_limited())
    }

    /// Renders the error as the explanatory text shown to the analyst.
    ///
    /// Every failure that reaches the request boundary goes through here, so
    /// the wording stays free of internal detail where it would only confuse.
    pub fn user_message(&self) -> String {
        match self {
            Self::Timeout { operation, .. } => format!(
                "The {} service is taking too long to respond right now. Please try again in a moment.",
                operation
            ),
            Self::Generation(GenerationError::Timeout(_)) => {
                "The language model is taking too long to respond right now. Please try again in a moment."
                    .to_string()
            }
            Self::Generation(GenerationError::RateLimited { .. }) => {
                "The language model is currently rate limited. Please wait a moment and try again."
                    .to_string()
            }
            Self::Generation(GenerationError::Unavailable(message)) => {
                format!("The language model is unavailable right now: {}", message)
            }
            Self::Retrieval(message) => format!("Search failed: {}", message),
            Self::Embedding(message) => format!("Similarity search is unavailable: {}", message),
            other => format!("Sorry, something went wrong while handling your request: {}", other),
        }
    }
}

impl From<GenerationError> for MedrouteError {
    fn from(err: GenerationError) -> Self {
        Self::Generation(err)
    }
}

impl From<std::io::Error> for MedrouteError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: format!("{} (kind: {:?})", err, err.kind()),
        }
    }
}

impl From<serde_json::Error> for MedrouteError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            format: "JSON".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for MedrouteError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::ser::Error> for MedrouteError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<version_migrate::MigrationError> for MedrouteError {
    fn from(err: version_migrate::MigrationError) -> Self {
        use version_migrate::MigrationError;

        match err {
            MigrationError::EntityNotFound(id) => Self::not_found("session record", id),
            MigrationError::DeserializationError(_) | MigrationError::SerializationError(_) => {
                Self::Serialization {
                    format: "migration".to_string(),
                    message: err.to_string(),
                }
            }
            MigrationError::IoError { .. } => Self::Io {
                message: err.to_string(),
            },
            _ => Self::Migration(err.to_string()),
        }
    }
}

impl From<anyhow::Error> for MedrouteError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<String> for MedrouteError {
    fn from(err: String) -> Self {
        Self::Internal(err)
    }
}

/// A type alias for `Result<T, MedrouteError>`.
pub type Result<T> = std::result::Result<T, MedrouteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_user_message_is_degraded_service_text() {
        let err = MedrouteError::timeout("search", Duration::from_secs(30));
        assert!(err.is_timeout());
        assert!(err.user_message().contains("taking too long"));
    }

    #[test]
    fn test_rate_limited_generation_is_detected() {
        let err: MedrouteError = GenerationError::RateLimited {
            retry_after: Some(Duration::from_secs(1)),
            message: "slow down".to_string(),
        }
        .into();
        assert!(err.is_rate_limited());
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_retrieval_user_message() {
        let err = MedrouteError::retrieval("index offline");
        assert!(err.is_retrieval());
        assert_eq!(err.user_message(), "Search failed: index offline");
    }

    #[test]
    fn test_io_conversion_keeps_kind() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: MedrouteError = io.into();
        assert!(err.to_string().contains("NotFound"));
    }
}
