//! Engine configuration.
//!
//! Loaded from `config.toml` by the infrastructure layer; every field has a
//! default so a partial (or missing) file is valid.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy for rate-limited generation calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    /// Upper bound on any single wait, including a server `Retry-After`
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 2000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms).min(self.max_delay())
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// The backoff following `delay`, never above [`Self::max_delay`].
    ///
    /// A multiplier that is not finite or below 1 leaves the delay unchanged.
    pub fn next_delay(&self, delay: Duration) -> Duration {
        let multiplier = if self.multiplier.is_finite() && self.multiplier >= 1.0 {
            self.multiplier
        } else {
            1.0
        };
        Duration::try_from_secs_f64(delay.as_secs_f64() * multiplier)
            .unwrap_or(Duration::MAX)
            .min(self.max_delay())
    }

    /// The wait before the next attempt: the backoff, or the server's
    /// `retry_after` when that is longer, capped at [`Self::max_delay`].
    pub fn wait_for(&self, delay: Duration, retry_after: Option<Duration>) -> Duration {
        retry_after
            .map_or(delay, |after| after.max(delay))
            .min(self.max_delay())
    }
}

/// Per-call time budgets for external capabilities, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub generation_secs: u64,
    pub search_secs: u64,
    pub embedding_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            generation_secs: 60,
            search_secs: 30,
            embedding_secs: 15,
        }
    }
}

impl TimeoutConfig {
    pub fn generation(&self) -> Duration {
        Duration::from_secs(self.generation_secs)
    }

    pub fn search(&self) -> Duration {
        Duration::from_secs(self.search_secs)
    }

    pub fn embedding(&self) -> Duration {
        Duration::from_secs(self.embedding_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub relevance_threshold: f64,
    /// Context budget, tokens approximated as chars / 4
    pub max_context_tokens: usize,
    pub max_history_messages: usize,
    pub max_memory_sessions: usize,
    pub max_age_days: u32,
    pub max_concept_sets_per_session: usize,
    pub search_top_k: usize,
    pub icd_index: String,
    pub snomed_index: String,
    pub vector_field: String,
    pub retry: RetryConfig,
    pub timeouts: TimeoutConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            relevance_threshold: crate::relevance::DEFAULT_THRESHOLD,
            max_context_tokens: 2000,
            max_history_messages: crate::session::DEFAULT_MAX_MESSAGES,
            max_memory_sessions: 10,
            max_age_days: 7,
            max_concept_sets_per_session: crate::concept_set::DEFAULT_MAX_ENTRIES,
            search_top_k: 20,
            icd_index: "icd".to_string(),
            snomed_index: "snomed".to_string(),
            vector_field: "vector".to_string(),
            retry: RetryConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
relevance_threshold = 0.5

[retry]
max_attempts = 5
"#,
        )
        .unwrap();

        assert_eq!(config.relevance_threshold, 0.5);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_delay(), Duration::from_secs(2));
        assert_eq!(config.max_context_tokens, 2000);
        assert_eq!(config.timeouts.search(), Duration::from_secs(30));
        assert_eq!(config.retry.max_delay(), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_grows_and_saturates_at_max_delay() {
        let retry = RetryConfig {
            max_attempts: 10,
            initial_delay_ms: 1000,
            multiplier: 4.0,
            max_delay_ms: 10_000,
        };

        let second = retry.next_delay(retry.initial_delay());
        assert_eq!(second, Duration::from_secs(4));
        assert_eq!(retry.next_delay(second), Duration::from_secs(10));

        let huge = RetryConfig {
            multiplier: f64::MAX,
            ..retry.clone()
        };
        assert_eq!(huge.next_delay(Duration::from_secs(1)), Duration::from_secs(10));
    }

    #[test]
    fn test_unusable_multiplier_keeps_delay() {
        for multiplier in [-2.0, 0.5, f64::NAN, f64::INFINITY] {
            let retry = RetryConfig {
                multiplier,
                ..RetryConfig::default()
            };
            assert_eq!(retry.next_delay(Duration::from_secs(2)), Duration::from_secs(2));
        }
    }

    #[test]
    fn test_retry_after_is_capped() {
        let retry = RetryConfig::default();
        assert_eq!(
            retry.wait_for(Duration::from_secs(2), Some(Duration::from_secs(3600))),
            Duration::from_secs(30)
        );
        assert_eq!(
            retry.wait_for(Duration::from_secs(2), Some(Duration::from_secs(5))),
            Duration::from_secs(5)
        );
        assert_eq!(retry.wait_for(Duration::from_secs(2), None), Duration::from_secs(2));
    }
}
