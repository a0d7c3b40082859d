//! Timeout and rate-limit retry around any [`Generator`].

use async_trait::async_trait;
use medroute_core::capability::{ChatMessage, GenerationConfig, GenerationError, Generator};
use medroute_core::config::RetryConfig;
use std::sync::Arc;
use std::time::Duration;

/// Wraps a generator with a per-attempt timeout and exponential backoff.
///
/// Only [`GenerationError::RateLimited`] is retried. The wait before the next
/// attempt is the larger of the current backoff and the server's
/// `retry_after`, never above the configured `max_delay_ms`. Timeouts and
/// other failures return immediately.
pub struct RetryingGenerator {
    inner: Arc<dyn Generator>,
    retry: RetryConfig,
    timeout: Duration,
}

impl RetryingGenerator {
    pub fn new(inner: Arc<dyn Generator>, retry: RetryConfig, timeout: Duration) -> Self {
        Self {
            inner,
            retry,
            timeout,
        }
    }

    async fn attempt(
        &self,
        messages: &[ChatMessage],
        config: GenerationConfig,
    ) -> Result<String, GenerationError> {
        match tokio::time::timeout(self.timeout, self.inner.generate(messages, config)).await {
            Ok(result) => result,
            Err(_) => Err(GenerationError::Timeout(self.timeout)),
        }
    }
}

#[async_trait]
impl Generator for RetryingGenerator {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        config: GenerationConfig,
    ) -> Result<String, GenerationError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut delay = self.retry.initial_delay();
        let mut attempt = 1;

        loop {
            match self.attempt(messages, config).await {
                Err(err) if err.is_rate_limited() && attempt < max_attempts => {
                    let wait = self.retry.wait_for(delay, err.retry_after());
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        wait_ms = wait.as_millis() as u64,
                        "Generation rate limited, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    delay = self.retry.next_delay(delay);
                    attempt += 1;
                }
                Err(err) => {
                    tracing::warn!(attempt, "Generation failed: {}", err);
                    return Err(err);
                }
                Ok(text) => return Ok(text),
            }
        }
    }
}
