//! Bounded retry with exponential backoff for fatal-class collaborator errors.
//!
//! Only transient failures are retried; the last error escalates unchanged.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::collab::{Completion, EmbeddingClient, OutputShape, Prompt, ReasoningClient};
use crate::domain::{MemoryBackendFailure, ReasoningFailure};

/// Retry configuration shared by reasoning and embedding wrappers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retries (0 = run once).
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries (milliseconds).
    pub backoff_base_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_base_ms: 500,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff_base_ms: 0,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(
            self.backoff_base_ms
                .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1))),
        )
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or the policy
/// is exhausted.
pub async fn with_retry<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    label: &str,
    is_transient: P,
    op: F,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_retries && is_transient(&err) => {
                attempt += 1;
                let delay = policy.delay_for(attempt);
                warn!(
                    op = %label,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Reasoning client that retries transient failures.
pub struct RetryingReasoning {
    inner: Arc<dyn ReasoningClient>,
    policy: RetryPolicy,
}

impl RetryingReasoning {
    pub fn new(inner: Arc<dyn ReasoningClient>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl ReasoningClient for RetryingReasoning {
    async fn complete(
        &self,
        prompt: &Prompt,
        shape: Option<&OutputShape>,
    ) -> Result<Completion, ReasoningFailure> {
        let label = format!("reasoning:{}", prompt.node);
        with_retry(&self.policy, &label, ReasoningFailure::is_transient, || {
            self.inner.complete(prompt, shape)
        })
        .await
    }
}

/// Embedding client that retries transient failures.
pub struct RetryingEmbedder {
    inner: Arc<dyn EmbeddingClient>,
    policy: RetryPolicy,
}

impl RetryingEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingClient>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl EmbeddingClient for RetryingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryBackendFailure> {
        with_retry(&self.policy, "embed", MemoryBackendFailure::is_transient, || {
            self.inner.embed(text)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            backoff_base_ms: 1,
        }
    }

    #[test]
    fn test_default_policy() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_retries, 2);
        assert_eq!(p.backoff_base_ms, 500);
    }

    #[test]
    fn test_backoff_is_exponential() {
        let p = RetryPolicy {
            max_retries: 5,
            backoff_base_ms: 100,
        };
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(2), Duration::from_millis(200));
        assert_eq!(p.delay_for(3), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_transient_error_recovers() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, ReasoningFailure> = with_retry(
            &fast(),
            "test",
            ReasoningFailure::is_transient,
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(ReasoningFailure::RateLimited)
                    } else {
                        Ok(n)
                    }
                }
            },
        )
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), ReasoningFailure> = with_retry(
            &fast(),
            "test",
            ReasoningFailure::is_transient,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ReasoningFailure::Rejected("bad".into())) }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_escalate() {
        let calls = AtomicU32::new(0);
        let result: Result<(), MemoryBackendFailure> = with_retry(
            &fast(),
            "test",
            MemoryBackendFailure::is_transient,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(MemoryBackendFailure::Embedding("503".into())) }
            },
        )
        .await;
        assert!(matches!(result, Err(MemoryBackendFailure::Embedding(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
