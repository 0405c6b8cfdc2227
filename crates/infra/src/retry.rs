//! Retry policy for units of work that lose a concurrency race.

use std::future::Future;
use std::time::Duration;

use crate::error::{RepositoryError, RepositoryResult};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Always at least 1.
    pub max_attempts: u32,
    /// Base delay; attempt `n` waits `n * backoff` before retrying.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Never retry.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Run `attempt` until it succeeds, fails with a non-retryable error, or
    /// the policy is exhausted (`ConcurrentModification`).
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut attempt: F) -> RepositoryResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RepositoryResult<T>>,
    {
        let mut n = 1;
        loop {
            match attempt().await {
                Err(err) if err.is_retryable() => {
                    if n >= self.max_attempts {
                        return Err(RepositoryError::concurrent(format!(
                            "{operation} gave up after {n} attempt(s): {err}"
                        )));
                    }
                    tracing::debug!(operation, attempt = n, error = %err, "retrying unit of work");
                    tokio::time::sleep(self.backoff * n).await;
                    n += 1;
                }
                other => return other,
            }
        }
    }
}
