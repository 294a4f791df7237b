use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;

/// Bounded retry with fixed backoff. Retry count and backoff come from
/// configuration rather than being baked into each call site.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy::new(config.max_attempts, Duration::from_millis(config.backoff_ms))
    }
}

/// Run `op` up to `policy.max_attempts` times, sleeping `policy.backoff`
/// between attempts. The previous attempt's error is fed back into the next
/// attempt so the caller can build a corrective request from it. Returns the
/// last error when the budget is exhausted.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut(u32, Option<E>) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut last_err: Option<E> = None;
    let mut attempt = 1;
    loop {
        match op(attempt, last_err.take()).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                tracing::warn!(
                    "Attempt {}/{} failed: {}",
                    attempt,
                    policy.max_attempts,
                    e
                );
                if attempt >= policy.max_attempts {
                    return Err(e);
                }
                last_err = Some(e);
                attempt += 1;
                if !policy.backoff.is_zero() {
                    tokio::time::sleep(policy.backoff).await;
                }
            }
        }
    }
}
