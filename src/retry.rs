use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::llm::ModelError;

/// Bounded fixed-delay retry budget for one kind of external call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), delay }
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is spent. Exhaustion yields `ModelError::RateLimited`.
///
/// The delay is only slept between attempts, never after the last one, so the
/// worst case blocks the caller for `(max_attempts - 1) * delay` plus the
/// attempts themselves.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, ModelError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ModelError>>,
{
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() => {
                debug!(attempt, max_attempts = attempts, error = %e, "retryable model error");
                if attempt < attempts {
                    tokio::time::sleep(policy.delay).await;
                }
            }
            Err(e) => return Err(e),
        }
    }
    Err(ModelError::RateLimited { attempts })
}
