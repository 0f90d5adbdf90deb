use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, trace};

use crate::config::{DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY_MS};
use crate::fallible::{Failure, Fallible};

/// Fixed-delay, bounded retry for writes racing a store whose reads lag behind.
///
/// This is not a backoff policy: the delay never grows and there is no jitter.
/// It exists to ride out index-commit latency between a write and the read
/// that follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_RETRY_ATTEMPTS,
            Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        )
    }
}

/// Run `operation` until it succeeds or `policy.max_attempts` runs have failed.
///
/// Sleeps `policy.delay` between attempts (never after the last one). The
/// returned failure names the attempt count and carries the last reason.
pub async fn retry<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> Fallible<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Fallible<T>>,
{
    let mut last: Option<Failure> = None;

    for attempt in 1..=policy.max_attempts {
        match operation().await {
            Ok(value) => {
                trace!(attempt, "retried operation succeeded");
                return Ok(value);
            }
            Err(failure) => {
                debug!(
                    attempt,
                    max = policy.max_attempts,
                    error = %failure,
                    "operation failed"
                );
                last = Some(failure);
                if attempt < policy.max_attempts {
                    sleep(policy.delay).await;
                }
            }
        }
    }

    let reason = last
        .map(Failure::into_message)
        .unwrap_or_else(|| "no attempt was made".to_string());
    crate::fail!(
        "The operation did not succeed after {} attempts: {}",
        policy.max_attempts,
        reason
    )
}
