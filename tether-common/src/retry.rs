//! Bounded retry with a fixed delay.
//!
//! Used for model downloads, port reclamation and the tunnel liveness poll.
//! The delay is only slept *between* attempts: a policy of `n` attempts
//! sleeps at most `n - 1` times.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Retry policy: total attempts (including the first) and the pause between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn fixed(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// One attempt, no retry.
    pub const fn once() -> Self {
        Self {
            attempts: 1,
            delay: Duration::ZERO,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.attempts.max(1)
    }
}

/// Every attempt failed; carries the last error.
#[derive(Debug, Error)]
#[error("gave up after {attempts} attempt(s): {last}")]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last: E,
}

/// Run `op` until it succeeds or the policy's attempts are used up.
pub async fn run_with_retry<F, Fut, T, E>(
    phase: &str,
    policy: &RetryPolicy,
    op: F,
) -> Result<T, RetryExhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    run_with_retry_if(phase, policy, op, |_| true).await
}

/// Like [`run_with_retry`], but an error for which `retryable` returns
/// false ends the loop immediately.
pub async fn run_with_retry_if<F, Fut, T, E, R>(
    phase: &str,
    policy: &RetryPolicy,
    mut op: F,
    retryable: R,
) -> Result<T, RetryExhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
    R: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 1;

    loop {
        debug!(phase, attempt, max_attempts, "starting attempt");

        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    info!(phase, attempt, "attempt succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if attempt < max_attempts && retryable(&err) => {
                warn!(phase, attempt, max_attempts, error = %err, "attempt failed, retrying");
                sleep(policy.delay).await;
                attempt += 1;
            }
            Err(err) => {
                warn!(phase, attempt, error = %err, "giving up");
                return Err(RetryExhausted {
                    attempts: attempt,
                    last: err,
                });
            }
        }
    }
}

/// Evaluate `check` until it returns true. Returns the attempt that
/// satisfied it, or `None` once the attempts are used up.
pub async fn poll_until<F, Fut>(phase: &str, policy: &RetryPolicy, mut check: F) -> Option<u32>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = bool>,
{
    let max_attempts = policy.max_attempts();
    for attempt in 1..=max_attempts {
        if check(attempt).await {
            debug!(phase, attempt, "condition met");
            return Some(attempt);
        }
        if attempt < max_attempts {
            debug!(phase, attempt, delay_ms = policy.delay.as_millis() as u64, "condition not met");
            sleep(policy.delay).await;
        }
    }
    warn!(phase, attempts = max_attempts, "condition never met");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    fn quick(attempts: u32) -> RetryPolicy {
        RetryPolicy::fixed(attempts, Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_retry_succeeds_on_third_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = run_with_retry("download", &quick(3), move |attempt| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(format!("timeout on attempt {attempt}"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausted_reports_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let err = run_with_retry("download", &quick(3), move |attempt| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Err::<(), _>(format!("failure {attempt}")) }
        })
        .await
        .unwrap_err();

        assert_eq!(err.attempts, 3);
        assert_eq!(err.last, "failure 3");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(err.to_string().contains("3 attempt"));
    }

    #[tokio::test]
    async fn test_no_delay_after_final_attempt() {
        let policy = RetryPolicy::fixed(2, Duration::from_millis(200));
        let start = Instant::now();
        let _ = run_with_retry("slow", &policy, |_| async { Err::<(), _>("nope") }).await;
        let elapsed = start.elapsed();

        // One pause between two attempts, none after the last.
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(390), "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_early() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let err = run_with_retry_if(
            "liveness",
            &quick(5),
            move |attempt| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 2 {
                        Err::<(), _>("process exited")
                    } else {
                        Err("connection refused")
                    }
                }
            },
            |err| *err != "process exited",
        )
        .await
        .unwrap_err();

        assert_eq!(err.attempts, 2);
        assert_eq!(err.last, "process exited");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_tries_once() {
        let result = run_with_retry("once", &RetryPolicy::fixed(0, Duration::ZERO), |_| async {
            Ok::<_, String>("done")
        })
        .await;
        assert_eq!(result.unwrap(), "done");
    }

    #[tokio::test]
    async fn test_poll_until_reports_attempt() {
        let attempt = poll_until("liveness", &quick(5), |attempt| async move { attempt == 2 }).await;
        assert_eq!(attempt, Some(2));

        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let attempt = poll_until("liveness", &quick(4), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { false }
        })
        .await;
        assert_eq!(attempt, None);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
