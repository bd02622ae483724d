//! Bounded retries with exponential backoff, and deadlines for round-trips.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

use sync_core::SyncError;

/// How often and how patiently a retryable operation is repeated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Policy with no waiting between attempts, for tests and dry runs.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Total attempts including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (1-based): `initial * 2^(retry-1)`,
    /// capped at `max_backoff`, plus up to 10% jitter.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(20);
        let base = self
            .initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff);
        let jitter_ms = (base.as_millis() / 10) as u64;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }

    /// Run `operation` until it succeeds, fails permanently, or the retries
    /// are spent. Only errors with [`SyncError::is_retryable`] are retried.
    pub async fn run<T, F, Fut>(&self, what: &str, mut operation: F) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let mut retry = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && retry < self.max_retries => {
                    retry += 1;
                    let delay = self.backoff_for(retry);
                    tracing::warn!(
                        "{what} failed (retry {retry}/{} in {delay:?}): {e}",
                        self.max_retries
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Bound one network round-trip by `limit`.
pub async fn with_deadline<T, F>(limit: Duration, what: &str, future: F) -> Result<T, SyncError>
where
    F: Future<Output = Result<T, SyncError>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::Timeout {
            operation: what.to_string(),
            elapsed: limit,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
        };
        let first = policy.backoff_for(1);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(110));
        let second = policy.backoff_for(2);
        assert!(second >= Duration::from_millis(200) && second <= Duration::from_millis(220));
        let capped = policy.backoff_for(10);
        assert!(capped >= Duration::from_millis(350) && capped <= Duration::from_millis(385));
    }

    #[test]
    fn test_attempts_include_first_try() {
        assert_eq!(RetryPolicy::immediate(0).max_attempts(), 1);
        assert_eq!(RetryPolicy::default().max_attempts(), 4);
    }

    #[tokio::test]
    async fn test_run_retries_transient_errors() {
        let calls = AtomicU32::new(0);
        let result = RetryPolicy::immediate(3)
            .run("flaky", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(SyncError::transient("connection reset"))
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(tokio_test::assert_ok!(result), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::immediate(2)
            .run("down", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SyncError::ConnectionUnavailable("refused".into()))
            })
            .await;
        assert!(matches!(result, Err(SyncError::ConnectionUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_does_not_retry_data_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::immediate(5)
            .run("insert", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SyncError::data("value too long"))
            })
            .await;
        tokio_test::assert_err!(result);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires() {
        let result: Result<(), _> = with_deadline(Duration::from_secs(1), "slow query", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(SyncError::Timeout { .. })));
    }
}
