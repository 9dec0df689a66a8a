//! Busy-retry for whole storage transactions
//!
//! SQLite reports write contention as `SQLITE_BUSY`/`SQLITE_LOCKED` (and their
//! extended codes, e.g. `SQLITE_BUSY_SNAPSHOT`). The operation passed in must be
//! a complete unit of work: a failed attempt has already rolled back, so running
//! it again can never double-apply anything.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::core::error::{PurchasingError, PurchasingResult};

/// Default attempt budget
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Bounded exponential backoff
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry; doubles each retry
    pub base_delay: Duration,
    /// Cap for a single delay
    pub max_delay: Duration,
    /// Caller deadline, checked only before an attempt starts
    pub call_budget: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(500),
            call_budget: None,
        }
    }
}

impl RetryPolicy {
    /// Delay after the failed attempt with zero-based index `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `operation` until it succeeds, fails with a non-busy error, or the
/// attempt budget is exhausted.
pub async fn with_busy_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut f: F,
) -> PurchasingResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PurchasingResult<T>>,
{
    let started = Instant::now();
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 0..max_attempts {
        if let Some(budget) = policy.call_budget
            && attempt > 0
            && started.elapsed() >= budget
        {
            tracing::warn!(operation, attempt, "Deadline reached before retry");
            return Err(PurchasingError::DeadlineExceeded { operation });
        }

        match f().await {
            Err(e) if e.is_busy() => {
                if attempt + 1 >= max_attempts {
                    tracing::error!(
                        operation,
                        attempts = max_attempts,
                        error = %e,
                        "Storage still busy, giving up"
                    );
                    break;
                }
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    operation,
                    attempt = attempt + 1,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Storage busy, retrying: {e}"
                );
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }

    Err(PurchasingError::StorageBusy {
        operation,
        attempts: max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::RepoError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            call_budget: None,
        }
    }

    fn busy() -> PurchasingError {
        PurchasingError::Storage(RepoError::Busy("database is locked".into()))
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(20));
        assert_eq!(policy.delay_for(1), Duration::from_millis(40));
        assert_eq!(policy.delay_for(2), Duration::from_millis(80));
        assert_eq!(policy.delay_for(10), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_busy() {
        let calls = AtomicU32::new(0);
        let result = with_busy_retry(&fast_policy(), "test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(busy())
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_budget_is_fatal() {
        let calls = AtomicU32::new(0);
        let result: PurchasingResult<()> = with_busy_retry(&fast_policy(), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(busy())
        })
        .await;

        assert!(matches!(
            result,
            Err(PurchasingError::StorageBusy { attempts: 5, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_expected_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: PurchasingResult<()> = with_busy_retry(&fast_policy(), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(PurchasingError::Validation("quantity must be positive".into()))
        })
        .await;

        assert!(matches!(result, Err(PurchasingError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deadline_checked_between_attempts() {
        let policy = RetryPolicy {
            call_budget: Some(Duration::ZERO),
            ..fast_policy()
        };
        let calls = AtomicU32::new(0);
        let result: PurchasingResult<()> = with_busy_retry(&policy, "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(busy())
        })
        .await;

        assert!(matches!(result, Err(PurchasingError::DeadlineExceeded { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
