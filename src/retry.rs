//! Bounded retry with a fixed delay.
//!
//! Every network-facing operation in the crate goes through
//! [`RetryPolicy::run`]. A policy is an attempt ceiling, a fixed pause between
//! attempts and a predicate deciding which errors get another attempt.
//! Validation and session-state errors are never retried by the default
//! predicate.

use crate::error::{Error, Result};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Default number of attempts, including the first one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default pause between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Retry configuration applied at each network call site.
#[derive(Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
    retryable: fn(&Error) -> bool,
}

impl RetryPolicy {
    /// Creates a policy using [`Error::is_retryable`] as predicate.
    ///
    /// `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            retryable: Error::is_retryable,
        }
    }

    /// A policy that runs the operation exactly once.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Replaces the retryable-error predicate.
    ///
    /// Validation errors stay non-retryable whatever the predicate says.
    #[must_use]
    pub fn with_predicate(mut self, retryable: fn(&Error) -> bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Maximum number of attempts.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Pause between attempts.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    fn should_retry(&self, error: &Error) -> bool {
        !error.is_validation() && (self.retryable)(error)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt ceiling is reached. The last error is returned on exhaustion.
    ///
    /// `op` is called once per attempt and must build a fresh future each
    /// time. The pause between attempts is a sleep of the calling task.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) if self.backoff(operation, attempt, &error).await => attempt += 1,
                Err(error) => return Err(error),
            }
        }
    }

    /// Decides whether `error`, raised by attempt number `attempt`, gets
    /// another attempt. Sleeps for the delay and returns `true` if so.
    ///
    /// For call sites that hold `&mut` state across attempts and so drive
    /// their own loop instead of going through [`run`](Self::run).
    pub(crate) async fn backoff(&self, operation: &str, attempt: u32, error: &Error) -> bool {
        if attempt >= self.max_attempts || !self.should_retry(error) {
            if attempt > 1 {
                warn!(operation, attempts = attempt, error = %error, "Giving up");
            }
            return false;
        }

        warn!(
            operation,
            attempt,
            max_attempts = self.max_attempts,
            delay_ms = u64::try_from(self.delay.as_millis()).unwrap_or(u64::MAX),
            error = %error,
            "Attempt failed, retrying"
        );
        sleep(self.delay).await;
        true
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY)
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn transient() -> Error {
        Error::TcpConnect {
            target: "imap.example.com:993".into(),
            source: std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt() {
        let policy = RetryPolicy::default();
        let started = Instant::now();
        let mut attempts = 0;

        let result = policy
            .run("flaky", || {
                attempts += 1;
                let attempt = attempts;
                async move {
                    if attempt < 3 {
                        Err(transient())
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts, 3);
        assert!(started.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let policy = RetryPolicy::default();
        let mut attempts = 0;

        let result: Result<()> = policy
            .run("down", || {
                attempts += 1;
                async { Err(transient()) }
            })
            .await;

        assert!(matches!(result, Err(Error::TcpConnect { .. })));
        assert_eq!(attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_error_is_not_retried() {
        let policy = RetryPolicy::default().with_predicate(|_| true);
        let mut attempts = 0;

        let result: Result<()> = policy
            .run("invalid", || {
                attempts += 1;
                async {
                    Err(Error::InvalidEmailFormat {
                        email: "no-at-sign".into(),
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(Error::InvalidEmailFormat { .. })));
        assert_eq!(attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_error_is_not_retried() {
        let mut attempts = 0;
        let result: Result<()> = RetryPolicy::default()
            .run("closed", || {
                attempts += 1;
                async { Err(Error::SessionClosed) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_stops_at_ceiling() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let started = Instant::now();

        assert!(policy.backoff("unit", 1, &transient()).await);
        assert!(policy.backoff("unit", 2, &transient()).await);
        assert!(!policy.backoff("unit", 3, &transient()).await);
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[test]
    fn test_max_attempts_clamped() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts(), 1);
        assert_eq!(RetryPolicy::no_retry().max_attempts(), 1);
    }
}
