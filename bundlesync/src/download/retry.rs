//! Linear retry back-off shared by every download path.

use std::time::Duration;

use tracing::warn;

use crate::cancel::{ensure_active, sleep_cancellable, CancellationToken};
use crate::error::{ProvisionError, ProvisionResult, TransferError};

/// Default number of retries after the first attempt.
pub const DEFAULT_RETRIES: u32 = 3;

/// Default base delay between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Retry bound and back-off for a transfer.
///
/// The wait before retry `n` (1-based) is `n × base_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub retries: u32,
    /// Back-off unit.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRIES, DEFAULT_RETRY_DELAY)
    }
}

impl RetryPolicy {
    /// Create a policy.
    pub fn new(retries: u32, base_delay: Duration) -> Self {
        Self {
            retries,
            base_delay,
        }
    }

    /// Total attempts including the first.
    pub fn attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Delay before the given retry.
    pub fn delay_before(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(retry)
    }

    /// Run `attempt` until it succeeds or the policy is exhausted.
    ///
    /// The token is checked before every attempt and during back-off.
    /// `TransferError::Cancelled` is never retried, and errors that are not
    /// [retryable](TransferError::is_retryable) fail at once.
    pub fn run<T, F>(
        &self,
        url: &str,
        cancel: &CancellationToken,
        mut attempt: F,
    ) -> ProvisionResult<T>
    where
        F: FnMut(u32) -> Result<T, TransferError>,
    {
        let attempts = self.attempts();
        let mut current = 1;

        loop {
            ensure_active(cancel)?;

            match attempt(current) {
                Ok(value) => return Ok(value),
                Err(TransferError::Cancelled) => return Err(ProvisionError::Cancelled),
                Err(_) if cancel.is_cancelled() => return Err(ProvisionError::Cancelled),
                Err(source) if current >= attempts || !source.is_retryable() => {
                    return Err(ProvisionError::DownloadFailed {
                        url: url.to_string(),
                        attempts: current,
                        source,
                    });
                }
                Err(e) => {
                    let delay = self.delay_before(current);
                    warn!(
                        url = %url,
                        attempt = current,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transfer attempt failed, retrying"
                    );
                    sleep_cancellable(cancel, delay)?;
                    current += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast(retries: u32) -> RetryPolicy {
        RetryPolicy::new(retries, Duration::ZERO)
    }

    #[test]
    fn test_linear_delays() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        assert_eq!(policy.attempts(), 4);
        assert_eq!(policy.delay_before(1), Duration::from_millis(100));
        assert_eq!(policy.delay_before(3), Duration::from_millis(300));
    }

    #[test]
    fn test_run_succeeds_after_failures() {
        let token = CancellationToken::new();
        let mut calls = 0;
        let result = fast(3).run("u", &token, |_| {
            calls += 1;
            if calls < 3 {
                Err(TransferError::Status {
                    url: "u".to_string(),
                    status: 500,
                })
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn test_run_exhausts_with_last_error() {
        let token = CancellationToken::new();
        let mut calls = 0;
        let err = fast(2)
            .run::<(), _>("u", &token, |attempt| {
                calls += 1;
                Err(TransferError::Status {
                    url: "u".to_string(),
                    status: 500 + attempt as u16,
                })
            })
            .unwrap_err();

        assert_eq!(calls, 3);
        match err {
            ProvisionError::DownloadFailed {
                attempts, source, ..
            } => {
                assert_eq!(attempts, 3);
                assert!(matches!(source, TransferError::Status { status: 503, .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_run_does_not_retry_cancellation() {
        let token = CancellationToken::new();
        let mut calls = 0;
        let err = fast(5)
            .run::<(), _>("u", &token, |_| {
                calls += 1;
                Err(TransferError::Cancelled)
            })
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_run_does_not_retry_ignored_range() {
        let token = CancellationToken::new();
        let mut calls = 0;
        let err = fast(5)
            .run::<(), _>("u", &token, |_| {
                calls += 1;
                Err(TransferError::RangeIgnored {
                    url: "u".to_string(),
                })
            })
            .unwrap_err();

        assert_eq!(calls, 1);
        assert!(matches!(
            err,
            ProvisionError::DownloadFailed {
                attempts: 1,
                source: TransferError::RangeIgnored { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_run_cancelled_at_entry() {
        let token = CancellationToken::new();
        token.cancel();
        let mut calls = 0;
        let err = fast(5)
            .run("u", &token, |_| {
                calls += 1;
                Ok(())
            })
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(calls, 0);
    }
}
