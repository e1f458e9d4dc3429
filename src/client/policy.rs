use crate::resilience::backoff::Backoff;
use crate::Error;
use std::time::Duration;

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decision {
    Retry { delay: Duration },
    Fail,
}

/// Retry policy for upstream calls.
///
/// - `max_retries` retries after the first attempt, so at most `max_retries + 1` calls.
/// - Each attempt is bounded by `attempt_timeout`, independently of the caller's deadline.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Backoff,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Backoff::new(Duration::from_millis(2000), Duration::from_millis(8000)),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff = Backoff::new(base, cap);
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// `attempt` is 1-based: the first failure is attempt 1.
    pub(crate) fn decide(&self, err: &Error, attempt: u32) -> Decision {
        if err.is_retryable() && attempt <= self.max_retries {
            Decision::Retry {
                delay: self.backoff.delay(attempt),
            }
        } else {
            Decision::Fail
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;
    use crate::ErrorContext;

    #[test]
    fn retries_transient_errors_until_budget() {
        let policy = RetryPolicy::new()
            .with_max_retries(2)
            .with_backoff(Duration::from_millis(10), Duration::from_millis(100));
        let err = Error::Transport(TransportError::Status {
            status: 500,
            body: String::new(),
        });
        assert_eq!(
            policy.decide(&err, 1),
            Decision::Retry {
                delay: Duration::from_millis(10)
            }
        );
        assert_eq!(
            policy.decide(&err, 2),
            Decision::Retry {
                delay: Duration::from_millis(20)
            }
        );
        assert_eq!(policy.decide(&err, 3), Decision::Fail);
        assert_eq!(policy.max_attempts(), 3);
    }

    #[test]
    fn never_retries_non_transient_errors() {
        let policy = RetryPolicy::new();
        let err = Error::invalid_request_with_context("bad", ErrorContext::new());
        assert_eq!(policy.decide(&err, 1), Decision::Fail);
    }
}
