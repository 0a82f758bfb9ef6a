use crate::engine::cancel::{ContextError, RunContext};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::info;

/// What a single send attempt produced, as seen by a retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    Status(u16),
    Timeout,
    Transport,
}

/// Decides whether an attempt should be retried. Implementations must not
/// sleep or perform I/O; attempt counting and backoff belong to the caller.
pub trait RetryPolicy: Send + Sync {
    fn should_retry(&self, ctx: &RunContext, attempt: &Attempt) -> Result<bool, ContextError>;
}

#[derive(Debug, Clone, Default)]
pub struct StatusRetryPolicy {
    retryable: BTreeSet<u16>,
    retry_on_timeout: bool,
}

impl StatusRetryPolicy {
    pub fn new(retryable: BTreeSet<u16>) -> Self {
        Self {
            retryable,
            retry_on_timeout: false,
        }
    }

    pub fn retry_on_timeout(mut self, enabled: bool) -> Self {
        self.retry_on_timeout = enabled;
        self
    }
}

impl RetryPolicy for StatusRetryPolicy {
    fn should_retry(&self, ctx: &RunContext, attempt: &Attempt) -> Result<bool, ContextError> {
        if let Some(cause) = ctx.err() {
            return Err(cause);
        }

        let retry = match attempt {
            Attempt::Status(status) => self.retryable.contains(status),
            Attempt::Timeout => self.retry_on_timeout,
            Attempt::Transport => false,
        };

        if retry {
            info!(?attempt, "retrying");
        }
        Ok(retry)
    }
}

/// Exponential backoff bounded by `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub min: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    /// Wait before retry number `retry` (0-based). A server-provided
    /// `Retry-After` replaces the exponential value but stays within bounds.
    pub fn delay(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(retry_after) = retry_after {
            return retry_after.clamp(self.min, self.max.max(self.min));
        }

        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.min
            .checked_mul(factor)
            .map_or(self.max, |wait| wait.min(self.max))
    }
}

/// Statuses for which a `Retry-After` header is honoured.
pub fn honours_retry_after(status: u16) -> bool {
    matches!(status, 429 | 503)
}

pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(statuses: &[u16]) -> StatusRetryPolicy {
        StatusRetryPolicy::new(statuses.iter().copied().collect())
    }

    #[test]
    fn retries_configured_status() {
        let (_handle, ctx) = RunContext::new();
        let policy = policy(&[503]);
        assert_eq!(policy.should_retry(&ctx, &Attempt::Status(503)), Ok(true));
        assert_eq!(policy.should_retry(&ctx, &Attempt::Status(200)), Ok(false));
        assert_eq!(policy.should_retry(&ctx, &Attempt::Status(500)), Ok(false));
    }

    #[test]
    fn empty_set_never_retries_statuses() {
        let (_handle, ctx) = RunContext::new();
        let policy = policy(&[]);
        for status in [200, 301, 404, 500, 503] {
            assert_eq!(policy.should_retry(&ctx, &Attempt::Status(status)), Ok(false));
        }
    }

    #[test]
    fn canceled_context_refuses_retry_for_any_attempt() {
        let (handle, ctx) = RunContext::new();
        handle.cancel();
        let policy = policy(&[503]).retry_on_timeout(true);
        for attempt in [
            Attempt::Status(503),
            Attempt::Status(200),
            Attempt::Timeout,
            Attempt::Transport,
        ] {
            assert_eq!(
                policy.should_retry(&ctx, &attempt),
                Err(ContextError::Canceled)
            );
        }
    }

    #[test]
    fn expired_deadline_surfaces_deadline_exceeded() {
        let (_handle, ctx) = RunContext::new();
        let ctx = ctx.with_timeout(Duration::ZERO);
        assert_eq!(
            policy(&[503]).should_retry(&ctx, &Attempt::Status(503)),
            Err(ContextError::DeadlineExceeded)
        );
    }

    #[test]
    fn timeout_retry_is_opt_in() {
        let (_handle, ctx) = RunContext::new();
        assert_eq!(policy(&[503]).should_retry(&ctx, &Attempt::Timeout), Ok(false));
        assert_eq!(
            policy(&[503])
                .retry_on_timeout(true)
                .should_retry(&ctx, &Attempt::Timeout),
            Ok(true)
        );
        assert_eq!(
            policy(&[503])
                .retry_on_timeout(true)
                .should_retry(&ctx, &Attempt::Transport),
            Ok(false)
        );
    }

    #[test]
    fn backoff_doubles_until_max() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(backoff.delay(0, None), Duration::from_secs(1));
        assert_eq!(backoff.delay(1, None), Duration::from_secs(2));
        assert_eq!(backoff.delay(4, None), Duration::from_secs(16));
        assert_eq!(backoff.delay(5, None), Duration::from_secs(30));
        assert_eq!(backoff.delay(40, None), Duration::from_secs(30));
    }

    #[test]
    fn backoff_clamps_retry_after() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(
            backoff.delay(0, Some(Duration::from_secs(7))),
            Duration::from_secs(7)
        );
        assert_eq!(
            backoff.delay(0, Some(Duration::from_secs(3600))),
            Duration::from_secs(30)
        );
        assert_eq!(backoff.delay(3, Some(Duration::ZERO)), Duration::from_secs(1));
    }

    #[test]
    fn parse_retry_after_accepts_seconds_only() {
        assert_eq!(parse_retry_after(" 5 "), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
        assert!(honours_retry_after(503));
        assert!(honours_retry_after(429));
        assert!(!honours_retry_after(502));
    }
}
