use std::time::Duration;

/// Retry budget and delays of the request retrier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; a call makes at most `max_retries + 1` attempts
    pub max_retries: u32,
    /// Base of the linear backoff after a transport failure
    pub transport_backoff: Duration,
    /// Base of the linear backoff after a non-2xx status
    pub status_backoff: Duration,
    /// Fixed pause after a block signal (412)
    pub block_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1000,
            transport_backoff: Duration::from_millis(100),
            status_backoff: Duration::from_secs(1),
            block_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Policy with tiny delays, for tests and tight loops
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            transport_backoff: Duration::from_millis(1),
            status_backoff: Duration::from_millis(1),
            block_delay: Duration::from_millis(1),
        }
    }

    pub fn transport_delay(&self, attempt: u32) -> Duration {
        linear(self.transport_backoff, attempt)
    }

    pub fn status_delay(&self, attempt: u32) -> Duration {
        linear(self.status_backoff, attempt)
    }

    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// `base * (attempt + 1)`
fn linear(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(attempt.saturating_add(1))
}
