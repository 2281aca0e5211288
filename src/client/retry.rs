use std::time::Duration;

use rand::Rng;

use super::error::ChatClientError;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep, then make the next attempt.
    Retry(Duration),
    /// Terminal error, surface it as is.
    Abort,
    /// Retryable, but out of attempts.
    Exhausted,
}

/// Exponential backoff: `base_delay * 2^attempt` before attempt `attempt + 1`.
///
/// `max_retries` is the total number of attempts, so the default of 3 means
/// attempts 0, 1 and 2. Zero is treated as one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Adds up to one `base_delay` of random slack to each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            jitter: false,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt));

        if !self.jitter {
            return delay;
        }

        let slack_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let slack = rand::thread_rng().gen_range(0..=slack_ms);
        delay.saturating_add(Duration::from_millis(slack))
    }

    pub fn decide(&self, attempt: u32, error: &ChatClientError) -> RetryDecision {
        if !error.is_retryable() {
            return RetryDecision::Abort;
        }

        if attempt + 1 < self.max_attempts() {
            RetryDecision::Retry(self.backoff_delay(attempt))
        } else {
            RetryDecision::Exhausted
        }
    }
}
