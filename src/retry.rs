// Bounded retry with exponential backoff for remote store calls. Every
// call the uploader and sweeper make goes through `RetryPolicy::run`; only
// transient failures (timeouts, connection errors, HTTP 429 and 5xx) are
// retried, anything else comes back on the first attempt.

use crate::config::Settings;
use crate::error::StoreError;
use std::thread;
use std::time::Duration;
use tracing::warn;

/// Upper bound on a single backoff sleep.
const MAX_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each one after.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.max_retries, settings.retry_base_delay())
    }

    /// Backoff before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(MAX_DELAY)
    }

    /// Run `call`, retrying transient failures up to `max_retries` times.
    pub fn run<T, F>(&self, what: &str, mut call: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Result<T, StoreError>,
    {
        let mut attempt = 0;
        loop {
            match call() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.delay_for(attempt);
                    warn!(
                        "{what}: {err} (retry {attempt}/{} in {delay:?})",
                        self.max_retries
                    );
                    thread::sleep(delay);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2))
    }
}
