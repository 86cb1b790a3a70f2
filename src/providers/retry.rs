//! Retry with exponential backoff around every vendor call.
//!
//! ## Strategy
//!
//! `max_retries` is the total number of attempts. Between attempts the
//! policy sleeps `retry_delay * 2^attempt`: with the defaults (3 attempts,
//! 1 s) the wait sequence is 1 s → 2 s, then the last error is returned.
//! There is no jitter. A delay that overflows saturates at [`Duration::MAX`]
//! and is logged with `warn!`.
//!
//! Every [`CallError`] is retried the same way; an HTTP 401 is retried just
//! like a 503. Client initialisation errors never reach this loop.

use crate::config::ProviderConfig;
use crate::error::{CallError, ProviderError, ProviderResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Attempt count and base delay for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts. Zero is treated as one.
    pub max_retries: u32,
    /// Base delay, doubled after each failed attempt.
    pub retry_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
        }
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        Self::new(config.max_retries, config.retry_delay_duration())
    }

    /// A policy that makes exactly one attempt.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Number of attempts actually made.
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Sleep inserted after the failed attempt number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff(attempt) {
            Some(wait) if wait < Duration::MAX => wait,
            _ => {
                warn!(
                    "retry delay {:?} * 2^{} overflows; waiting indefinitely (check MAX_RETRIES and RETRY_DELAY)",
                    self.retry_delay, attempt
                );
                Duration::MAX
            }
        }
    }

    /// `retry_delay * 2^attempt`, or `None` when it does not fit a [`Duration`].
    fn backoff(&self, attempt: u32) -> Option<Duration> {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.retry_delay.checked_mul(factor))
    }

    /// Run `op` until it succeeds or the attempts are used up.
    ///
    /// On exhaustion returns [`ProviderError::CallFailed`] naming `provider`
    /// and wrapping the last attempt's error.
    pub async fn run<T, F, Fut>(&self, provider: &str, mut op: F) -> ProviderResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let attempts = self.attempts();
        let mut attempt = 0;

        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!("{}: succeeded on attempt {}/{}", provider, attempt + 1, attempts);
                    }
                    return Ok(value);
                }
                Err(e) if attempt + 1 >= attempts => {
                    return Err(ProviderError::CallFailed {
                        provider: provider.to_string(),
                        attempts,
                        source: e,
                    });
                }
                Err(e) => {
                    let wait = self.delay_for(attempt);
                    warn!(
                        "{}: retry {}/{} after {:.1}s: {}",
                        provider,
                        attempt + 1,
                        attempts,
                        wait.as_secs_f64(),
                        truncate(&e.to_string(), 50)
                    );
                    sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ProviderConfig::default())
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        format!("{}…", s.chars().take(max_chars).collect::<String>())
    }
}
