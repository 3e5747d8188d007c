//! Bounded retry with exponential backoff.
//!
//! Only transient conditions are retried: an upstream that is rate limiting
//! or unavailable (see [`crate::error::ErrorKind::is_retryable`]). Anything else is
//! returned at once.
//!
//! With the defaults, attempts happen at roughly 0s, 1s and 3s: the delay
//! before attempt *n* (counting from 1) is `initial_delay * 2^(n-2)`.

use std::{future::Future, time::Duration};

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
        }
    }

    /// Delay before `attempt`, counting from 1.
    #[must_use]
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt < 2 {
            return Duration::ZERO;
        }
        let factor = 2_u32.saturating_pow(attempt - 2);
        self.initial_delay.saturating_mul(factor)
    }

    /// Runs `action` until it succeeds, fails terminally or the attempts run
    /// out.
    ///
    /// # Errors
    ///
    /// * the first non-retryable error of `action`
    /// * the last retryable error once `max_attempts` is reached
    /// * `Cancelled` if `cancel` fires while waiting between attempts
    pub async fn run<F, Fut, T>(&self, cancel: &CancellationToken, mut action: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match action().await {
                Ok(value) => return Ok(value),
                Err(e) if e.kind.is_retryable() && attempt < self.max_attempts => {
                    attempt += 1;
                    let delay = self.delay_before(attempt);
                    warn!(
                        "{e}; retrying in {}ms (attempt {attempt}/{})",
                        delay.as_millis(),
                        self.max_attempts
                    );

                    tokio::select! {
                        () = cancel.cancelled() => {
                            return Err(Error::cancelled("cancelled while backing off"));
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    if e.kind.is_retryable() {
                        debug!("giving up after {attempt} attempts: {e}");
                    }
                    return Err(e);
                }
            }
        }
    }
}
