use std::future::Future;
use std::time::Duration;

/// Errors that can tell whether the remote side asked us to slow down.
pub trait RateLimited {
    fn is_rate_limited(&self) -> bool;
}

/// Exponential backoff for rate-limited provider calls.
///
/// Only rate-limit failures are retried; anything else is returned at once.
/// With the defaults the call runs at most four times, sleeping 1s, 2s and 4s
/// between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            initial_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(retries: u32, initial_delay: Duration) -> Self {
        Self {
            retries,
            initial_delay,
        }
    }

    /// Delay before retry number `attempt` (zero based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.initial_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    pub async fn run<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RateLimited + std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.retries && e.is_rate_limited() => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        "Rate limited ({}). Retrying in {}ms (attempt {}/{})",
                        e,
                        delay.as_millis(),
                        attempt + 1,
                        self.retries
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
