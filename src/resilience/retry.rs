//! Retry with exponential backoff and jitter.
//!
//! Grounded in the teacher's `connectors::resilience::{BackoffStrategy,
//! RetryPolicy}`. Defaults match spec §4.3.1: initial 250 ms, factor 2,
//! jitter ±25%, cap 5 s, up to 4 attempts.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::DispatchError;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
    /// Jitter as a fraction of the computed delay, e.g. 0.25 for ±25%.
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(250),
            factor: 2.0,
            max_delay: Duration::from_secs(5),
            jitter_fraction: 0.25,
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let raw = self.initial_delay.as_millis() as f64 * self.factor.powi(attempt as i32);
        let capped = raw.min(self.max_delay.as_millis() as f64);

        if self.jitter_fraction <= 0.0 {
            return Duration::from_millis(capped as u64);
        }

        let jitter_span = capped * self.jitter_fraction;
        let jitter = rand::thread_rng().gen_range(-jitter_span..=jitter_span);
        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }

    /// Execute `f`, retrying only [`DispatchError::Transient`] failures up to
    /// `max_attempts` times. Logical and Fatal errors are returned
    /// immediately without retry.
    pub async fn execute<F, Fut, T>(&self, mut f: F) -> Result<T, DispatchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DispatchError>>,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt + 1 < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying after transient failure");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_retryable() {
                        warn!(max_attempts = self.max_attempts, error = %err, "exhausted retries");
                    }
                    return Err(err);
                }
            }
        }
    }
}
