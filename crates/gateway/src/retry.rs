//! Time-bounded calls with bounded exponential-backoff retry.
//!
//! Every outbound call to the credential store or the storage backend goes
//! through [`with_timeout`] or [`with_retry`]; nothing here waits forever.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Deadline applied to each individual attempt.
    pub attempt_timeout: Duration,
    pub add_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            attempt_timeout: Duration::from_secs(2),
            add_jitter: true,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    #[must_use]
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_jitter(mut self, enable: bool) -> Self {
        self.add_jitter = enable;
        self
    }

    /// `base_delay * 2^attempt`, capped at `max_delay`, plus up to 25% jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 2u64.saturating_pow(attempt);
        let delay_ms = (self.base_delay.as_millis() as u64).saturating_mul(multiplier);
        let delay = Duration::from_millis(delay_ms.min(self.max_delay.as_millis() as u64));

        if !self.add_jitter {
            return delay;
        }
        let jitter_range = delay.as_millis() as u64 / 4;
        if jitter_range == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::thread_rng().gen_range(0..jitter_range))
    }
}

/// Errors that know whether another attempt could succeed.
pub trait RetryableError: Sized {
    fn is_retryable(&self) -> bool;

    /// The error an attempt produces when it misses its deadline.
    fn timed_out(after: Duration) -> Self;
}

pub async fn with_timeout<Fut, T, E>(limit: Duration, operation: Fut) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError,
{
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => result,
        Err(_) => Err(E::timed_out(limit)),
    }
}

pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        match with_timeout(config.attempt_timeout, operation()).await {
            Ok(result) => return Ok(result),
            Err(err) => {
                if !err.is_retryable() || attempt >= config.max_retries {
                    return Err(err);
                }

                let delay = config.delay_for_attempt(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after transient error"
                );

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
