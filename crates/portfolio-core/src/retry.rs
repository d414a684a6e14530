use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::PortfolioError;

/// Exponential backoff with jitter, composed with whatever operation needs
/// retrying rather than baked into one call site.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_factor: f64,
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            jitter: 0.2,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let jitter_span = base * self.jitter;
        let offset = rand::thread_rng().gen_range(-jitter_span..=jitter_span);
        Duration::from_secs_f64((base + offset).max(0.0))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5)
    }
}

/// Run `op` up to `policy.max_attempts` times, sleeping with exponential
/// backoff between attempts. Only errors for which
/// [`PortfolioError::is_retryable`] returns true are retried; any other
/// error returns immediately.
pub async fn retry<F, Fut, T>(policy: RetryPolicy, mut op: F) -> Result<T, PortfolioError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PortfolioError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < policy.max_attempts => {
                tracing::warn!(
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    error = %err,
                    "transient failure, retrying"
                );
                tokio::time::sleep(policy.delay_for(attempt)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
