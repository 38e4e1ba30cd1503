use std::future::Future;
use std::time::Duration;
use tracing::debug;

// Exponential backoff: attempt i (0-based) failing waits base_delay * multiplier^i
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration, // cap for a single backoff sleep
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }

        // inf and nan factors fall back to the cap
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let factor = self.multiplier.powi(exponent).max(0.0);

        Duration::try_from_secs_f64(self.base_delay.as_secs_f64() * factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

// last error is returned as-is
pub async fn retry_if<T, E, F, Fut, P>(policy: RetryPolicy, mut should_retry: P, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&E) -> bool,
    E: std::fmt::Display,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt + 1 >= attempts || !should_retry(&e) => return Err(e),
            Err(e) => {
                let delay = policy.delay_for(attempt);
                debug!(attempt = attempt + 1, ?delay, "attempt failed, retrying: {}", e);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
