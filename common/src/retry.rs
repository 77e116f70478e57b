// Retry strategy with exponential backoff and jitter
// Used around connection establishment for the database and SFTP gateways

use crate::config::RetryConfig;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry strategy trait for calculating retry delays
pub trait RetryStrategy: Send + Sync {
    /// Delay before the attempt following `attempt` (0-based).
    /// Returns None once no attempts remain.
    fn next_delay(&self, attempt: u32) -> Option<Duration>;

    /// Total number of attempts, including the first one
    fn max_attempts(&self) -> u32;

    fn should_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts()
    }
}

/// Exponential backoff retry strategy with jitter
/// Sequence: base, 2x base, 4x base, ... capped at max_delay
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    max_attempts: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    /// Jitter factor (0.0 to 1.0)
    jitter_factor: f64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 8000,
            jitter_factor: 0.1,
        }
    }
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(
        max_attempts: u32,
        base_delay_ms: u64,
        max_delay_ms: u64,
        jitter_factor: f64,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms,
            max_delay_ms,
            jitter_factor: jitter_factor.clamp(0.0, 1.0),
        }
    }

    pub fn from_settings(config: &RetryConfig) -> Self {
        Self::with_config(
            config.max_attempts,
            config.base_delay_ms,
            config.max_delay_ms,
            0.1,
        )
    }

    /// Exponential delay without jitter
    fn calculate_base_delay(&self, attempt: u32) -> u64 {
        let factor = 2_u64.saturating_pow(attempt);
        self.base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }

    fn add_jitter_ms(&self, base_delay_ms: u64) -> u64 {
        if self.jitter_factor == 0.0 {
            return base_delay_ms;
        }

        let jitter_range_ms = (base_delay_ms as f64 * self.jitter_factor) as u64;
        let jitter_ms = if jitter_range_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_range_ms)
        } else {
            0
        };

        base_delay_ms + jitter_ms
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if !self.should_retry(attempt) {
            return None;
        }
        let base_delay_ms = self.calculate_base_delay(attempt);
        Some(Duration::from_millis(self.add_jitter_ms(base_delay_ms)))
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Run an async operation, retrying while `is_retryable` says so
pub async fn retry_async<T, E, F, Fut>(
    strategy: &dyn RetryStrategy,
    operation_name: &str,
    is_retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                let delay = if is_retryable(&e) {
                    strategy.next_delay(attempt)
                } else {
                    None
                };
                let Some(delay) = delay else {
                    return Err(e);
                };
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts = strategy.max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Blocking counterpart of [`retry_async`], for use on blocking worker threads
pub fn retry_blocking<T, E, F>(
    strategy: &dyn RetryStrategy,
    operation_name: &str,
    is_retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(e) => {
                let delay = if is_retryable(&e) {
                    strategy.next_delay(attempt)
                } else {
                    None
                };
                let Some(delay) = delay else {
                    return Err(e);
                };
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts = strategy.max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Operation failed, retrying"
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}
