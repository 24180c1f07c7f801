//! Bounded exponential backoff for provider submissions

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::{AppError, ProviderError, Result};

/// Capped retry schedule. Sleeps `unit * (2^attempt + jitter)` before each
/// retry, with `jitter` drawn from `[0, 1)`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, first try included
    pub attempts: u32,
    pub unit: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, unit: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            unit,
        }
    }

    /// Delay before the zero-based `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter: f64 = rand::thread_rng().gen_range(0.0..1.0);
        let factor = 2f64.powi(attempt.min(16) as i32) + jitter;
        self.unit.mul_f64(factor)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ProviderError>>,
    {
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                let delay = self.delay(attempt);
                warn!(
                    operation,
                    attempt = attempt + 1,
                    max_attempts = self.attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying provider call"
                );
                tokio::time::sleep(delay).await;
            }

            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => {
                    return Err(AppError::Provider {
                        operation,
                        source: e,
                    })
                }
                Err(e) if attempt + 1 >= self.attempts => {
                    return Err(AppError::ProviderExhausted {
                        operation,
                        attempts: self.attempts,
                        source: e,
                    })
                }
                Err(e) => {
                    warn!(operation, attempt = attempt + 1, error = %e, "Provider call failed");
                    attempt += 1;
                }
            }
        }
    }
}
