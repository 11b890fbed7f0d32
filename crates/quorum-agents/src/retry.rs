//! Exponential backoff with jitter around one provider call.
//!
//! Retry wraps the circuit breaker: an open breaker fails fast with
//! `CircuitOpen`, which ends the loop immediately without sleeping.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use quorum_models::RetryConfig;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ProviderError;

/// One attempt of a retried call. The history is scoped to that call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryAttempt {
    pub attempt_number: u32,
    /// Backoff slept before this attempt started.
    pub delay_ms: u64,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay after failed attempt `attempt` (1-based), before jitter:
    /// `min(initial × multiplier^(attempt-1), max)`.
    pub fn capped_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let raw = self.config.initial_delay_ms as f64 * self.config.multiplier.powi(exponent);
        let capped = raw.min(self.config.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Full delay after failed attempt `attempt`, with a jitter fraction drawn
    /// from `[min_jitter, max_jitter]` of the capped delay.
    pub fn delay_for<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let capped = self.capped_delay(attempt);
        let fraction = if self.config.max_jitter > self.config.min_jitter {
            rng.gen_range(self.config.min_jitter..=self.config.max_jitter)
        } else {
            self.config.min_jitter
        };
        capped + capped.mul_f64(fraction.max(0.0))
    }

    /// Upper bound on total backoff for a fully exhausted sequence.
    pub fn max_total_delay(&self) -> Duration {
        Duration::from_millis(self.config.max_delay_ms)
            .mul_f64(self.config.max_attempts as f64 * (1.0 + self.config.max_jitter))
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number. Non-retryable errors
    /// (including `CircuitOpen`) are returned as-is; exhaustion returns
    /// `RetryExhausted` with the whole attempt history.
    pub async fn execute<T, F, Fut>(&self, provider: &str, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempts: Vec<RetryAttempt> = Vec::with_capacity(max_attempts as usize);
        let mut delay = Duration::ZERO;

        for attempt in 1..=max_attempts {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let started_at = Utc::now();

            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(provider, attempt, "Provider call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    attempts.push(RetryAttempt {
                        attempt_number: attempt,
                        delay_ms: delay.as_millis() as u64,
                        error: Some(e.to_string()),
                        timestamp: started_at,
                    });
                    if attempt < max_attempts {
                        delay = {
                            let mut rng = rand::thread_rng();
                            self.delay_for(attempt, &mut rng)
                        };
                        warn!(
                            provider,
                            attempt,
                            error = %e,
                            backoff_ms = delay.as_millis() as u64,
                            "Retryable provider error"
                        );
                    }
                }
            }
        }

        warn!(provider, attempts = attempts.len(), "Retries exhausted");
        Err(ProviderError::RetryExhausted {
            provider: provider.to_string(),
            attempts,
        })
    }
}
