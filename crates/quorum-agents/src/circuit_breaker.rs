//! Per-provider circuit breaker.
//!
//! After `failure_threshold` consecutive failures the breaker opens and every
//! call fails fast with `CircuitOpen` until `recovery_timeout` has elapsed.
//! The breaker then turns half-open and admits at most `success_threshold`
//! concurrent trial calls; anything beyond that keeps failing fast.
//! `success_threshold` successes close the breaker again and any failure
//! re-opens it.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use quorum_models::CircuitBreakerConfig;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::ProviderError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Observability view of one breaker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BreakerMetrics {
    pub provider: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Failed adapter calls since the process started.
    pub failure_count: u64,
    pub success_count: u64,
    /// Every `execute` call, including fail-fast rejections.
    pub total_requests: u64,
    pub average_response_time_ms: f64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    half_open_in_flight: u32,
    // Bumped on every entry into half-open so stale permits release nothing.
    half_open_epoch: u64,
    opened_at: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    failure_count: u64,
    success_count: u64,
    total_requests: u64,
    timed_calls: u64,
    total_response_time: Duration,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
            half_open_in_flight: 0,
            half_open_epoch: 0,
            opened_at: None,
            last_failure_at: None,
            failure_count: 0,
            success_count: 0,
            total_requests: 0,
            timed_calls: 0,
            total_response_time: Duration::ZERO,
        }
    }
}

pub struct CircuitBreaker {
    provider: String,
    failure_threshold: u32,
    success_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(provider: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        Self {
            provider: provider.into(),
            failure_threshold: config.failure_threshold.max(1),
            success_threshold: config.success_threshold.max(1),
            recovery_timeout: Duration::from_secs(config.recovery_timeout_seconds),
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    // Never held across an await, so a poisoned lock still holds consistent counters.
    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `call` through the breaker.
    ///
    /// If the returned future is dropped before `call` resolves (for example
    /// when an aggregation deadline abandons it), no outcome is recorded.
    pub async fn execute<T, F>(&self, call: F) -> Result<T, ProviderError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        let permit = {
            let mut inner = self.lock();
            inner.total_requests += 1;
            if inner.state == CircuitState::Open {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or(Duration::MAX);
                if elapsed >= self.recovery_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_successes = 0;
                    inner.half_open_in_flight = 0;
                    inner.half_open_epoch += 1;
                    info!(provider = %self.provider, "Circuit half-open, admitting trial calls");
                } else {
                    let remaining = self.recovery_timeout - elapsed;
                    return Err(ProviderError::CircuitOpen {
                        provider: self.provider.clone(),
                        retry_in_ms: remaining.as_millis() as u64,
                    });
                }
            }
            if inner.state == CircuitState::HalfOpen {
                if inner.half_open_in_flight >= self.success_threshold {
                    debug!(provider = %self.provider, "Half-open trial slots taken, failing fast");
                    return Err(ProviderError::CircuitOpen {
                        provider: self.provider.clone(),
                        retry_in_ms: 0,
                    });
                }
                inner.half_open_in_flight += 1;
                Some(HalfOpenPermit {
                    breaker: self,
                    epoch: inner.half_open_epoch,
                })
            } else {
                None
            }
        };

        let start = Instant::now();
        let result = call.await;
        let elapsed = start.elapsed();
        drop(permit);

        let mut inner = self.lock();
        inner.timed_calls += 1;
        inner.total_response_time += elapsed;
        match &result {
            Ok(_) => self.on_success(&mut inner),
            Err(e) => self.on_failure(&mut inner, e),
        }
        result
    }

    fn on_success(&self, inner: &mut BreakerInner) {
        inner.success_count += 1;
        inner.consecutive_failures = 0;
        if inner.state == CircuitState::HalfOpen {
            inner.half_open_successes += 1;
            if inner.half_open_successes >= self.success_threshold {
                inner.state = CircuitState::Closed;
                inner.half_open_successes = 0;
                inner.opened_at = None;
                info!(provider = %self.provider, "Circuit closed");
            }
        }
    }

    fn on_failure(&self, inner: &mut BreakerInner, error: &ProviderError) {
        inner.failure_count += 1;
        inner.consecutive_failures += 1;
        inner.last_failure_at = Some(Utc::now());

        let trip = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.consecutive_failures >= self.failure_threshold,
            CircuitState::Open => false,
        };
        if trip {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            inner.half_open_successes = 0;
            warn!(
                provider = %self.provider,
                consecutive_failures = inner.consecutive_failures,
                error = %error,
                "Circuit opened"
            );
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn metrics(&self) -> BreakerMetrics {
        let inner = self.lock();
        let next_attempt_at = match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened_at)) => {
                let remaining = self.recovery_timeout.saturating_sub(opened_at.elapsed());
                chrono::Duration::from_std(remaining)
                    .ok()
                    .map(|d| Utc::now() + d)
            }
            _ => None,
        };
        BreakerMetrics {
            provider: self.provider.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            total_requests: inner.total_requests,
            average_response_time_ms: if inner.timed_calls == 0 {
                0.0
            } else {
                inner.total_response_time.as_secs_f64() * 1_000.0 / inner.timed_calls as f64
            },
            last_failure_at: inner.last_failure_at,
            next_attempt_at,
        }
    }

    /// Administrative reset to `Closed`. Lifetime counters are kept.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.half_open_successes = 0;
        inner.half_open_in_flight = 0;
        inner.opened_at = None;
        info!(provider = %self.provider, "Circuit reset");
    }

    /// Emergency stop: open now, as if the provider had just failed.
    pub fn force_open(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.half_open_successes = 0;
        warn!(provider = %self.provider, "Circuit forced open");
    }
}

/// One admitted half-open trial. Released on drop, so abandoned calls free
/// their slot too.
struct HalfOpenPermit<'a> {
    breaker: &'a CircuitBreaker,
    epoch: u64,
}

impl Drop for HalfOpenPermit<'_> {
    fn drop(&mut self) {
        let mut inner = self.breaker.lock();
        if inner.half_open_epoch == self.epoch {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }
}
