//! Scripted providers and fixtures for exercising the ensemble without
//! network or CLI access.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use quorum_models::{Action, MarketData, ProviderSignal, Trend};
use rust_decimal::Decimal;

use crate::error::ProviderError;
use crate::provider::{ProviderRequest, SignalProvider};

/// A provider that answers with a fixed action after an optional delay.
///
/// Queued failures are returned first, one per call, before the scripted
/// answer is given. `panics` makes every call panic.
pub struct ScriptedProvider {
    id: String,
    action: Action,
    confidence: f64,
    delay: Duration,
    latency_ms: u64,
    stop_loss: Option<Decimal>,
    failures: Mutex<VecDeque<ProviderError>>,
    panics: bool,
    calls: AtomicU32,
}

impl ScriptedProvider {
    pub fn new(id: &str, action: Action, confidence: f64) -> Self {
        Self {
            id: id.to_string(),
            action,
            confidence,
            delay: Duration::ZERO,
            latency_ms: 250,
            stop_loss: None,
            failures: Mutex::new(VecDeque::new()),
            panics: false,
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Latency reported in the signal, independent of any real delay.
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_stop_loss(mut self, stop_loss: Decimal) -> Self {
        self.stop_loss = Some(stop_loss);
        self
    }

    pub fn failing_with(self, errors: impl IntoIterator<Item = ProviderError>) -> Self {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(errors);
        self
    }

    /// Fails every call with `error`.
    pub fn always_failing(id: &str, error: ProviderError) -> Self {
        Self::new(id, Action::Hold, 0.0).failing_with(std::iter::repeat(error).take(10_000))
    }

    pub fn panicking(id: &str) -> Self {
        Self {
            panics: true,
            ..Self::new(id, Action::Hold, 0.0)
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignalProvider for ScriptedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn generate(&self, _request: &ProviderRequest) -> Result<ProviderSignal, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panics {
            panic!("{} blew up", self.id);
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let failure = self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        if let Some(error) = failure {
            return Err(error);
        }
        Ok(ProviderSignal {
            provider_id: self.id.clone(),
            action: self.action,
            confidence: self.confidence,
            entry_price: None,
            stop_loss: self.stop_loss,
            take_profit: None,
            reasoning: format!("{} scripted {}", self.id, self.action),
            latency_ms: self.latency_ms,
            timestamp: Utc::now(),
        })
    }
}

/// A calm, mildly bullish snapshot.
pub fn sample_market(symbol: &str) -> MarketData {
    MarketData {
        symbol: symbol.to_string(),
        price: Decimal::new(100_00, 2),
        volume: 1_200_000.0,
        average_volume: 1_000_000.0,
        high_24h: Decimal::new(102_00, 2),
        low_24h: Decimal::new(98_50, 2),
        volatility: 0.018,
        trend: Trend::Bullish,
        momentum: 0.006,
        support: Some(Decimal::new(97_00, 2)),
        resistance: Some(Decimal::new(105_00, 2)),
        fear_greed_index: Some(55),
        timestamp: Utc::now(),
    }
}
