use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::orchestrator::DecisionOrchestrator;

/// Periodic decision loop. Every tick runs one cycle per symbol
/// concurrently and waits for the round to finish before the next tick.
pub struct Scheduler {
    orchestrator: Arc<DecisionOrchestrator>,
    symbols: Vec<String>,
    interval: Duration,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<DecisionOrchestrator>, symbols: Vec<String>, interval: Duration) -> Self {
        Self {
            orchestrator,
            symbols,
            interval,
            cancel: CancellationToken::new(),
        }
    }

    /// Returns a CancellationToken that can be used to trigger shutdown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until cancelled. Returns the number of completed rounds.
    pub async fn run(&self) -> u64 {
        tracing::info!(
            symbols = ?self.symbols,
            interval_secs = self.interval.as_secs(),
            "Decision scheduler starting"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut rounds = 0;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!(rounds, "Decision scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.run_round().await;
                    rounds += 1;
                }
            }
        }
        rounds
    }

    async fn run_round(&self) {
        let mut join_set = JoinSet::new();
        for symbol in &self.symbols {
            let orchestrator = Arc::clone(&self.orchestrator);
            let symbol = symbol.clone();
            join_set.spawn(async move { orchestrator.make_trading_decision(&symbol).await });
        }

        let mut executed = 0;
        while let Some(result) = join_set.join_next().await {
            match result {
                Ok(decision) if decision.should_execute => executed += 1,
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Decision task failed"),
            }
        }
        tracing::info!(symbols = self.symbols.len(), executed, "Decision round complete");
    }
}
