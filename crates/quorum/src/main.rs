use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quorum::models::QuorumConfig;
use quorum::risk::StressConfig;
use quorum::Scheduler;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "quorum", about = "Multi-provider trading decision core")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/quorum.toml")]
    config: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Pretty-print the output JSON
    #[arg(long)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one decision cycle for a symbol
    Decide {
        #[arg(short, long)]
        symbol: String,
    },
    /// Decide periodically until interrupted
    Run {
        /// Comma-separated symbols; defaults to orchestrator.symbols
        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,
        #[arg(long)]
        interval_seconds: Option<u64>,
    },
    /// Show provider circuit and reliability state
    Health,
    /// Monte-Carlo stress test of the portfolio history
    Stress {
        #[arg(long, default_value_t = 1_000)]
        paths: usize,
        #[arg(long, default_value_t = 30)]
        horizon_days: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Scale applied to return deviations from the mean
        #[arg(long, default_value_t = 1.0)]
        volatility_shock: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing (respects RUST_LOG env var)
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    // Load config
    let config_str = std::fs::read_to_string(&cli.config)
        .with_context(|| format!("Failed to read config: {}", cli.config))?;
    let config: QuorumConfig =
        toml::from_str(&config_str).with_context(|| "Failed to parse config")?;

    let orchestrator =
        Arc::new(quorum::build_orchestrator(&config).context("Failed to build orchestrator")?);

    match cli.command {
        Command::Decide { symbol } => {
            let decision = orchestrator.make_trading_decision(&symbol).await;
            print_json(&decision, cli.pretty)?;
        }
        Command::Run {
            symbols,
            interval_seconds,
        } => {
            let symbols = if symbols.is_empty() {
                config.orchestrator.symbols.clone()
            } else {
                symbols
            };
            anyhow::ensure!(!symbols.is_empty(), "No symbols configured");
            let interval = Duration::from_secs(
                interval_seconds
                    .unwrap_or(config.orchestrator.interval_seconds)
                    .max(1),
            );

            let mut decisions = orchestrator.subscribe();
            let pretty = cli.pretty;
            let printer = tokio::spawn(async move {
                loop {
                    match decisions.recv().await {
                        Ok(decision) => {
                            if let Err(e) = print_json(&decision, pretty) {
                                tracing::error!(error = %e, "Failed to print decision");
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(skipped = n, "Decision printer lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });

            let scheduler = Scheduler::new(orchestrator.clone(), symbols, interval);
            let cancel = scheduler.cancel_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Interrupt received");
                    cancel.cancel();
                }
            });

            let rounds = scheduler.run().await;
            printer.abort();
            tracing::info!(rounds, "Scheduler stopped");
        }
        Command::Health => {
            let health = serde_json::json!({
                "providers": orchestrator.provider_health(),
                "cache": orchestrator.cache_stats().await,
                "risk_parameters": orchestrator.risk_parameters(),
            });
            print_json(&health, cli.pretty)?;
        }
        Command::Stress {
            paths,
            horizon_days,
            seed,
            volatility_shock,
        } => {
            let stress = StressConfig {
                paths,
                horizon_days,
                seed,
                volatility_shock,
            };
            let result = orchestrator
                .stress_test(&stress)
                .await
                .context("Stress test failed")?;
            print_json(&result, cli.pretty)?;
        }
    }

    Ok(())
}

/// Output as JSON to stdout
fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let output = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{output}");
    Ok(())
}
