pub mod adjustments;
pub mod correlation;
pub mod drawdown;
pub mod engine;
pub mod error;
pub mod stress;
pub mod var;

pub use correlation::{CorrelationModel, HistoricalCorrelationModel, SectorCorrelationModel};
pub use engine::{DynamicRiskEngine, RiskInput};
pub use error::RiskError;
pub use stress::{run_stress_test, StressConfig, StressTestResult};
