use quorum_models::ValidationError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RiskError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Stress test needs at least {required} portfolio returns, got {actual}")]
    InsufficientHistory { required: usize, actual: usize },

    #[error("Invalid stress configuration: {0}")]
    InvalidStressConfig(String),
}
