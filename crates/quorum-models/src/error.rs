use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Invalid risk parameters: {0}")]
    RiskParameters(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}
