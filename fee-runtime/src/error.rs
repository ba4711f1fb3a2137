use alloy::primitives::Address;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeeError {
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Unauthorized caller {caller}, expected {expected}")]
    Unauthorized { caller: Address, expected: Address },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Fund not found: {0}")]
    FundNotFound(Address),

    #[error("Invalid gross asset value for fund {0}")]
    InvalidGav(Address),

    #[error("Math overflow in {0}")]
    MathOverflow(&'static str),

    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<serde_json::Error> for FeeError {
    fn from(e: serde_json::Error) -> Self {
        FeeError::ConfigError(e.to_string())
    }
}
