use riptide_execution::error::{ExchangeError, OrderError};
use thiserror::Error;

/// Engine error taxonomy.
///
/// * `Config` - fatal at startup, never retried.
/// * `Exchange` - retried with bounded backoff where tagged retryable;
///   otherwise surfaced as an event and pauses the affected strategy.
/// * `State` - recovery / persistence consistency failures.
/// * `Strategy` - analyzer failures; pause the strategy, never the engine.
/// * `InvariantViolation` - logic bug; triggers an emergency stop.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("exchange: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("state: {0}")]
    State(#[from] StateError),

    #[error("strategy: {0}")]
    Strategy(#[from] StrategyError),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid value for {option}: {message}")]
    InvalidValue { option: &'static str, message: String },

    #[error("failed to parse config: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Error)]
pub enum StateError {
    #[error("recovery already in progress for {0}")]
    RecoveryInProgress(String),

    #[error("store: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("inconsistent state: {0}")]
    Inconsistent(String),
}

#[derive(Debug, Clone, Error)]
pub enum StrategyError {
    #[error("missing required parameter: {0}")]
    MissingParameter(String),

    #[error("invalid parameter {parameter}: {message}")]
    InvalidParameter { parameter: String, message: String },

    #[error("analysis failed: {0}")]
    Analysis(String),

    #[error("strategy not found: {0}")]
    NotFound(String),

    #[error("strategy already registered: {0}")]
    AlreadyRegistered(String),
}

impl From<OrderError> for EngineError {
    fn from(error: OrderError) -> Self {
        EngineError::InvariantViolation(error.to_string())
    }
}
