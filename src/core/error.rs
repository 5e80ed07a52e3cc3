use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("simulation has not been started")]
    NotStarted,

    #[error("year {year_index} is awaiting a transfer (shortfall {shortfall:.2})")]
    StateConflict { year_index: u32, shortfall: f64 },

    #[error("invalid transfer: {0}")]
    InvalidTransfer(String),

    #[error("correlation matrix cannot be decomposed: {0}")]
    Decomposition(String),
}
