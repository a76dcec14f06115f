// Unified error type for the position engine

use thiserror::Error;

pub type TradingResult<T> = Result<T, TradingError>;

#[derive(Debug, Error)]
pub enum TradingError {
    #[error("Market data error: {0}")]
    MarketData(String),

    /// A store mutation was rejected because it would violate an invariant.
    /// The store is left unchanged.
    #[error("Mutation rejected: {0}")]
    MutationRejected(String),

    #[error("Unknown position: {0}")]
    UnknownPosition(String),

    #[error("Order error: {0}")]
    Order(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shutdown timed out with {0} tasks still running")]
    ShutdownTimeout(usize),
}
