// Market data layer: quote source abstraction and failover

use async_trait::async_trait;
use thiserror::Error;

use crate::types::Quote;

pub mod failover;
pub mod http_source;

pub use failover::{FailoverManager, SourceStatus};
pub use http_source::HttpQuoteSource;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed quote payload: {0}")]
    Parse(String),

    #[error("non-positive last price {0}")]
    InvalidQuote(f64),
}

/// A realtime quote provider. Implementations are called from background
/// tasks and may be intermittently unavailable; the failover manager owns
/// all health accounting.
#[async_trait]
pub trait PriceSource: Send + Sync {
    fn name(&self) -> &str;

    /// Consecutive failures this source tolerates before it is marked
    /// unhealthy.
    fn max_errors(&self) -> u32;

    async fn fetch(&self, symbol: &str) -> Result<Quote, SourceError>;
}
