// Order execution boundary

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TradingResult;
use crate::types::OrderSide;

pub mod paper;

pub use paper::PaperGateway;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub String);

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub name: String,
    pub side: OrderSide,
    pub price: f64,
    pub volume: i64,
    /// What drove the order, recorded verbatim in the ledger.
    pub reason: String,
}

/// Confirmed execution reported back by a gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: OrderId,
    pub symbol: String,
    pub side: OrderSide,
    pub price: f64,
    pub volume: i64,
    pub commission: f64,
    pub executed_at: DateTime<Utc>,
}

/// Broker boundary. The engine only ever sees submitted orders and their
/// fills; routing, sessions and broker retries live behind this trait.
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    async fn submit_order(&self, request: &OrderRequest) -> TradingResult<Fill>;

    async fn cancel_order(&self, order_id: &OrderId) -> TradingResult<bool>;
}
