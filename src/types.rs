// Shared types for quotes, trade signals and trading modes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single realtime quote for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub name: String,
    pub last_price: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    /// A quote is usable only when the last traded price is positive.
    pub fn is_valid(&self) -> bool {
        self.last_price > 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "SELL" => OrderSide::Sell,
            _ => OrderSide::Buy,
        }
    }
}

/// Which risk rule fired for a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    /// Price fell through the fixed stop before any profit was taken.
    StopLoss,
    /// First take-profit threshold reached; sell a configured fraction.
    TakeProfitHalf,
    /// Trailing stop hit after the first take-profit; close the remainder.
    TakeProfitFull,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::StopLoss => "STOP_LOSS",
            SignalKind::TakeProfitHalf => "TAKE_PROFIT_HALF",
            SignalKind::TakeProfitFull => "TAKE_PROFIT_FULL",
        }
    }
}

/// An actionable risk event detected by the monitor loop.
///
/// Signals are ephemeral: at most one unconsumed signal exists per symbol,
/// and stale signals are dropped after a validity window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSignal {
    pub symbol: String,
    pub kind: SignalKind,
    pub current_price: f64,
    pub threshold_price: f64,
    /// Number of shares the suggested action applies to.
    pub volume: i64,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    /// Real money, single data source, fail closed.
    Live,
    /// Paper trading: failover with lock-in, no durable position sync.
    Simulation,
}

impl TradingMode {
    pub fn is_simulation(&self) -> bool {
        matches!(self, TradingMode::Simulation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_validity_requires_positive_last_price() {
        let mut quote = Quote {
            symbol: "600036".to_string(),
            name: "Test".to_string(),
            last_price: 10.0,
            high: 10.5,
            low: 9.8,
            volume: 1000.0,
            timestamp: Utc::now(),
        };
        assert!(quote.is_valid());

        quote.last_price = 0.0;
        assert!(!quote.is_valid());

        quote.last_price = -1.0;
        assert!(!quote.is_valid());
    }

    #[test]
    fn order_side_round_trips_through_strings() {
        assert_eq!(OrderSide::from_str(OrderSide::Buy.as_str()), OrderSide::Buy);
        assert_eq!(OrderSide::from_str(OrderSide::Sell.as_str()), OrderSide::Sell);
    }
}
