// Position and grid-level records owned by the position store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One held symbol. Derived fields (`market_value`, `profit_ratio`,
/// `stop_loss_price`) are maintained by the store on every mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub name: String,
    /// Total shares held.
    pub volume: i64,
    /// Shares free to sell; never exceeds `volume`.
    pub available: i64,
    /// Volume-weighted average cost, recomputed on buy fills only.
    pub cost_price: f64,
    pub current_price: f64,
    pub market_value: f64,
    pub profit_ratio: f64,
    /// Running high-water mark since `open_date`; never decreases.
    pub highest_price: f64,
    /// Set once the first take-profit has executed; only a full close
    /// and reopen resets it.
    pub profit_triggered: bool,
    pub stop_loss_price: f64,
    pub open_date: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

impl Position {
    pub fn open(symbol: &str, name: &str, volume: i64, price: f64) -> Self {
        let now = Utc::now();
        let mut position = Position {
            symbol: symbol.to_string(),
            name: name.to_string(),
            volume,
            available: volume,
            cost_price: price,
            current_price: price,
            market_value: 0.0,
            profit_ratio: 0.0,
            highest_price: price,
            profit_triggered: false,
            stop_loss_price: 0.0,
            open_date: now,
            last_update: now,
        };
        position.refresh_derived();
        position
    }

    /// Recompute market value and profit ratio from the current price.
    pub fn refresh_derived(&mut self) {
        self.market_value = self.volume as f64 * self.current_price;
        self.profit_ratio = if self.cost_price > 0.0 {
            (self.current_price - self.cost_price) / self.cost_price
        } else {
            0.0
        };
        self.last_update = Utc::now();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GridStatus {
    /// Waiting for its buy trigger.
    Pending,
    /// Buy filled; waiting for its sell trigger.
    Active,
    /// Sell filled; terminal.
    Completed,
}

impl GridStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GridStatus::Pending => "PENDING",
            GridStatus::Active => "ACTIVE",
            GridStatus::Completed => "COMPLETED",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "ACTIVE" => GridStatus::Active,
            "COMPLETED" => GridStatus::Completed,
            _ => GridStatus::Pending,
        }
    }
}

/// One rung of a position's grid ladder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridLevel {
    pub level: u32,
    pub buy_price: f64,
    pub sell_price: f64,
    pub volume: i64,
    pub status: GridStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_initializes_highest_to_entry_price() {
        let position = Position::open("600036", "Bank", 500, 10.0);
        assert_eq!(position.highest_price, 10.0);
        assert_eq!(position.available, 500);
        assert!(!position.profit_triggered);
        assert!((position.market_value - 5000.0).abs() < 1e-9);
    }

    #[test]
    fn profit_ratio_guards_zero_cost() {
        let mut position = Position::open("600036", "Bank", 100, 10.0);
        position.cost_price = 0.0;
        position.refresh_derived();
        assert_eq!(position.profit_ratio, 0.0);
    }

    #[test]
    fn grid_status_string_mapping() {
        assert_eq!(GridStatus::from_str("ACTIVE"), GridStatus::Active);
        assert_eq!(GridStatus::from_str("COMPLETED"), GridStatus::Completed);
        assert_eq!(GridStatus::from_str("anything"), GridStatus::Pending);
    }
}
