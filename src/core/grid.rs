// Grid trading sub-engine: ladder construction and tick scanning

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, info, warn};

use chrono::Utc;

use crate::config::GridConfig;
use crate::core::position::{GridLevel, GridStatus, Position};
use crate::types::OrderSide;

/// Hard cap on ladder depth regardless of configuration.
const MAX_GRID_LEVELS: u32 = 5;

/// An order the ladder wants placed for one level.
#[derive(Debug, Clone)]
pub struct GridAction {
    pub symbol: String,
    pub level: u32,
    pub side: OrderSide,
    pub price: f64,
    pub volume: i64,
}

/// Stateless over positions; only per-level cooldown timestamps live here.
pub struct GridEngine {
    config: GridConfig,
    cooldowns: Mutex<HashMap<(String, u32, OrderSide), Instant>>,
}

impl GridEngine {
    pub fn new(config: GridConfig) -> Self {
        Self {
            config,
            cooldowns: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Build the ladder for a position anchored at `anchor_price`.
    ///
    /// Returns an empty ladder when the per-level volume would fall below
    /// one tradable lot; a ladder that cannot fill is worse than none.
    pub fn build_ladder(&self, position: &Position, anchor_price: f64) -> Vec<GridLevel> {
        if !self.config.enabled || anchor_price <= 0.0 {
            return Vec::new();
        }

        let grid_count = self.config.max_levels.min(MAX_GRID_LEVELS);
        let committed = position.volume as f64 * self.config.position_ratio;
        let per_level = (committed / grid_count as f64).floor() as i64;

        if per_level < self.config.lot_size {
            warn!(
                symbol = %position.symbol,
                per_level,
                lot_size = self.config.lot_size,
                "position too small for grid trading, skipping ladder"
            );
            return Vec::new();
        }

        let now = Utc::now();
        let levels = (1..=grid_count)
            .map(|i| GridLevel {
                level: i,
                buy_price: anchor_price * (1.0 - self.config.step_ratio * i as f64),
                sell_price: anchor_price * (1.0 + self.config.step_ratio * i as f64),
                volume: per_level,
                status: GridStatus::Pending,
                created_at: now,
                updated_at: now,
            })
            .collect::<Vec<_>>();

        info!(
            symbol = %position.symbol,
            levels = levels.len(),
            per_level,
            anchor = anchor_price,
            "grid ladder initialized"
        );
        levels
    }

    /// Scan the ladder against the latest price and emit the orders that
    /// are due. Each (level, side) is rate-limited by the cooldown window.
    pub fn scan(&self, symbol: &str, levels: &[GridLevel], price: f64) -> Vec<GridAction> {
        if !self.config.enabled || price <= 0.0 {
            return Vec::new();
        }

        let mut actions = Vec::new();
        for level in levels {
            match level.status {
                GridStatus::Pending if price <= level.buy_price => {
                    if self.on_cooldown(symbol, level.level, OrderSide::Buy) {
                        continue;
                    }
                    debug!(symbol, level = level.level, price, buy = level.buy_price, "grid buy due");
                    actions.push(GridAction {
                        symbol: symbol.to_string(),
                        level: level.level,
                        side: OrderSide::Buy,
                        price,
                        volume: level.volume,
                    });
                }
                GridStatus::Active if price >= level.sell_price => {
                    if self.on_cooldown(symbol, level.level, OrderSide::Sell) {
                        continue;
                    }
                    debug!(symbol, level = level.level, price, sell = level.sell_price, "grid sell due");
                    actions.push(GridAction {
                        symbol: symbol.to_string(),
                        level: level.level,
                        side: OrderSide::Sell,
                        price,
                        volume: level.volume,
                    });
                }
                _ => {}
            }
        }
        actions
    }

    /// Forget cooldown state for a symbol whose ladder was abandoned.
    pub fn forget(&self, symbol: &str) {
        let mut cooldowns = self.cooldowns.lock().unwrap();
        cooldowns.retain(|(s, _, _), _| s != symbol);
    }

    fn on_cooldown(&self, symbol: &str, level: u32, side: OrderSide) -> bool {
        let mut cooldowns = self.cooldowns.lock().unwrap();
        let key = (symbol.to_string(), level, side);
        let now = Instant::now();
        if let Some(last) = cooldowns.get(&key) {
            if now.duration_since(*last).as_secs() < self.config.cooldown_secs {
                return true;
            }
        }
        cooldowns.insert(key, now);
        false
    }
}
