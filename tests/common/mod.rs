// Shared helpers for integration tests

use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex};

use equity_position_engine::config::Config;
use equity_position_engine::data::{PriceSource, SourceError};
use equity_position_engine::db::Database;
use equity_position_engine::trade::PaperGateway;
use equity_position_engine::types::{Quote, TradingMode};
use equity_position_engine::TradingEngine;

/// Fast test configuration: simulation mode, no fetch rate limiting,
/// no retries.
pub fn create_test_config() -> Config {
    let mut config = Config::default();
    config.trading.mode = TradingMode::Simulation;
    config.data.min_fetch_interval_ms = 0;
    config.data.retries = 0;
    // Room for the larger test positions.
    config.account.initial_cash = 1_000_000.0;
    config
}

/// Price source whose quote is set by the test.
pub struct ScriptedSource {
    price: Mutex<f64>,
}

impl ScriptedSource {
    pub fn new(price: f64) -> Arc<Self> {
        Arc::new(Self {
            price: Mutex::new(price),
        })
    }

    pub fn set_price(&self, price: f64) {
        *self.price.lock().unwrap() = price;
    }
}

#[async_trait]
impl PriceSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    fn max_errors(&self) -> u32 {
        10
    }

    async fn fetch(&self, symbol: &str) -> Result<Quote, SourceError> {
        let price = *self.price.lock().unwrap();
        Ok(Quote {
            symbol: symbol.to_string(),
            name: "Test".to_string(),
            last_price: price,
            high: price,
            low: price,
            volume: 100_000.0,
            timestamp: Utc::now(),
        })
    }
}

/// Engine wired to an in-memory database, a scripted source and the
/// paper gateway.
pub fn build_engine(config: Config, source: Arc<ScriptedSource>) -> (TradingEngine, Arc<Database>) {
    let db = Arc::new(Database::new_in_memory().unwrap());
    db.run_migrations().unwrap();
    let gateway = Arc::new(PaperGateway::new(&config.account, Arc::clone(&db)));
    let sources = vec![source as Arc<dyn PriceSource>];
    let engine = TradingEngine::with_adapters(config, Arc::clone(&db), sources, gateway).unwrap();
    (engine, db)
}
