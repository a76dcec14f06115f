// Equity position & risk state engine

pub mod config;
pub mod core;
pub mod data;
pub mod db;
pub mod engine;
pub mod error;
pub mod trade;
pub mod types;

pub use crate::config::Config;
pub use crate::core::{GridEngine, GridLevel, GridStatus, Position, PositionStore};
pub use crate::data::{FailoverManager, HttpQuoteSource, PriceSource};
pub use crate::db::Database;
pub use crate::engine::TradingEngine;
pub use crate::error::{TradingError, TradingResult};
pub use crate::trade::{ExecutionGateway, PaperGateway};
pub use crate::types::{Quote, SignalKind, TradeSignal, TradingMode};
