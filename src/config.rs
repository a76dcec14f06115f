// Configuration management for the equity position engine

use chrono::{Datelike, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::types::TradingMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    pub mode: TradingMode,
    /// When true the engine consumes its own risk signals and executes them.
    pub auto_trade: bool,
    pub monitor_interval_secs: u64,
    pub error_backoff_secs: u64,
    pub shutdown_timeout_secs: u64,
    /// Trading sessions in local exchange time, e.g. "09:30"-"11:30".
    pub sessions: Vec<SessionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub open: String,
    pub close: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Fixed stop distance below cost, expressed as a negative ratio.
    pub stop_loss_ratio: f64,
    /// Profit ratio that arms the trailing stop and triggers the first sell.
    pub initial_take_profit_ratio: f64,
    /// Fraction of the position sold on the first take-profit.
    pub take_profit_sell_ratio: f64,
    /// Coefficient applied when the peak gain is below every tier.
    pub fallback_coefficient: f64,
    pub signal_validity_secs: u64,
    /// Trailing tiers: once the peak gain reaches `threshold`, the stop sits
    /// at `coefficient` times the highest price. Matched highest-first.
    pub dynamic_tiers: Vec<TakeProfitTier>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TakeProfitTier {
    pub threshold: f64,
    pub coefficient: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    pub enabled: bool,
    /// Price step between adjacent levels, as a ratio of the anchor price.
    pub step_ratio: f64,
    /// Fraction of the position's volume committed to the ladder.
    pub position_ratio: f64,
    pub max_levels: u32,
    /// Smallest tradable lot; per-level volume below this aborts the ladder.
    pub lot_size: i64,
    pub cooldown_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub timeout_secs: u64,
    /// Quick retries per fetch before the attempt counts as a failure.
    pub retries: u32,
    /// Minimum spacing between fetches for the same symbol.
    pub min_fetch_interval_ms: u64,
    /// Priority-ordered quote sources; the first entry is the primary.
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    /// URL template with `{symbol}` substituted per request.
    pub url: String,
    /// Consecutive failures before the source is marked unhealthy.
    pub max_errors: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub interval_secs: u64,
    pub database_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub initial_cash: f64,
    pub buy_commission: f64,
    pub sell_commission: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub trading: TradingConfig,
    pub risk: RiskConfig,
    pub grid: GridConfig,
    pub data: DataConfig,
    pub sync: SyncConfig,
    pub account: AccountConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            trading: TradingConfig {
                mode: TradingMode::Simulation,
                auto_trade: true,
                monitor_interval_secs: 2,
                error_backoff_secs: 60,
                shutdown_timeout_secs: 5,
                sessions: vec![
                    SessionConfig { open: "09:30".to_string(), close: "11:30".to_string() },
                    SessionConfig { open: "13:00".to_string(), close: "15:00".to_string() },
                ],
            },
            risk: RiskConfig {
                stop_loss_ratio: -0.095,
                initial_take_profit_ratio: 0.05,
                take_profit_sell_ratio: 0.5,
                fallback_coefficient: 0.97,
                signal_validity_secs: 300,
                dynamic_tiers: vec![
                    TakeProfitTier { threshold: 0.40, coefficient: 0.85 },
                    TakeProfitTier { threshold: 0.30, coefficient: 0.87 },
                    TakeProfitTier { threshold: 0.15, coefficient: 0.90 },
                    TakeProfitTier { threshold: 0.10, coefficient: 0.93 },
                    TakeProfitTier { threshold: 0.05, coefficient: 0.96 },
                ],
            },
            grid: GridConfig {
                enabled: true,
                step_ratio: 0.03,
                position_ratio: 0.2,
                max_levels: 6,
                lot_size: 100,
                cooldown_secs: 300,
            },
            data: DataConfig {
                timeout_secs: 5,
                retries: 2,
                min_fetch_interval_ms: 500,
                sources: vec![
                    SourceConfig {
                        name: "primary".to_string(),
                        url: "https://quote.example.com/v1/ticker?symbol={symbol}".to_string(),
                        max_errors: 10,
                    },
                    SourceConfig {
                        name: "backup".to_string(),
                        url: "https://quote-mirror.example.com/v1/ticker?symbol={symbol}".to_string(),
                        max_errors: 3,
                    },
                ],
            },
            sync: SyncConfig {
                interval_secs: 5,
                database_path: "positions.db".to_string(),
            },
            account: AccountConfig {
                initial_cash: 100_000.0,
                buy_commission: 0.0003,
                sell_commission: 0.0013,
            },
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(e.to_string()))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;

        fs::write(path, content)
            .map_err(|e| ConfigError::FileWrite(e.to_string()))?;

        Ok(())
    }

    /// Load configuration from file, or create default if file doesn't exist
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            let config = Self::default();
            config.to_file(&path)?;
            tracing::info!("Created default config file: {}", path.as_ref().display());
            Ok(config)
        }
    }

    /// Whether `t` falls inside a trading session on a weekday.
    pub fn is_trading_time(&self, t: NaiveDateTime) -> bool {
        if matches!(t.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let time = t.time();
        self.trading.sessions.iter().any(|s| {
            match (parse_session_time(&s.open), parse_session_time(&s.close)) {
                (Some(open), Some(close)) => time >= open && time <= close,
                _ => false,
            }
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.risk.stop_loss_ratio >= 0.0 {
            return Err(ConfigError::Validation("stop_loss_ratio must be negative".to_string()));
        }

        if self.risk.initial_take_profit_ratio <= 0.0 {
            return Err(ConfigError::Validation("initial_take_profit_ratio must be positive".to_string()));
        }

        if self.risk.take_profit_sell_ratio <= 0.0 || self.risk.take_profit_sell_ratio > 1.0 {
            return Err(ConfigError::Validation("take_profit_sell_ratio must be in (0, 1]".to_string()));
        }

        if self.risk.fallback_coefficient <= 0.0 || self.risk.fallback_coefficient >= 1.0 {
            return Err(ConfigError::Validation("fallback_coefficient must be in (0, 1)".to_string()));
        }

        for tier in &self.risk.dynamic_tiers {
            if tier.threshold <= 0.0 || tier.coefficient <= 0.0 || tier.coefficient >= 1.0 {
                return Err(ConfigError::Validation("dynamic tier thresholds must be positive and coefficients in (0, 1)".to_string()));
            }
        }

        if self.grid.step_ratio <= 0.0 {
            return Err(ConfigError::Validation("grid step_ratio must be positive".to_string()));
        }

        if self.grid.position_ratio <= 0.0 || self.grid.position_ratio > 1.0 {
            return Err(ConfigError::Validation("grid position_ratio must be in (0, 1]".to_string()));
        }

        if self.grid.max_levels == 0 {
            return Err(ConfigError::Validation("grid max_levels must be greater than 0".to_string()));
        }

        if self.grid.lot_size <= 0 {
            return Err(ConfigError::Validation("grid lot_size must be positive".to_string()));
        }

        if self.data.sources.is_empty() {
            return Err(ConfigError::Validation("at least one data source is required".to_string()));
        }

        if self.trading.mode == TradingMode::Live && self.data.sources.len() != 1 {
            return Err(ConfigError::Validation("live mode requires exactly one data source".to_string()));
        }

        for source in &self.data.sources {
            if source.max_errors == 0 {
                return Err(ConfigError::Validation("source max_errors must be greater than 0".to_string()));
            }
        }

        for session in &self.trading.sessions {
            let open = parse_session_time(&session.open);
            let close = parse_session_time(&session.close);
            match (open, close) {
                (Some(o), Some(c)) if o < c => {}
                _ => {
                    return Err(ConfigError::Validation(format!(
                        "invalid trading session {}-{}",
                        session.open, session.close
                    )))
                }
            }
        }

        if self.trading.monitor_interval_secs == 0 || self.sync.interval_secs == 0 {
            return Err(ConfigError::Validation("intervals must be greater than 0".to_string()));
        }

        if self.account.initial_cash < 0.0 {
            return Err(ConfigError::Validation("initial_cash must be non-negative".to_string()));
        }

        Ok(())
    }
}

fn parse_session_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M").ok()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(String),

    #[error("Failed to write config file: {0}")]
    FileWrite(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Failed to serialize config: {0}")]
    Serialize(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn live_mode_rejects_multiple_sources() {
        let mut config = Config::default();
        config.trading.mode = TradingMode::Live;
        assert!(config.validate().is_err());

        config.data.sources.truncate(1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn stop_loss_ratio_must_be_negative() {
        let mut config = Config::default();
        config.risk.stop_loss_ratio = 0.05;
        assert!(config.validate().is_err());
    }

    #[test]
    fn trading_time_covers_sessions_only() {
        let config = Config::default();
        // 2026-08-24 is a Monday.
        let monday = NaiveDate::from_ymd_opt(2026, 8, 24).unwrap();
        let saturday = NaiveDate::from_ymd_opt(2026, 8, 22).unwrap();

        let t = |d: NaiveDate, h, m| d.and_hms_opt(h, m, 0).unwrap();
        assert!(config.is_trading_time(t(monday, 10, 0)));
        assert!(config.is_trading_time(t(monday, 13, 30)));
        assert!(!config.is_trading_time(t(monday, 12, 0)));
        assert!(!config.is_trading_time(t(monday, 15, 1)));
        assert!(!config.is_trading_time(t(saturday, 10, 0)));
    }
}
