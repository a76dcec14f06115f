//! Position monitor loop: the tick driver for risk and grid decisions.
//!
//! Quotes are fetched outside the store lock; only the resulting state
//! changes are applied under it. One symbol's failure never halts the
//! loop, a whole-iteration failure backs off before the next tick.

use chrono::{Local, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::core::grid::GridEngine;
use crate::core::position::GridStatus;
use crate::core::risk;
use crate::core::store::PositionStore;
use crate::error::{TradingError, TradingResult};
use crate::data::FailoverManager;
use crate::trade::{ExecutionGateway, OrderRequest};
use crate::types::{OrderSide, SignalKind, TradeSignal};

pub struct PositionMonitorLoop {
    store: Arc<PositionStore>,
    failover: Arc<FailoverManager>,
    grid: Arc<GridEngine>,
    gateway: Arc<dyn ExecutionGateway>,
    config: Config,
}

impl PositionMonitorLoop {
    pub fn new(
        store: Arc<PositionStore>,
        failover: Arc<FailoverManager>,
        grid: Arc<GridEngine>,
        gateway: Arc<dyn ExecutionGateway>,
        config: Config,
    ) -> Self {
        Self {
            store,
            failover,
            grid,
            gateway,
            config,
        }
    }

    pub fn spawn(self, mut stop: watch::Receiver<bool>) -> JoinHandle<()> {
        let interval = Duration::from_secs(self.config.trading.monitor_interval_secs);
        let backoff = Duration::from_secs(self.config.trading.error_backoff_secs);
        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "position monitor started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !self.config.is_trading_time(Local::now().naive_local()) {
                            continue;
                        }
                        if let Err(e) = self.tick().await {
                            error!(error = %e, backoff_secs = backoff.as_secs(), "monitor iteration failed, backing off");
                            tokio::select! {
                                _ = tokio::time::sleep(backoff) => {}
                                _ = stop.changed() => {
                                    if *stop.borrow() { break; }
                                }
                            }
                        }
                    }
                    _ = stop.changed() => {
                        if *stop.borrow() {
                            info!("position monitor stopping");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// One full pass over every held symbol.
    pub async fn tick(&self) -> TradingResult<()> {
        let symbols = self.store.symbols();
        if symbols.is_empty() {
            return Ok(());
        }

        let mut failures = 0;
        for symbol in &symbols {
            if let Err(e) = self.tick_symbol(symbol).await {
                warn!(symbol = %symbol, error = %e, "symbol tick failed, skipping");
                failures += 1;
            }
        }

        if self.config.trading.auto_trade {
            self.execute_signals().await;
        }

        if failures == symbols.len() {
            return Err(TradingError::MarketData(
                "every symbol failed this iteration".to_string(),
            ));
        }
        Ok(())
    }

    async fn tick_symbol(&self, symbol: &str) -> TradingResult<()> {
        // No quote this tick is not an error, just no update.
        let Some(quote) = self.failover.get_price(symbol).await else {
            debug!(symbol, "no quote this tick");
            return Ok(());
        };

        let position = self.store.record_tick(symbol, &quote)?;

        match risk::classify(&position, quote.last_price, &self.config.risk) {
            Some(kind) => {
                let volume = self.signal_volume(&position, kind);
                self.store.publish_signal(TradeSignal {
                    symbol: symbol.to_string(),
                    kind,
                    current_price: quote.last_price,
                    threshold_price: risk::threshold_price(&position, kind, &self.config.risk),
                    volume,
                    detected_at: Utc::now(),
                });
            }
            None => self.store.clear_signal(symbol),
        }

        self.run_grid(symbol, quote.last_price).await;
        Ok(())
    }

    /// Shares a signal should move: the configured fraction for the first
    /// take-profit (rounded down to whole lots), everything sellable for
    /// the exits.
    fn signal_volume(&self, position: &crate::core::position::Position, kind: SignalKind) -> i64 {
        match kind {
            SignalKind::TakeProfitHalf => {
                let lot = self.config.grid.lot_size;
                let raw = position.volume as f64 * self.config.risk.take_profit_sell_ratio;
                let lots = (raw / lot as f64).floor() as i64;
                let volume = lots * lot;
                if volume > 0 {
                    volume.min(position.available)
                } else {
                    position.available
                }
            }
            SignalKind::StopLoss | SignalKind::TakeProfitFull => position.available,
        }
    }

    async fn run_grid(&self, symbol: &str, price: f64) {
        if !self.grid.is_enabled() {
            return;
        }
        let levels = self.store.grid_levels(symbol);
        if levels.is_empty() {
            return;
        }

        for action in self.grid.scan(symbol, &levels, price) {
            let name = self
                .store
                .get(symbol)
                .map(|p| p.name)
                .unwrap_or_default();
            let request = OrderRequest {
                symbol: action.symbol.clone(),
                name,
                side: action.side,
                price: action.price,
                volume: action.volume,
                reason: format!("grid_level_{}", action.level),
            };
            match self.gateway.submit_order(&request).await {
                Ok(fill) => {
                    let applied = match action.side {
                        OrderSide::Buy => self
                            .store
                            .apply_buy_fill(symbol, &request.name, fill.volume, fill.price)
                            .map(|_| ())
                            .and_then(|_| {
                                self.store
                                    .update_grid_status(symbol, action.level, GridStatus::Active)
                            }),
                        OrderSide::Sell => self
                            .store
                            .apply_sell_fill(symbol, fill.volume, fill.price)
                            .and_then(|outcome| {
                                if outcome.closed {
                                    self.grid.forget(symbol);
                                    Ok(())
                                } else {
                                    self.store.update_grid_status(
                                        symbol,
                                        action.level,
                                        GridStatus::Completed,
                                    )
                                }
                            }),
                    };
                    if let Err(e) = applied {
                        error!(symbol, level = action.level, error = %e, "failed to apply grid fill");
                    }
                }
                Err(e) => {
                    warn!(symbol, level = action.level, error = %e, "grid order rejected");
                }
            }
        }
    }

    /// Consume pending risk signals by selling through the gateway. A
    /// rejected order leaves the signal pending for the next tick.
    async fn execute_signals(&self) {
        for signal in self.store.pending_signals() {
            let Some(position) = self.store.get(&signal.symbol) else {
                self.store.clear_signal(&signal.symbol);
                continue;
            };

            let volume = signal.volume.min(position.available);
            if volume <= 0 {
                debug!(symbol = %signal.symbol, "nothing sellable for signal yet");
                continue;
            }

            let request = OrderRequest {
                symbol: signal.symbol.clone(),
                name: position.name.clone(),
                side: OrderSide::Sell,
                price: signal.current_price,
                volume,
                reason: signal.kind.as_str().to_string(),
            };

            match self.gateway.submit_order(&request).await {
                Ok(fill) => {
                    self.store.mark_consumed(&signal.symbol);
                    match self.store.apply_sell_fill(&signal.symbol, fill.volume, fill.price) {
                        Ok(outcome) => {
                            if outcome.closed {
                                self.grid.forget(&signal.symbol);
                            } else if signal.kind == SignalKind::TakeProfitHalf {
                                if let Err(e) = self.store.mark_profit_triggered(&signal.symbol) {
                                    error!(symbol = %signal.symbol, error = %e, "failed to arm trailing stop");
                                }
                            }
                            info!(
                                symbol = %signal.symbol,
                                kind = signal.kind.as_str(),
                                volume = fill.volume,
                                price = fill.price,
                                "risk signal executed"
                            );
                        }
                        Err(e) => {
                            error!(symbol = %signal.symbol, error = %e, "failed to apply signal fill")
                        }
                    }
                }
                Err(e) => {
                    warn!(symbol = %signal.symbol, error = %e, "signal order rejected, will retry");
                }
            }
        }
    }
}
