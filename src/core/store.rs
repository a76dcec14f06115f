//! In-memory position store: the authoritative view of open positions.
//!
//! All mutations funnel through one internal lock, so writers are
//! serialized and readers always observe a consistent snapshot. Every
//! successful mutation bumps `data_version` and raises the change flag
//! the persistence job polls.

use chrono::{NaiveDate, Utc};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::RiskConfig;
use crate::core::position::{GridLevel, GridStatus, Position};
use crate::core::risk;
use crate::error::{TradingError, TradingResult};
use crate::types::{Quote, SignalKind, TradeSignal};

/// Result of a sell fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SellOutcome {
    pub remaining: i64,
    /// True when the fill emptied the position and its row was deleted.
    pub closed: bool,
}

/// Point-in-time copy of the store for readers.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub positions: Vec<Position>,
    pub grids: HashMap<String, Vec<GridLevel>>,
    pub data_version: u64,
}

struct StoreState {
    positions: HashMap<String, Position>,
    grids: HashMap<String, Vec<GridLevel>>,
    reserved: HashMap<String, i64>,
    signals: HashMap<String, TradeSignal>,
    processed: HashSet<(String, SignalKind, NaiveDate)>,
    data_version: u64,
    data_changed: bool,
}

pub struct PositionStore {
    state: Mutex<StoreState>,
    risk: RiskConfig,
    signal_validity: Duration,
}

impl PositionStore {
    pub fn new(risk: RiskConfig) -> Self {
        let signal_validity = Duration::from_secs(risk.signal_validity_secs);
        Self {
            state: Mutex::new(StoreState {
                positions: HashMap::new(),
                grids: HashMap::new(),
                reserved: HashMap::new(),
                signals: HashMap::new(),
                processed: HashSet::new(),
                data_version: 0,
                data_changed: false,
            }),
            risk,
            signal_validity,
        }
    }

    // ---- mutations ----

    /// Apply a confirmed buy fill. Opens the position on first entry,
    /// otherwise folds the fill into the volume-weighted cost.
    pub fn apply_buy_fill(
        &self,
        symbol: &str,
        name: &str,
        volume: i64,
        price: f64,
    ) -> TradingResult<Position> {
        if volume <= 0 || price <= 0.0 {
            return Err(TradingError::MutationRejected(format!(
                "buy fill for {} needs positive volume and price",
                symbol
            )));
        }

        let mut state = self.state.lock().unwrap();
        let position = match state.positions.entry(symbol.to_string()) {
            Entry::Occupied(mut entry) => {
                let p = entry.get_mut();
                let total = p.volume + volume;
                p.cost_price =
                    (p.cost_price * p.volume as f64 + price * volume as f64) / total as f64;
                p.volume = total;
                p.available += volume;
                p.current_price = price;
                if price > p.highest_price {
                    p.highest_price = price;
                }
                p.stop_loss_price =
                    risk::stop_loss_price(p.cost_price, p.highest_price, p.profit_triggered, &self.risk);
                p.refresh_derived();
                p.clone()
            }
            Entry::Vacant(entry) => {
                let mut p = Position::open(symbol, name, volume, price);
                p.stop_loss_price =
                    risk::stop_loss_price(p.cost_price, p.highest_price, false, &self.risk);
                entry.insert(p.clone());
                info!(symbol, volume, price, "opened position");
                p
            }
        };
        Self::bump(&mut state);
        Ok(position)
    }

    /// Install a position restored from durable storage as-is, keeping
    /// its open date and high-water mark.
    pub fn restore_position(&self, mut position: Position) -> TradingResult<()> {
        if position.volume <= 0 || position.available < 0 || position.available > position.volume {
            return Err(TradingError::MutationRejected(format!(
                "restored position {} violates volume invariants",
                position.symbol
            )));
        }
        let mut state = self.state.lock().unwrap();
        position.stop_loss_price = risk::stop_loss_price(
            position.cost_price,
            position.highest_price,
            position.profit_triggered,
            &self.risk,
        );
        position.refresh_derived();
        state.positions.insert(position.symbol.clone(), position);
        Self::bump(&mut state);
        Ok(())
    }

    /// Move shares out of `available` while a sell order is in flight.
    pub fn reserve_for_sell(&self, symbol: &str, volume: i64) -> TradingResult<()> {
        let mut state = self.state.lock().unwrap();
        let position = state
            .positions
            .get_mut(symbol)
            .ok_or_else(|| TradingError::UnknownPosition(symbol.to_string()))?;
        if volume <= 0 || volume > position.available {
            return Err(TradingError::MutationRejected(format!(
                "cannot reserve {} of {} available for {}",
                volume, position.available, symbol
            )));
        }
        position.available -= volume;
        *state.reserved.entry(symbol.to_string()).or_insert(0) += volume;
        Self::bump(&mut state);
        Ok(())
    }

    /// Return reserved shares to `available` after a cancelled order.
    pub fn release_reservation(&self, symbol: &str, volume: i64) -> TradingResult<()> {
        let mut state = self.state.lock().unwrap();
        let reserved = state.reserved.get(symbol).copied().unwrap_or(0);
        if volume <= 0 || volume > reserved {
            return Err(TradingError::MutationRejected(format!(
                "cannot release {} of {} reserved for {}",
                volume, reserved, symbol
            )));
        }
        if let Some(r) = state.reserved.get_mut(symbol) {
            *r -= volume;
        }
        if let Some(position) = state.positions.get_mut(symbol) {
            position.available += volume;
        }
        Self::bump(&mut state);
        Ok(())
    }

    /// Apply a confirmed sell fill. Reserved shares are consumed first.
    /// The row is deleted, along with its ladder and any pending signal,
    /// when volume reaches zero.
    pub fn apply_sell_fill(
        &self,
        symbol: &str,
        volume: i64,
        price: f64,
    ) -> TradingResult<SellOutcome> {
        if volume <= 0 || price <= 0.0 {
            return Err(TradingError::MutationRejected(format!(
                "sell fill for {} needs positive volume and price",
                symbol
            )));
        }

        let mut state = self.state.lock().unwrap();
        let reserved = state.reserved.get(symbol).copied().unwrap_or(0);
        let position = state
            .positions
            .get_mut(symbol)
            .ok_or_else(|| TradingError::UnknownPosition(symbol.to_string()))?;

        let from_reserved = volume.min(reserved);
        let from_available = volume - from_reserved;
        if from_available > position.available || volume > position.volume {
            return Err(TradingError::MutationRejected(format!(
                "sell of {} exceeds sellable shares for {} (available {}, reserved {})",
                volume, symbol, position.available, reserved
            )));
        }

        position.volume -= volume;
        position.available -= from_available;
        position.current_price = price;
        let remaining = position.volume;
        let closed = remaining == 0;
        if !closed {
            position.refresh_derived();
        }

        if from_reserved > 0 {
            if let Some(r) = state.reserved.get_mut(symbol) {
                *r -= from_reserved;
            }
        }

        if closed {
            state.positions.remove(symbol);
            state.grids.remove(symbol);
            state.reserved.remove(symbol);
            state.signals.remove(symbol);
            info!(symbol, price, "position closed");
        }
        Self::bump(&mut state);
        Ok(SellOutcome { remaining, closed })
    }

    /// Fold a fresh quote into the position: current price, high-water
    /// mark, and the stop derived from them.
    pub fn record_tick(&self, symbol: &str, quote: &Quote) -> TradingResult<Position> {
        if !quote.is_valid() {
            return Err(TradingError::MutationRejected(format!(
                "rejecting non-positive price {} for {}",
                quote.last_price, symbol
            )));
        }

        let mut state = self.state.lock().unwrap();
        let risk = &self.risk;
        let position = state
            .positions
            .get_mut(symbol)
            .ok_or_else(|| TradingError::UnknownPosition(symbol.to_string()))?;

        position.current_price = quote.last_price;
        let observed_high = quote.last_price.max(quote.high);
        if observed_high > position.highest_price {
            position.highest_price = observed_high;
            debug!(symbol, highest = observed_high, "new high-water mark");
        }
        position.stop_loss_price = risk::stop_loss_price(
            position.cost_price,
            position.highest_price,
            position.profit_triggered,
            risk,
        );
        position.refresh_derived();
        let copy = position.clone();
        Self::bump(&mut state);
        Ok(copy)
    }

    /// Arm the trailing stop after the first take-profit fill. Monotone:
    /// calling it again is a no-op.
    pub fn mark_profit_triggered(&self, symbol: &str) -> TradingResult<Position> {
        let mut state = self.state.lock().unwrap();
        let risk = &self.risk;
        let position = state
            .positions
            .get_mut(symbol)
            .ok_or_else(|| TradingError::UnknownPosition(symbol.to_string()))?;
        let changed = !position.profit_triggered;
        if changed {
            position.profit_triggered = true;
            position.stop_loss_price =
                risk::stop_loss_price(position.cost_price, position.highest_price, true, risk);
            position.refresh_derived();
            info!(symbol, stop = position.stop_loss_price, "trailing stop armed");
        }
        let copy = position.clone();
        if changed {
            Self::bump(&mut state);
        }
        Ok(copy)
    }

    pub fn remove_position(&self, symbol: &str) -> TradingResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.positions.remove(symbol).is_none() {
            return Err(TradingError::UnknownPosition(symbol.to_string()));
        }
        state.grids.remove(symbol);
        state.reserved.remove(symbol);
        state.signals.remove(symbol);
        Self::bump(&mut state);
        Ok(())
    }

    /// Install a freshly initialized ladder for a held symbol.
    pub fn add_grid_levels(&self, symbol: &str, levels: Vec<GridLevel>) -> TradingResult<()> {
        let mut state = self.state.lock().unwrap();
        if !state.positions.contains_key(symbol) {
            return Err(TradingError::UnknownPosition(symbol.to_string()));
        }
        state.grids.insert(symbol.to_string(), levels);
        Self::bump(&mut state);
        Ok(())
    }

    /// Advance one grid level's state machine. Levels only move forward:
    /// Pending -> Active -> Completed.
    pub fn update_grid_status(
        &self,
        symbol: &str,
        level: u32,
        status: GridStatus,
    ) -> TradingResult<()> {
        let mut state = self.state.lock().unwrap();
        let levels = state
            .grids
            .get_mut(symbol)
            .ok_or_else(|| TradingError::UnknownPosition(symbol.to_string()))?;
        let entry = levels.iter_mut().find(|l| l.level == level).ok_or_else(|| {
            TradingError::MutationRejected(format!("no grid level {} for {}", level, symbol))
        })?;

        let valid = matches!(
            (entry.status, status),
            (GridStatus::Pending, GridStatus::Active) | (GridStatus::Active, GridStatus::Completed)
        );
        if !valid {
            return Err(TradingError::MutationRejected(format!(
                "invalid grid transition {:?} -> {:?} for {} level {}",
                entry.status, status, symbol, level
            )));
        }
        entry.status = status;
        entry.updated_at = Utc::now();
        Self::bump(&mut state);
        Ok(())
    }

    // ---- signal registry ----

    /// Register a detected signal. Keeps an already-pending signal for the
    /// symbol and refuses kinds whose action was already taken today.
    /// Returns whether the signal is now pending.
    pub fn publish_signal(&self, signal: TradeSignal) -> bool {
        let mut state = self.state.lock().unwrap();
        let today = Utc::now().date_naive();
        if state
            .processed
            .contains(&(signal.symbol.clone(), signal.kind, today))
        {
            return false;
        }
        if state.signals.contains_key(&signal.symbol) {
            return true;
        }
        info!(
            symbol = %signal.symbol,
            kind = signal.kind.as_str(),
            price = signal.current_price,
            "signal detected"
        );
        state.signals.insert(signal.symbol.clone(), signal);
        true
    }

    /// Drop the pending signal for a symbol without consuming it, used
    /// when the triggering condition has passed.
    pub fn clear_signal(&self, symbol: &str) {
        let mut state = self.state.lock().unwrap();
        state.signals.remove(symbol);
    }

    /// Unconsumed, unexpired signals. Expired entries are discarded.
    pub fn pending_signals(&self) -> Vec<TradeSignal> {
        let mut state = self.state.lock().unwrap();
        let validity = chrono::Duration::from_std(self.signal_validity)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let now = Utc::now();
        state
            .signals
            .retain(|_, s| now.signed_duration_since(s.detected_at) <= validity);
        state.signals.values().cloned().collect()
    }

    /// Consume a signal: removes it and records the action so the same
    /// (symbol, kind) cannot fire again today.
    pub fn mark_consumed(&self, symbol: &str) -> Option<TradeSignal> {
        let mut state = self.state.lock().unwrap();
        let signal = state.signals.remove(symbol)?;
        let today = Utc::now().date_naive();
        state.processed.insert((symbol.to_string(), signal.kind, today));
        Some(signal)
    }

    // ---- readers ----

    pub fn get(&self, symbol: &str) -> Option<Position> {
        self.state.lock().unwrap().positions.get(symbol).cloned()
    }

    pub fn symbols(&self) -> Vec<String> {
        self.state.lock().unwrap().positions.keys().cloned().collect()
    }

    pub fn grid_levels(&self, symbol: &str) -> Vec<GridLevel> {
        self.state
            .lock()
            .unwrap()
            .grids
            .get(symbol)
            .cloned()
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> Snapshot {
        let state = self.state.lock().unwrap();
        Snapshot {
            positions: state.positions.values().cloned().collect(),
            grids: state.grids.clone(),
            data_version: state.data_version,
        }
    }

    pub fn data_version(&self) -> u64 {
        self.state.lock().unwrap().data_version
    }

    /// Poll-and-clear change flag for the persistence job.
    pub fn take_changed(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        std::mem::take(&mut state.data_changed)
    }

    fn bump(state: &mut StoreState) {
        state.data_version += 1;
        state.data_changed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use chrono::Utc;

    fn store() -> PositionStore {
        PositionStore::new(Config::default().risk)
    }

    fn quote(symbol: &str, last: f64, high: f64) -> Quote {
        Quote {
            symbol: symbol.to_string(),
            name: "Test".to_string(),
            last_price: last,
            high,
            low: last,
            volume: 10_000.0,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn buy_fills_compute_weighted_cost() {
        let s = store();
        s.apply_buy_fill("600036", "Bank", 1000, 10.0).unwrap();
        let p = s.apply_buy_fill("600036", "Bank", 1000, 12.0).unwrap();
        assert_eq!(p.volume, 2000);
        assert_eq!(p.available, 2000);
        assert!((p.cost_price - 11.0).abs() < 1e-9);
    }

    #[test]
    fn sell_cannot_exceed_available() {
        let s = store();
        s.apply_buy_fill("600036", "Bank", 1000, 10.0).unwrap();
        s.reserve_for_sell("600036", 800).unwrap();

        // 800 reserved + 200 available: 1000 is fine, 1001 is not.
        let err = s.apply_sell_fill("600036", 1001, 10.0);
        assert!(matches!(err, Err(TradingError::MutationRejected(_))));
        // Store unchanged by the rejected mutation.
        assert_eq!(s.get("600036").unwrap().volume, 1000);

        let outcome = s.apply_sell_fill("600036", 1000, 10.0).unwrap();
        assert!(outcome.closed);
        assert!(s.get("600036").is_none());
    }

    #[test]
    fn sell_does_not_change_cost_price() {
        let s = store();
        s.apply_buy_fill("600036", "Bank", 1000, 10.0).unwrap();
        let before = s.get("600036").unwrap().cost_price;
        s.apply_sell_fill("600036", 500, 11.0).unwrap();
        assert_eq!(s.get("600036").unwrap().cost_price, before);
        assert_eq!(s.get("600036").unwrap().available, 500);
    }

    #[test]
    fn highest_price_never_decreases() {
        let s = store();
        s.apply_buy_fill("600036", "Bank", 1000, 10.0).unwrap();
        s.record_tick("600036", &quote("600036", 11.0, 11.2)).unwrap();
        assert!((s.get("600036").unwrap().highest_price - 11.2).abs() < 1e-9);

        s.record_tick("600036", &quote("600036", 9.5, 9.8)).unwrap();
        assert!((s.get("600036").unwrap().highest_price - 11.2).abs() < 1e-9);
    }

    #[test]
    fn tick_rejects_non_positive_price() {
        let s = store();
        s.apply_buy_fill("600036", "Bank", 1000, 10.0).unwrap();
        let before = s.data_version();
        let err = s.record_tick("600036", &quote("600036", 0.0, 0.0));
        assert!(matches!(err, Err(TradingError::MutationRejected(_))));
        assert_eq!(s.data_version(), before);
    }

    #[test]
    fn profit_trigger_is_monotone_and_recomputes_stop() {
        let s = store();
        s.apply_buy_fill("600036", "Bank", 1000, 10.0).unwrap();
        s.record_tick("600036", &quote("600036", 11.2, 11.2)).unwrap();

        let p = s.mark_profit_triggered("600036").unwrap();
        assert!(p.profit_triggered);
        // 12% peak gain lands on the 10% tier.
        assert!((p.stop_loss_price - 11.2 * 0.93).abs() < 1e-9);

        let again = s.mark_profit_triggered("600036").unwrap();
        assert!(again.profit_triggered);
    }

    #[test]
    fn data_version_is_monotonic_and_flag_clears() {
        let s = store();
        assert_eq!(s.data_version(), 0);
        assert!(!s.take_changed());

        s.apply_buy_fill("600036", "Bank", 1000, 10.0).unwrap();
        let v1 = s.data_version();
        assert!(v1 > 0);
        assert!(s.take_changed());
        assert!(!s.take_changed());

        s.record_tick("600036", &quote("600036", 10.5, 10.5)).unwrap();
        assert!(s.data_version() > v1);
        assert!(s.take_changed());
    }

    #[test]
    fn grid_transitions_only_move_forward() {
        let s = store();
        s.apply_buy_fill("600036", "Bank", 1000, 10.0).unwrap();
        let now = Utc::now();
        s.add_grid_levels(
            "600036",
            vec![GridLevel {
                level: 1,
                buy_price: 9.7,
                sell_price: 10.3,
                volume: 100,
                status: GridStatus::Pending,
                created_at: now,
                updated_at: now,
            }],
        )
        .unwrap();

        // Completed before Active is not a legal transition.
        assert!(s.update_grid_status("600036", 1, GridStatus::Completed).is_err());
        s.update_grid_status("600036", 1, GridStatus::Active).unwrap();
        s.update_grid_status("600036", 1, GridStatus::Completed).unwrap();
        // Terminal: no resurrection.
        assert!(s.update_grid_status("600036", 1, GridStatus::Active).is_err());
    }

    #[test]
    fn full_close_discards_ladder_and_signals() {
        let s = store();
        s.apply_buy_fill("600036", "Bank", 1000, 10.0).unwrap();
        let now = Utc::now();
        s.add_grid_levels(
            "600036",
            vec![GridLevel {
                level: 1,
                buy_price: 9.7,
                sell_price: 10.3,
                volume: 100,
                status: GridStatus::Pending,
                created_at: now,
                updated_at: now,
            }],
        )
        .unwrap();
        s.publish_signal(TradeSignal {
            symbol: "600036".to_string(),
            kind: SignalKind::StopLoss,
            current_price: 9.0,
            threshold_price: 9.05,
            volume: 1000,
            detected_at: Utc::now(),
        });

        s.apply_sell_fill("600036", 1000, 9.0).unwrap();
        assert!(s.grid_levels("600036").is_empty());
        assert!(s.pending_signals().is_empty());
    }

    #[test]
    fn at_most_one_pending_signal_per_symbol() {
        let s = store();
        let mk = |kind| TradeSignal {
            symbol: "600036".to_string(),
            kind,
            current_price: 10.5,
            threshold_price: 10.5,
            volume: 500,
            detected_at: Utc::now(),
        };
        assert!(s.publish_signal(mk(SignalKind::TakeProfitHalf)));
        assert!(s.publish_signal(mk(SignalKind::TakeProfitHalf)));
        assert_eq!(s.pending_signals().len(), 1);
    }

    #[test]
    fn consumed_action_does_not_refire_same_day() {
        let s = store();
        let signal = TradeSignal {
            symbol: "600036".to_string(),
            kind: SignalKind::TakeProfitHalf,
            current_price: 10.5,
            threshold_price: 10.5,
            volume: 500,
            detected_at: Utc::now(),
        };
        assert!(s.publish_signal(signal.clone()));
        assert!(s.mark_consumed("600036").is_some());
        // Same kind, same day: suppressed.
        assert!(!s.publish_signal(signal.clone()));
        // A different kind may still fire.
        let mut full = signal;
        full.kind = SignalKind::TakeProfitFull;
        assert!(s.publish_signal(full));
    }

    #[test]
    fn expired_signals_are_dropped() {
        let s = store();
        let stale = TradeSignal {
            symbol: "600036".to_string(),
            kind: SignalKind::StopLoss,
            current_price: 9.0,
            threshold_price: 9.05,
            volume: 1000,
            detected_at: Utc::now() - chrono::Duration::seconds(301),
        };
        s.publish_signal(stale);
        assert!(s.pending_signals().is_empty());
    }

    #[test]
    fn snapshot_is_a_copy() {
        let s = store();
        s.apply_buy_fill("600036", "Bank", 1000, 10.0).unwrap();
        let snap = s.snapshot();
        s.apply_buy_fill("600036", "Bank", 1000, 12.0).unwrap();
        assert_eq!(snap.positions[0].volume, 1000);
        assert!(s.snapshot().data_version > snap.data_version);
    }
}
