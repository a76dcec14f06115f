//! Persistence sync job: keeps durable position rows trailing the
//! in-memory store. Memory is authoritative; SQLite is a shadow.

use chrono::{Local, NaiveDateTime};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::core::store::PositionStore;
use crate::db::{Database, PositionRecord};
use crate::error::TradingResult;

pub struct PersistenceSyncJob {
    store: Arc<PositionStore>,
    db: Arc<Database>,
    config: Config,
}

impl PersistenceSyncJob {
    pub fn new(store: Arc<PositionStore>, db: Arc<Database>, config: Config) -> Self {
        Self { store, db, config }
    }

    pub fn spawn(self, mut stop: watch::Receiver<bool>) -> JoinHandle<()> {
        let interval = Duration::from_secs(self.config.sync.interval_secs);
        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "persistence sync started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !self.should_sync(Local::now().naive_local()) {
                            continue;
                        }
                        if !self.store.take_changed() {
                            continue;
                        }
                        // Failures are retried on the next cycle; memory
                        // stays authoritative in the meantime.
                        match self.sync_once() {
                            Ok(written) => {
                                debug!(written, version = self.store.data_version(), "positions synced")
                            }
                            Err(e) => error!(error = %e, "position sync failed, will retry"),
                        }
                    }
                    _ = stop.changed() => {
                        if *stop.borrow() {
                            info!("persistence sync stopping");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Durable rows track live positions during trading hours only.
    /// Simulated positions never reach storage.
    fn should_sync(&self, now: NaiveDateTime) -> bool {
        !self.config.trading.mode.is_simulation() && self.config.is_trading_time(now)
    }

    /// One reconciliation pass: delete durable rows for symbols no longer
    /// held, upsert rows whose persisted fields changed.
    pub fn sync_once(&self) -> TradingResult<usize> {
        let snapshot = self.store.snapshot();
        let conn = self.db.get_connection();

        let held: HashSet<String> = snapshot
            .positions
            .iter()
            .map(|p| p.symbol.clone())
            .collect();

        for symbol in PositionRecord::list_symbols(Arc::clone(&conn))? {
            if !held.contains(&symbol) {
                PositionRecord::delete(Arc::clone(&conn), &symbol)?;
                debug!(symbol = %symbol, "deleted stale durable position");
            }
        }

        let mut written = 0;
        for position in &snapshot.positions {
            let record = PositionRecord::from(position);
            let existing = PositionRecord::find_by_symbol(Arc::clone(&conn), &position.symbol)?;
            let unchanged = existing.as_ref().is_some_and(|e| e.same_as(&record));
            if !unchanged {
                record.upsert(Arc::clone(&conn))?;
                written += 1;
            }
        }
        Ok(written)
    }

    /// Restore held positions from durable storage into the store, used
    /// at startup before the monitor begins ticking.
    pub fn restore(&self) -> TradingResult<usize> {
        let conn = self.db.get_connection();
        let records = PositionRecord::list_all(conn)?;
        let count = records.len();
        for record in records {
            self.store.restore_position(record_to_position(&record))?;
        }
        if count > 0 {
            info!(count, "restored positions from durable storage");
        }
        Ok(count)
    }
}

fn record_to_position(record: &PositionRecord) -> crate::core::position::Position {
    crate::core::position::Position {
        symbol: record.symbol.clone(),
        name: record.name.clone(),
        volume: record.volume,
        available: record.available,
        cost_price: record.cost_price,
        current_price: record.current_price,
        market_value: record.market_value,
        profit_ratio: record.profit_ratio,
        highest_price: record.highest_price,
        profit_triggered: record.profit_triggered,
        stop_loss_price: record.stop_loss_price,
        open_date: record.open_date,
        last_update: record.last_update,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::types::TradingMode;

    fn setup(mode: TradingMode) -> (Arc<PositionStore>, Arc<Database>, PersistenceSyncJob) {
        let mut config = Config::default();
        config.trading.mode = mode;
        let store = Arc::new(PositionStore::new(config.risk.clone()));
        let db = Arc::new(Database::new_in_memory().unwrap());
        db.run_migrations().unwrap();
        let job = PersistenceSyncJob::new(Arc::clone(&store), Arc::clone(&db), config);
        (store, db, job)
    }

    #[test]
    fn sync_upserts_and_deletes() {
        let (store, db, job) = setup(TradingMode::Live);
        store.apply_buy_fill("600036", "Bank", 1000, 10.0).unwrap();
        store.apply_buy_fill("000001", "Other", 500, 5.0).unwrap();

        assert_eq!(job.sync_once().unwrap(), 2);
        let symbols = PositionRecord::list_symbols(db.get_connection()).unwrap();
        assert_eq!(symbols.len(), 2);

        // Close one position; the next pass deletes its durable row.
        store.apply_sell_fill("000001", 500, 5.2).unwrap();
        job.sync_once().unwrap();
        let symbols = PositionRecord::list_symbols(db.get_connection()).unwrap();
        assert_eq!(symbols, vec!["600036".to_string()]);
    }

    #[test]
    fn unchanged_rows_are_skipped() {
        let (store, _db, job) = setup(TradingMode::Live);
        store.apply_buy_fill("600036", "Bank", 1000, 10.0).unwrap();
        assert_eq!(job.sync_once().unwrap(), 1);
        // Nothing moved: nothing written.
        assert_eq!(job.sync_once().unwrap(), 0);
    }

    #[test]
    fn sync_gated_by_mode_and_trading_hours() {
        use chrono::NaiveDate;
        let (_store, _db, live) = setup(TradingMode::Live);
        let (_store2, _db2, sim) = setup(TradingMode::Simulation);

        let monday = NaiveDate::from_ymd_opt(2026, 8, 24).unwrap();
        let in_session = monday.and_hms_opt(10, 0, 0).unwrap();
        let lunch_break = monday.and_hms_opt(12, 0, 0).unwrap();
        let saturday = NaiveDate::from_ymd_opt(2026, 8, 22)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();

        assert!(live.should_sync(in_session));
        assert!(!live.should_sync(lunch_break));
        assert!(!live.should_sync(saturday));
        assert!(!sim.should_sync(in_session));
    }

    #[test]
    fn restore_round_trips_positions() {
        let (store, db, job) = setup(TradingMode::Live);
        store.apply_buy_fill("600036", "Bank", 1000, 10.0).unwrap();
        store.mark_profit_triggered("600036").unwrap();
        job.sync_once().unwrap();

        let fresh_store = Arc::new(PositionStore::new(Config::default().risk));
        let fresh_job = PersistenceSyncJob::new(
            Arc::clone(&fresh_store),
            Arc::clone(&db),
            Config::default(),
        );
        assert_eq!(fresh_job.restore().unwrap(), 1);
        let restored = fresh_store.get("600036").unwrap();
        assert_eq!(restored.volume, 1000);
        assert!(restored.profit_triggered);
    }
}
