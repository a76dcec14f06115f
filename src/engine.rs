//! Engine wiring: builds every component from configuration and owns the
//! background task lifecycle. All dependencies are injected, nothing is
//! global, so tests can assemble an engine around fakes.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Config;
use crate::core::grid::GridEngine;
use crate::core::monitor::PositionMonitorLoop;
use crate::core::position::Position;
use crate::core::store::{PositionStore, Snapshot};
use crate::core::sync::PersistenceSyncJob;
use crate::data::{FailoverManager, HttpQuoteSource, PriceSource, SourceStatus};
use crate::db::Database;
use crate::error::{TradingError, TradingResult};
use crate::trade::{ExecutionGateway, OrderRequest, PaperGateway};
use crate::types::{OrderSide, TradeSignal};

pub struct TradingEngine {
    config: Config,
    store: Arc<PositionStore>,
    failover: Arc<FailoverManager>,
    grid: Arc<GridEngine>,
    gateway: Arc<dyn ExecutionGateway>,
    db: Arc<Database>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TradingEngine {
    /// Build an engine with the default adapters: HTTP quote sources and
    /// the paper gateway.
    pub fn new(config: Config) -> TradingResult<Self> {
        config.validate()?;

        let db = Arc::new(Database::new(&config.sync.database_path)?);
        db.run_migrations()?;

        let sources: Vec<Arc<dyn PriceSource>> = config
            .data
            .sources
            .iter()
            .map(|s| Arc::new(HttpQuoteSource::new(s)) as Arc<dyn PriceSource>)
            .collect();

        let gateway: Arc<dyn ExecutionGateway> =
            Arc::new(PaperGateway::new(&config.account, Arc::clone(&db)));

        Self::with_adapters(config, db, sources, gateway)
    }

    /// Build an engine around injected adapters.
    pub fn with_adapters(
        config: Config,
        db: Arc<Database>,
        sources: Vec<Arc<dyn PriceSource>>,
        gateway: Arc<dyn ExecutionGateway>,
    ) -> TradingResult<Self> {
        let store = Arc::new(PositionStore::new(config.risk.clone()));
        let failover = Arc::new(FailoverManager::new(
            sources,
            config.trading.mode,
            &config.data,
        ));
        let grid = Arc::new(GridEngine::new(config.grid.clone()));
        let (stop_tx, stop_rx) = watch::channel(false);

        let engine = Self {
            config,
            store,
            failover,
            grid,
            gateway,
            db,
            stop_tx,
            stop_rx,
            tasks: Mutex::new(Vec::new()),
        };

        // Live runs pick up where the last run left off; simulated runs
        // always start from a clean book.
        if !engine.config.trading.mode.is_simulation() {
            let restored = engine.sync_job().restore()?;
            for position in engine.store.snapshot().positions {
                engine.ensure_ladder(&position);
            }
            if restored > 0 {
                info!(restored, "engine restored durable positions");
            }
        }

        Ok(engine)
    }

    fn sync_job(&self) -> PersistenceSyncJob {
        PersistenceSyncJob::new(
            Arc::clone(&self.store),
            Arc::clone(&self.db),
            self.config.clone(),
        )
    }

    /// Spawn the monitor and sync tasks.
    pub fn start(&self) {
        let monitor = PositionMonitorLoop::new(
            Arc::clone(&self.store),
            Arc::clone(&self.failover),
            Arc::clone(&self.grid),
            Arc::clone(&self.gateway),
            self.config.clone(),
        );

        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(monitor.spawn(self.stop_rx.clone()));
        tasks.push(self.sync_job().spawn(self.stop_rx.clone()));
        info!(mode = ?self.config.trading.mode, "engine started");
    }

    /// Signal both tasks to stop and wait for them, bounded by the
    /// configured shutdown timeout. In-flight writes complete; a task
    /// that overruns is reported, not killed mid-mutation.
    pub async fn shutdown(&self) -> TradingResult<()> {
        let _ = self.stop_tx.send(true);
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock().unwrap());
        let deadline = Duration::from_secs(self.config.trading.shutdown_timeout_secs);

        let mut pending = 0;
        for handle in handles {
            if tokio::time::timeout(deadline, handle).await.is_err() {
                pending += 1;
            }
        }
        if pending > 0 {
            warn!(pending, "tasks still running at shutdown deadline");
            return Err(TradingError::ShutdownTimeout(pending));
        }
        info!("engine stopped");
        Ok(())
    }

    // ---- manual trading surface ----

    /// Buy through the gateway and apply the fill. A ladder is built for
    /// newly opened positions when grid trading is enabled.
    pub async fn buy(
        &self,
        symbol: &str,
        name: &str,
        volume: i64,
        price: f64,
    ) -> TradingResult<Position> {
        let request = OrderRequest {
            symbol: symbol.to_string(),
            name: name.to_string(),
            side: OrderSide::Buy,
            price,
            volume,
            reason: "manual".to_string(),
        };
        let fill = self.gateway.submit_order(&request).await?;
        let position = self
            .store
            .apply_buy_fill(symbol, name, fill.volume, fill.price)?;
        self.ensure_ladder(&position);
        Ok(position)
    }

    /// Sell through the gateway and apply the fill.
    pub async fn sell(&self, symbol: &str, volume: i64, price: f64) -> TradingResult<()> {
        let position = self
            .store
            .get(symbol)
            .ok_or_else(|| TradingError::UnknownPosition(symbol.to_string()))?;
        if volume > position.available {
            return Err(TradingError::MutationRejected(format!(
                "sell of {} exceeds {} available for {}",
                volume, position.available, symbol
            )));
        }

        let request = OrderRequest {
            symbol: symbol.to_string(),
            name: position.name.clone(),
            side: OrderSide::Sell,
            price,
            volume,
            reason: "manual".to_string(),
        };
        let fill = self.gateway.submit_order(&request).await?;
        let outcome = self.store.apply_sell_fill(symbol, fill.volume, fill.price)?;
        if outcome.closed {
            self.grid.forget(symbol);
        }
        Ok(())
    }

    fn ensure_ladder(&self, position: &Position) {
        if !self.grid.is_enabled() || !self.store.grid_levels(&position.symbol).is_empty() {
            return;
        }
        let ladder = self.grid.build_ladder(position, position.cost_price);
        if !ladder.is_empty() {
            if let Err(e) = self.store.add_grid_levels(&position.symbol, ladder) {
                warn!(symbol = %position.symbol, error = %e, "failed to install grid ladder");
            }
        }
    }

    // ---- read surface ----

    pub fn snapshot(&self) -> Snapshot {
        self.store.snapshot()
    }

    pub fn pending_signals(&self) -> Vec<TradeSignal> {
        self.store.pending_signals()
    }

    /// Explicitly consume a pending signal without executing it, for
    /// callers that route execution themselves.
    pub fn consume_signal(&self, symbol: &str) -> Option<TradeSignal> {
        self.store.mark_consumed(symbol)
    }

    pub fn source_status(&self) -> Vec<SourceStatus> {
        self.failover.status()
    }

    pub fn switch_source(&self, name: &str) -> TradingResult<()> {
        self.failover.switch_source(name)
    }

    pub fn store(&self) -> &Arc<PositionStore> {
        &self.store
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Run one monitor pass immediately, regardless of trading hours.
    pub async fn tick_once(&self) -> TradingResult<()> {
        let monitor = PositionMonitorLoop::new(
            Arc::clone(&self.store),
            Arc::clone(&self.failover),
            Arc::clone(&self.grid),
            Arc::clone(&self.gateway),
            self.config.clone(),
        );
        monitor.tick().await
    }
}
