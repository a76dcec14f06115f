//! Data-source failover with health tracking and degraded-mode lock-in.
//!
//! Sources are tried in priority order. In simulation mode a failover to a
//! backup source locks in: no automatic fail-back, no error decay, until an
//! explicit switch or a mode change. Live mode runs a single source and
//! fails closed.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::DataConfig;
use crate::data::PriceSource;
use crate::error::{TradingError, TradingResult};
use crate::types::{Quote, TradingMode};

/// Spacing between quick retries of one fetch attempt.
const RETRY_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
struct SourceHealth {
    error_count: u32,
    healthy: bool,
    last_success: Option<DateTime<Utc>>,
}

impl SourceHealth {
    fn fresh() -> Self {
        Self {
            error_count: 0,
            healthy: true,
            last_success: None,
        }
    }
}

/// Per-source report for the status surface.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SourceStatus {
    pub name: String,
    pub healthy: bool,
    pub error_count: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub current: bool,
    pub locked: bool,
}

struct FailoverState {
    health: Vec<SourceHealth>,
    current: usize,
    locked: bool,
    mode: TradingMode,
    last_fetch: HashMap<String, Instant>,
    cache: HashMap<String, Quote>,
}

pub struct FailoverManager {
    sources: Vec<Arc<dyn PriceSource>>,
    fetch_timeout: Duration,
    retries: u32,
    min_fetch_interval: Duration,
    state: Mutex<FailoverState>,
}

impl FailoverManager {
    pub fn new(sources: Vec<Arc<dyn PriceSource>>, mode: TradingMode, data: &DataConfig) -> Self {
        let health = sources.iter().map(|_| SourceHealth::fresh()).collect();
        Self {
            sources,
            fetch_timeout: Duration::from_secs(data.timeout_secs),
            retries: data.retries,
            min_fetch_interval: Duration::from_millis(data.min_fetch_interval_ms),
            state: Mutex::new(FailoverState {
                health,
                current: 0,
                locked: false,
                mode,
                last_fetch: HashMap::new(),
                cache: HashMap::new(),
            }),
        }
    }

    /// Fetch the latest quote for a symbol, or `None` when no healthy
    /// source can provide one this tick. `None` always means "no update".
    pub async fn get_price(&self, symbol: &str) -> Option<Quote> {
        let candidates = {
            let state = self.state.lock().unwrap();

            // Within the per-symbol spacing window, hand out the cached
            // quote so every consumer of this tick sees the same price.
            if let Some(last) = state.last_fetch.get(symbol) {
                if last.elapsed() < self.min_fetch_interval {
                    return state.cache.get(symbol).cloned();
                }
            }
            self.candidate_order(&state)
        };

        for index in candidates {
            let source = Arc::clone(&self.sources[index]);
            match self.try_fetch(&source, symbol).await {
                Ok(quote) => {
                    self.record_success(index, symbol, &quote);
                    return Some(quote);
                }
                Err(reason) => {
                    self.record_failure(index, symbol, &reason);
                }
            }
        }

        warn!(symbol, "no data source could provide a quote");
        None
    }

    /// Manually pin a source by name. Resets all error counters and
    /// releases any lock-in.
    pub fn switch_source(&self, name: &str) -> TradingResult<()> {
        let index = self
            .sources
            .iter()
            .position(|s| s.name() == name)
            .ok_or_else(|| TradingError::MarketData(format!("unknown data source {}", name)))?;

        let mut state = self.state.lock().unwrap();
        for health in &mut state.health {
            *health = SourceHealth::fresh();
        }
        state.current = index;
        state.locked = false;
        info!(source = name, "switched data source");
        Ok(())
    }

    /// Change trading mode. Releases lock-in and resets health state.
    pub fn set_mode(&self, mode: TradingMode) {
        let mut state = self.state.lock().unwrap();
        state.mode = mode;
        for health in &mut state.health {
            *health = SourceHealth::fresh();
        }
        state.current = 0;
        state.locked = false;
        info!(?mode, "data source health reset on mode change");
    }

    pub fn status(&self) -> Vec<SourceStatus> {
        let state = self.state.lock().unwrap();
        self.sources
            .iter()
            .enumerate()
            .map(|(i, source)| SourceStatus {
                name: source.name().to_string(),
                healthy: state.health[i].healthy,
                error_count: state.health[i].error_count,
                last_success: state.health[i].last_success,
                current: i == state.current,
                locked: state.locked && i == state.current,
            })
            .collect()
    }

    /// Current source first, then the remaining healthy sources in
    /// priority order. Live mode never fails over.
    fn candidate_order(&self, state: &FailoverState) -> Vec<usize> {
        if state.mode == TradingMode::Live {
            return if state.health[state.current].healthy {
                vec![state.current]
            } else {
                Vec::new()
            };
        }

        // Locked in after a degraded failover: the current source is the
        // only candidate, regardless of its health. Its failures mean no
        // update, never a fall-back.
        if state.locked {
            return vec![state.current];
        }

        let mut order = Vec::with_capacity(self.sources.len());
        if state.health[state.current].healthy {
            order.push(state.current);
        }
        for i in 0..self.sources.len() {
            if i != state.current && state.health[i].healthy {
                order.push(i);
            }
        }
        order
    }

    async fn try_fetch(
        &self,
        source: &Arc<dyn PriceSource>,
        symbol: &str,
    ) -> Result<Quote, String> {
        let mut last_error = String::new();
        for attempt in 0..=self.retries {
            if attempt > 0 {
                sleep(RETRY_DELAY).await;
            }
            match timeout(self.fetch_timeout, source.fetch(symbol)).await {
                Ok(Ok(quote)) if quote.is_valid() => return Ok(quote),
                Ok(Ok(quote)) => {
                    last_error = format!("non-positive price {}", quote.last_price);
                }
                Ok(Err(e)) => {
                    last_error = e.to_string();
                }
                Err(_) => {
                    last_error = "timeout".to_string();
                }
            }
            debug!(
                source = source.name(),
                symbol,
                attempt,
                error = %last_error,
                "fetch attempt failed"
            );
        }
        Err(last_error)
    }

    fn record_success(&self, index: usize, symbol: &str, quote: &Quote) {
        let mut state = self.state.lock().unwrap();
        state.health[index].error_count = 0;
        state.health[index].healthy = true;
        state.health[index].last_success = Some(Utc::now());

        if index != state.current {
            let from = self.sources[state.current].name().to_string();
            state.current = index;
            // Failover away from the primary locks in while degraded; we
            // stay here until an operator switches back or the mode flips.
            if state.mode.is_simulation() && index != 0 {
                state.locked = true;
            }
            warn!(from = %from, to = self.sources[index].name(), locked = state.locked, "data source failover");
        }

        state.last_fetch.insert(symbol.to_string(), Instant::now());
        state.cache.insert(symbol.to_string(), quote.clone());
    }

    fn record_failure(&self, index: usize, symbol: &str, reason: &str) {
        let mut state = self.state.lock().unwrap();
        state.health[index].error_count += 1;
        let count = state.health[index].error_count;
        let limit = self.sources[index].max_errors();
        if count >= limit && state.health[index].healthy {
            state.health[index].healthy = false;
            warn!(
                source = self.sources[index].name(),
                symbol,
                errors = count,
                reason,
                "data source marked unhealthy"
            );
        }
    }
}
