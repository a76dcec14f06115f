//! Paper gateway: immediate simulated fills against a cash account.
//!
//! Fills are written to the append-only trade ledger regardless of mode;
//! the ledger is the audit trail for simulated and live runs alike.

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use std::sync::{Arc, Mutex};
use tracing::info;
use uuid::Uuid;

use crate::config::AccountConfig;
use crate::db::{Database, TradeRecord};
use crate::error::{TradingError, TradingResult};
use crate::trade::{ExecutionGateway, Fill, OrderId, OrderRequest};
use crate::types::OrderSide;

pub struct PaperGateway {
    cash: Mutex<f64>,
    buy_commission: f64,
    sell_commission: f64,
    /// Max relative price jitter applied to fills; zero means fill at the
    /// requested price.
    slippage: f64,
    db: Arc<Database>,
}

impl PaperGateway {
    pub fn new(account: &AccountConfig, db: Arc<Database>) -> Self {
        Self {
            cash: Mutex::new(account.initial_cash),
            buy_commission: account.buy_commission,
            sell_commission: account.sell_commission,
            slippage: 0.0,
            db,
        }
    }

    pub fn with_slippage(mut self, slippage: f64) -> Self {
        self.slippage = slippage;
        self
    }

    pub fn cash_balance(&self) -> f64 {
        *self.cash.lock().unwrap()
    }

    fn fill_price(&self, request: &OrderRequest) -> f64 {
        if self.slippage <= 0.0 {
            return request.price;
        }
        let jitter = rand::thread_rng().gen_range(-self.slippage..=self.slippage);
        request.price * (1.0 + jitter)
    }
}

#[async_trait]
impl ExecutionGateway for PaperGateway {
    async fn submit_order(&self, request: &OrderRequest) -> TradingResult<Fill> {
        if request.volume <= 0 || request.price <= 0.0 {
            return Err(TradingError::Order(format!(
                "order for {} needs positive volume and price",
                request.symbol
            )));
        }

        let price = self.fill_price(request);
        let amount = price * request.volume as f64;
        let commission = match request.side {
            OrderSide::Buy => amount * self.buy_commission,
            OrderSide::Sell => amount * self.sell_commission,
        };

        {
            let mut cash = self.cash.lock().unwrap();
            match request.side {
                OrderSide::Buy => {
                    let needed = amount + commission;
                    if needed > *cash {
                        return Err(TradingError::Order(format!(
                            "insufficient cash for {}: need {:.2}, have {:.2}",
                            request.symbol, needed, *cash
                        )));
                    }
                    *cash -= needed;
                }
                OrderSide::Sell => {
                    *cash += amount - commission;
                }
            }
        }

        let order_id = OrderId(Uuid::new_v4().to_string());
        let record = TradeRecord::new(
            order_id.0.clone(),
            request.symbol.clone(),
            request.name.clone(),
            request.side,
            price,
            request.volume,
            commission,
            request.reason.clone(),
        );
        record.insert(self.db.get_connection())?;

        info!(
            symbol = %request.symbol,
            side = request.side.as_str(),
            price,
            volume = request.volume,
            reason = %request.reason,
            "paper fill"
        );

        Ok(Fill {
            order_id,
            symbol: request.symbol.clone(),
            side: request.side,
            price,
            volume: request.volume,
            commission,
            executed_at: Utc::now(),
        })
    }

    async fn cancel_order(&self, _order_id: &OrderId) -> TradingResult<bool> {
        // Paper orders fill synchronously, there is never anything to cancel.
        Ok(false)
    }
}
