//! Append-only trade ledger. Every executed order lands here, in live
//! and simulation mode alike.

use rusqlite::{params, Connection, Result as SqlResult, Row};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use crate::types::OrderSide;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Option<i64>,
    pub order_id: String,
    pub symbol: String,
    pub name: String,
    pub side: OrderSide,
    pub price: f64,
    pub volume: i64,
    pub amount: f64,
    pub commission: f64,
    /// What drove the trade: a risk signal kind, a grid level, or "manual".
    pub reason: String,
    pub executed_at: Option<String>,
}

impl TradeRecord {
    pub fn new(
        order_id: String,
        symbol: String,
        name: String,
        side: OrderSide,
        price: f64,
        volume: i64,
        commission: f64,
        reason: String,
    ) -> Self {
        TradeRecord {
            id: None,
            order_id,
            symbol,
            name,
            side,
            price,
            volume,
            amount: price * volume as f64,
            commission,
            reason,
            executed_at: None,
        }
    }

    fn from_row(row: &Row) -> SqlResult<Self> {
        Ok(TradeRecord {
            id: Some(row.get(0)?),
            order_id: row.get(1)?,
            symbol: row.get(2)?,
            name: row.get(3)?,
            side: OrderSide::from_str(&row.get::<_, String>(4)?),
            price: row.get(5)?,
            volume: row.get(6)?,
            amount: row.get(7)?,
            commission: row.get(8)?,
            reason: row.get(9)?,
            executed_at: Some(row.get(10)?),
        })
    }

    /// Append the record. Ledger rows are never updated or deleted.
    pub fn insert(&self, conn: Arc<Mutex<Connection>>) -> SqlResult<i64> {
        let conn = conn.lock().unwrap();
        conn.execute(
            "INSERT INTO trade_records (
                order_id, symbol, name, side, price, volume, amount, commission, reason
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                self.order_id,
                self.symbol,
                self.name,
                self.side.as_str(),
                self.price,
                self.volume,
                self.amount,
                self.commission,
                self.reason,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_by_symbol(conn: Arc<Mutex<Connection>>, symbol: &str) -> SqlResult<Vec<Self>> {
        let conn = conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, order_id, symbol, name, side, price, volume, amount, commission,
                    reason, executed_at
             FROM trade_records WHERE symbol = ?1 ORDER BY id DESC",
        )?;

        let rows = stmt.query_map(params![symbol], |row| Self::from_row(row))?;
        rows.collect()
    }

    pub fn list_recent(conn: Arc<Mutex<Connection>>, limit: u32) -> SqlResult<Vec<Self>> {
        let conn = conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, order_id, symbol, name, side, price, volume, amount, commission,
                    reason, executed_at
             FROM trade_records ORDER BY id DESC LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit], |row| Self::from_row(row))?;
        rows.collect()
    }
}
