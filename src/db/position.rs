//! Durable position rows consumed by the persistence sync job

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Result as SqlResult, Row};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use crate::core::position::Position;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PositionRecord {
    pub symbol: String,
    pub name: String,
    pub volume: i64,
    pub available: i64,
    pub cost_price: f64,
    pub current_price: f64,
    pub market_value: f64,
    pub profit_ratio: f64,
    pub highest_price: f64,
    pub profit_triggered: bool,
    pub stop_loss_price: f64,
    pub open_date: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

impl From<&Position> for PositionRecord {
    fn from(p: &Position) -> Self {
        PositionRecord {
            symbol: p.symbol.clone(),
            name: p.name.clone(),
            volume: p.volume,
            available: p.available,
            cost_price: p.cost_price,
            current_price: p.current_price,
            market_value: p.market_value,
            profit_ratio: p.profit_ratio,
            highest_price: p.highest_price,
            profit_triggered: p.profit_triggered,
            stop_loss_price: p.stop_loss_price,
            open_date: p.open_date,
            last_update: p.last_update,
        }
    }
}

impl PositionRecord {
    /// Parse a row from the database
    fn from_row(row: &Row) -> SqlResult<Self> {
        let open_date: String = row.get(11)?;
        let last_update: String = row.get(12)?;
        Ok(PositionRecord {
            symbol: row.get(0)?,
            name: row.get(1)?,
            volume: row.get(2)?,
            available: row.get(3)?,
            cost_price: row.get(4)?,
            current_price: row.get(5)?,
            market_value: row.get(6)?,
            profit_ratio: row.get(7)?,
            highest_price: row.get(8)?,
            profit_triggered: row.get::<_, i64>(9)? != 0,
            stop_loss_price: row.get(10)?,
            open_date: parse_timestamp(&open_date),
            last_update: parse_timestamp(&last_update),
        })
    }

    /// Insert or replace the row for this symbol
    pub fn upsert(&self, conn: Arc<Mutex<Connection>>) -> SqlResult<()> {
        let conn = conn.lock().unwrap();
        conn.execute(
            "INSERT INTO positions (
                symbol, name, volume, available, cost_price, current_price,
                market_value, profit_ratio, highest_price, profit_triggered,
                stop_loss_price, open_date, last_update
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT(symbol) DO UPDATE SET
                name = excluded.name,
                volume = excluded.volume,
                available = excluded.available,
                cost_price = excluded.cost_price,
                current_price = excluded.current_price,
                market_value = excluded.market_value,
                profit_ratio = excluded.profit_ratio,
                highest_price = excluded.highest_price,
                profit_triggered = excluded.profit_triggered,
                stop_loss_price = excluded.stop_loss_price,
                open_date = excluded.open_date,
                last_update = excluded.last_update",
            params![
                self.symbol,
                self.name,
                self.volume,
                self.available,
                self.cost_price,
                self.current_price,
                self.market_value,
                self.profit_ratio,
                self.highest_price,
                self.profit_triggered as i64,
                self.stop_loss_price,
                self.open_date.to_rfc3339(),
                self.last_update.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn delete(conn: Arc<Mutex<Connection>>, symbol: &str) -> SqlResult<usize> {
        let conn = conn.lock().unwrap();
        conn.execute("DELETE FROM positions WHERE symbol = ?1", params![symbol])
    }

    pub fn list_symbols(conn: Arc<Mutex<Connection>>) -> SqlResult<Vec<String>> {
        let conn = conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT symbol FROM positions ORDER BY symbol")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect()
    }

    pub fn find_by_symbol(
        conn: Arc<Mutex<Connection>>,
        symbol: &str,
    ) -> SqlResult<Option<Self>> {
        let conn = conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT symbol, name, volume, available, cost_price, current_price,
                    market_value, profit_ratio, highest_price, profit_triggered,
                    stop_loss_price, open_date, last_update
             FROM positions WHERE symbol = ?1",
        )?;

        let mut rows = stmt.query(params![symbol])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::from_row(row)?)),
            None => Ok(None),
        }
    }

    pub fn list_all(conn: Arc<Mutex<Connection>>) -> SqlResult<Vec<Self>> {
        let conn = conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT symbol, name, volume, available, cost_price, current_price,
                    market_value, profit_ratio, highest_price, profit_triggered,
                    stop_loss_price, open_date, last_update
             FROM positions ORDER BY symbol",
        )?;

        let rows = stmt.query_map([], |row| Self::from_row(row))?;
        rows.collect()
    }

    /// Whether the durable row already matches this record's persisted
    /// fields, used by the sync job to skip untouched symbols.
    pub fn same_as(&self, other: &PositionRecord) -> bool {
        self.volume == other.volume
            && self.available == other.available
            && close(self.cost_price, other.cost_price)
            && close(self.current_price, other.current_price)
            && close(self.highest_price, other.highest_price)
            && self.profit_triggered == other.profit_triggered
            && close(self.stop_loss_price, other.stop_loss_price)
    }
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
