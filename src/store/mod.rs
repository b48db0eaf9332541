// =============================================================================
// Trade Store — durable, crash-safe record of selections, orders, positions
// =============================================================================
//
// Backing engine: `rusqlite` with the `bundled` feature, grounded in
// `matiasvillaverde-trust`'s `trust-db-sqlite` (the only repo in the pack
// with a working persistence layer for a trading system) and in
// `original_source/core/trading/trade_database.py`'s WAL-mode sqlite3 usage
// plus `tools/fix_database_lock.py`'s stale-WAL cleanup routine. The retry
// wrapper keeps the teacher's `tracing`-instrumented style (span per write,
// `warn!` on each retry) instead of `trust-db-sqlite`'s bare retry.

mod models;

pub use models::{DailySummary, TimeSlotSummary};

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::types::{SelectedStock, Side, TradeRecord};

const SCHEMA: &str = include_str!("schema.sql");
const MAX_RETRIES: u32 = 5;
const RETRY_BASE: Duration = Duration::from_millis(20);

pub struct TradeStore {
    conn: Mutex<Connection>,
    pid_file: PathBuf,
}

impl TradeStore {
    /// Opens (or creates) the database at `db_path`, cleaning a stale
    /// WAL/SHM pair left by a previous crash if the pid-file sentinel
    /// doesn't match this process, then running the embedded schema.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).context("failed to create trade store directory")?;
            }
        }

        let pid_file = db_path.with_extension("pid");
        Self::clean_stale_journal_if_needed(db_path, &pid_file)?;
        std::fs::write(&pid_file, std::process::id().to_string())
            .context("failed to write trade store pid sentinel")?;

        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open trade store at {}", db_path.display()))?;
        conn.execute_batch(SCHEMA).context("failed to apply trade store schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
            pid_file,
        })
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            pid_file: PathBuf::new(),
        })
    }

    fn clean_stale_journal_if_needed(db_path: &Path, pid_file: &Path) -> Result<()> {
        if !pid_file.exists() {
            return Ok(());
        }
        let recorded = std::fs::read_to_string(pid_file).unwrap_or_default();
        let current = std::process::id().to_string();
        if recorded.trim() == current {
            return Ok(());
        }

        warn!(
            pid_file = %pid_file.display(),
            recorded_pid = %recorded.trim(),
            "trade store pid sentinel does not match this process, cleaning stale WAL/SHM"
        );
        for suffix in ["-wal", "-shm", "-journal"] {
            let candidate = PathBuf::from(format!("{}{}", db_path.display(), suffix));
            if candidate.exists() {
                std::fs::remove_file(&candidate)
                    .with_context(|| format!("failed to remove stale {}", candidate.display()))?;
            }
        }
        Ok(())
    }

    /// Removes the pid sentinel on a clean shutdown so the next boot doesn't
    /// treat this run as a crash.
    pub fn close_cleanly(&self) {
        if self.pid_file.as_os_str().is_empty() {
            return;
        }
        let _ = std::fs::remove_file(&self.pid_file);
    }

    /// Runs `f` against the locked connection, retrying with bounded
    /// exponential backoff while sqlite reports `SQLITE_BUSY`/`SQLITE_LOCKED`.
    #[instrument(skip(self, f))]
    fn with_retry<T>(&self, op: &str, mut f: impl FnMut(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let mut attempt = 0;
        loop {
            let conn = self.conn.lock();
            match f(&conn) {
                Ok(value) => return Ok(value),
                Err(e) if is_busy_or_locked(&e) && attempt < MAX_RETRIES => {
                    drop(conn);
                    let backoff = RETRY_BASE * 2u32.pow(attempt);
                    warn!(op, attempt, backoff_ms = backoff.as_millis() as u64, "trade store busy, retrying");
                    std::thread::sleep(backoff);
                    attempt += 1;
                }
                Err(e) => return Err(anyhow::Error::new(e).context(format!("trade store operation {op} failed"))),
            }
        }
    }

    /// Records a BUY and returns the generated trade id.
    pub fn record_buy(&self, symbol: &str, qty: f64, price: f64, strategy: &str, broker_order_id: &str) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let ts = Utc::now();
        let total = qty * price;
        self.with_retry("record_buy", |conn| {
            conn.execute(
                "INSERT INTO trades (id, side, symbol, qty, price, total, strategy, ts, broker_order_id, status)
                 VALUES (?1, 'BUY', ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'FILLED')",
                params![id, symbol, qty, price, total, strategy, ts.to_rfc3339(), broker_order_id],
            )
        })?;
        Ok(id)
    }

    /// Records a SELL, linking FIFO to the earliest BUY of the same symbol
    /// with unconsumed quantity. No row splitting on quantity mismatch —
    /// the link always points at the first unconsumed BUY regardless of
    /// whether quantities reconcile exactly.
    pub fn record_sell(&self, symbol: &str, qty: f64, price: f64, strategy: &str, broker_order_id: &str) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let ts = Utc::now();
        let total = qty * price;

        let buy = self.with_retry("find_fifo_buy", |conn| {
            conn.query_row(
                "SELECT t.id, t.price, t.ts FROM trades t
                 WHERE t.symbol = ?1 AND t.side = 'BUY'
                   AND NOT EXISTS (SELECT 1 FROM trades s WHERE s.buy_trade_id = t.id)
                 ORDER BY t.ts ASC LIMIT 1",
                params![symbol],
                |row| {
                    let id: String = row.get(0)?;
                    let price: f64 = row.get(1)?;
                    let ts: String = row.get(2)?;
                    Ok((id, price, ts))
                },
            )
            .optional()
        })?;

        let (buy_trade_id, pnl, pnl_rate, hold_minutes) = match buy {
            Some((buy_id, buy_price, buy_ts)) => {
                let pnl = (price - buy_price) * qty;
                let pnl_rate = if buy_price > 0.0 { (price - buy_price) / buy_price } else { 0.0 };
                let hold_minutes = chrono::DateTime::parse_from_rfc3339(&buy_ts)
                    .ok()
                    .map(|buy_dt| (ts - buy_dt.with_timezone(&Utc)).num_minutes());
                (Some(buy_id), Some(pnl), Some(pnl_rate), hold_minutes)
            }
            None => (None, None, None, None),
        };

        self.with_retry("record_sell", |conn| {
            conn.execute(
                "INSERT INTO trades (id, side, symbol, qty, price, total, strategy, ts, broker_order_id, status, buy_trade_id, pnl, pnl_rate, hold_minutes)
                 VALUES (?1, 'SELL', ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'FILLED', ?9, ?10, ?11, ?12)",
                params![
                    id,
                    symbol,
                    qty,
                    price,
                    total,
                    strategy,
                    ts.to_rfc3339(),
                    broker_order_id,
                    buy_trade_id,
                    pnl,
                    pnl_rate,
                    hold_minutes,
                ],
            )
        })?;
        Ok(id)
    }

    pub fn trades_for_symbol(&self, symbol: &str) -> Result<Vec<TradeRecord>> {
        self.with_retry("trades_for_symbol", |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, side, symbol, qty, price, total, strategy, ts, broker_order_id, status, buy_trade_id, pnl, pnl_rate, hold_minutes
                 FROM trades WHERE symbol = ?1 ORDER BY ts ASC",
            )?;
            let rows = stmt
                .query_map(params![symbol], row_to_trade_record)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    pub fn export_csv(&self, days: i64) -> Result<String> {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let rows = self.with_retry("export_csv", |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, side, symbol, qty, price, total, strategy, ts, broker_order_id, status, buy_trade_id, pnl, pnl_rate, hold_minutes
                 FROM trades WHERE ts >= ?1 ORDER BY ts ASC",
            )?;
            let rows = stmt
                .query_map(params![cutoff.to_rfc3339()], row_to_trade_record)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;

        let mut csv = String::from("id,side,symbol,qty,price,total,strategy,ts,order_id,status,buy_trade_id,pnl,pnl_rate,hold_minutes\n");
        for t in rows {
            csv.push_str(&format!(
                "{},{},{},{},{},{},{},{},{},{},{},{},{},{}\n",
                t.id,
                t.side,
                t.symbol,
                t.qty,
                t.price,
                t.total,
                t.strategy,
                t.ts.to_rfc3339(),
                t.order_id,
                t.status,
                t.buy_trade_id.unwrap_or_default(),
                t.pnl.map(|v| v.to_string()).unwrap_or_default(),
                t.pnl_rate.map(|v| v.to_string()).unwrap_or_default(),
                t.hold_minutes.map(|v| v.to_string()).unwrap_or_default(),
            ));
        }
        Ok(csv)
    }

    pub fn insert_selected_stock(&self, row: &SelectedStock) -> Result<()> {
        self.with_retry("insert_selected_stock", |conn| {
            conn.execute(
                "INSERT INTO selected_stocks (id, date, slot, symbol, strategy, score, reason, rank_in_strategy, activated, activated_ok, traded, trade_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    row.id,
                    row.date.to_string(),
                    row.slot,
                    row.symbol,
                    row.strategy,
                    row.score,
                    row.reason,
                    row.rank_in_strategy as i64,
                    row.activated as i64,
                    row.activated_ok as i64,
                    row.traded as i64,
                    row.trade_id,
                    Utc::now().to_rfc3339(),
                ],
            )
        })?;
        Ok(())
    }

    /// Idempotent upsert keyed by `date`.
    pub fn upsert_daily_summary(&self, summary: &DailySummary) -> Result<()> {
        self.with_retry("upsert_daily_summary", |conn| {
            conn.execute(
                "INSERT INTO daily_summary (date, total, buys, sells, pnl, pnl_rate, wins, losses, largest_win, largest_loss)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(date) DO UPDATE SET
                    total = excluded.total, buys = excluded.buys, sells = excluded.sells,
                    pnl = excluded.pnl, pnl_rate = excluded.pnl_rate, wins = excluded.wins,
                    losses = excluded.losses, largest_win = excluded.largest_win, largest_loss = excluded.largest_loss",
                params![
                    summary.date.to_string(),
                    summary.total,
                    summary.buys,
                    summary.sells,
                    summary.pnl,
                    summary.pnl_rate,
                    summary.wins,
                    summary.losses,
                    summary.largest_win,
                    summary.largest_loss,
                ],
            )
        })?;
        Ok(())
    }

    /// Idempotent upsert keyed by `(date, slot)`.
    pub fn upsert_time_slot_summary(&self, summary: &TimeSlotSummary) -> Result<()> {
        let per_strategy_json = serde_json::to_string(&summary.per_strategy)?;
        self.with_retry("upsert_time_slot_summary", |conn| {
            conn.execute(
                "INSERT INTO time_slot_summary (date, slot, total_candidates, total_trades, per_strategy_json, pnl, avg_score)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(date, slot) DO UPDATE SET
                    total_candidates = excluded.total_candidates, total_trades = excluded.total_trades,
                    per_strategy_json = excluded.per_strategy_json, pnl = excluded.pnl, avg_score = excluded.avg_score",
                params![
                    summary.date.to_string(),
                    summary.slot,
                    summary.total_candidates,
                    summary.total_trades,
                    per_strategy_json,
                    summary.pnl,
                    summary.avg_score,
                ],
            )
        })?;
        Ok(())
    }

    pub fn daily_summary(&self, date: NaiveDate) -> Result<Option<DailySummary>> {
        self.with_retry("daily_summary", |conn| {
            conn.query_row(
                "SELECT date, total, buys, sells, pnl, pnl_rate, wins, losses, largest_win, largest_loss
                 FROM daily_summary WHERE date = ?1",
                params![date.to_string()],
                |row| {
                    Ok(DailySummary {
                        date: row.get::<_, String>(0)?.parse().unwrap_or(date),
                        total: row.get(1)?,
                        buys: row.get(2)?,
                        sells: row.get(3)?,
                        pnl: row.get(4)?,
                        pnl_rate: row.get(5)?,
                        wins: row.get(6)?,
                        losses: row.get(7)?,
                        largest_win: row.get(8)?,
                        largest_loss: row.get(9)?,
                    })
                },
            )
            .optional()
        })
    }
}

fn row_to_trade_record(row: &rusqlite::Row) -> rusqlite::Result<TradeRecord> {
    let side_str: String = row.get(1)?;
    let side = if side_str == "BUY" { Side::Buy } else { Side::Sell };
    let ts: String = row.get(7)?;
    Ok(TradeRecord {
        id: row.get(0)?,
        side,
        symbol: row.get(2)?,
        qty: row.get(3)?,
        price: row.get(4)?,
        total: row.get(5)?,
        strategy: row.get(6)?,
        ts: chrono::DateTime::parse_from_rfc3339(&ts)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        order_id: row.get(8)?,
        status: row.get(9)?,
        buy_trade_id: row.get(10)?,
        pnl: row.get(11)?,
        pnl_rate: row.get(12)?,
        hold_minutes: row.get(13)?,
    })
}

fn is_busy_or_locked(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::DatabaseBusy || err.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buy_then_sell_links_via_fifo() {
        let store = TradeStore::open_memory().unwrap();
        store.record_buy("005930", 10.0, 70000.0, "gap_trading", "ORD-1").unwrap();
        let sell_id = store.record_sell("005930", 10.0, 72000.0, "gap_trading", "ORD-2").unwrap();

        let trades = store.trades_for_symbol("005930").unwrap();
        let sell = trades.iter().find(|t| t.id == sell_id).unwrap();
        assert!(sell.buy_trade_id.is_some());
        assert!((sell.pnl.unwrap() - 20000.0).abs() < 1e-6);
    }

    #[test]
    fn sell_without_prior_buy_has_no_link() {
        let store = TradeStore::open_memory().unwrap();
        let sell_id = store.record_sell("005930", 5.0, 70000.0, "existing_holding", "ORD-1").unwrap();
        let trades = store.trades_for_symbol("005930").unwrap();
        let sell = trades.iter().find(|t| t.id == sell_id).unwrap();
        assert!(sell.buy_trade_id.is_none());
        assert!(sell.pnl.is_none());
    }

    #[test]
    fn daily_summary_upsert_is_idempotent() {
        let store = TradeStore::open_memory().unwrap();
        let date = Utc::now().date_naive();
        let mut summary = DailySummary { date, total: 1, ..Default::default() };
        store.upsert_daily_summary(&summary).unwrap();
        summary.total = 2;
        store.upsert_daily_summary(&summary).unwrap();

        let loaded = store.daily_summary(date).unwrap().unwrap();
        assert_eq!(loaded.total, 2);
    }

    #[test]
    fn insert_selected_stock_roundtrips() {
        let store = TradeStore::open_memory().unwrap();
        let row = SelectedStock {
            id: Uuid::new_v4().to_string(),
            date: Utc::now().date_naive(),
            slot: "mid_market".to_string(),
            rank_in_strategy: 1,
            symbol: "005930".to_string(),
            strategy: "gap_trading".to_string(),
            score: 88.5,
            reason: "gap up".to_string(),
            activated: true,
            activated_ok: true,
            traded: false,
            trade_id: None,
        };
        store.insert_selected_stock(&row).unwrap();
    }
}
