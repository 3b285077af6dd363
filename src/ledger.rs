// ===============================
// src/ledger.rs (paper ledger)
// ===============================
//
// Durable record of simulated fills plus the decision audit trail. One
// connection behind a mutex: single writer per process, readers share it.
// Aggregates are always derived by query, never stored redundantly.
//
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use thiserror::Error;
use tracing::info;

use crate::domain::{Direction, StrategyDecision};

const LEDGER_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS paper_trades (
    id            TEXT PRIMARY KEY,
    ts_ms         INTEGER NOT NULL,
    symbol        TEXT NOT NULL,
    direction     TEXT NOT NULL,
    size_usdt     REAL NOT NULL,
    fill_price    REAL NOT NULL,
    edge_bps      REAL NOT NULL,
    pnl_usdt      REAL NOT NULL,
    fees_usdt     REAL NOT NULL,
    cex_price     REAL,
    dex_price     REAL,
    decision_id   TEXT NOT NULL
);

-- decision_id is the ledger-layer idempotency key: one fill per decision
CREATE UNIQUE INDEX IF NOT EXISTS idx_paper_trades_decision
    ON paper_trades(decision_id);
CREATE INDEX IF NOT EXISTS idx_paper_trades_ts ON paper_trades(ts_ms);
CREATE INDEX IF NOT EXISTS idx_paper_trades_symbol ON paper_trades(symbol);

CREATE TABLE IF NOT EXISTS decisions (
    id                    TEXT PRIMARY KEY,
    ts_ms                 INTEGER NOT NULL,
    symbol                TEXT NOT NULL,
    raw_spread_bps        REAL NOT NULL,
    estimated_cost_bps    REAL NOT NULL,
    edge_after_costs_bps  REAL NOT NULL,
    would_trade           INTEGER NOT NULL,
    direction             TEXT,
    suggested_size_usdt   REAL NOT NULL,
    reason                TEXT NOT NULL,
    executed              INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_decisions_ts ON decisions(ts_ms);
CREATE INDEX IF NOT EXISTS idx_decisions_symbol ON decisions(symbol);
"#;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger io: {0}")]
    Io(#[from] std::io::Error),
    #[error("ledger sql: {0}")]
    Sql(#[from] rusqlite::Error),
}

/// One simulated fill, ready for insertion.
#[derive(Debug, Clone)]
pub struct PaperFill {
    pub trade_id: String,
    pub ts_ms: i64,
    pub symbol: String,
    pub direction: Direction,
    pub size_usdt: f64,
    pub fill_price: f64,
    pub edge_bps: f64,
    pub pnl_usdt: f64,
    pub fees_usdt: f64,
    pub cex_price: Option<f64>,
    pub dex_price: Option<f64>,
    pub decision_id: String,
}

/// Derived aggregates over all simulated fills.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct LedgerStats {
    pub trades: u64,
    pub total_pnl_usdt: f64,
    pub total_fees_usdt: f64,
    pub wins: u64,
    pub losses: u64,
    pub avg_edge_bps: f64,
}

#[derive(Clone)]
pub struct PaperLedger {
    conn: Arc<Mutex<Connection>>,
}

impl PaperLedger {
    pub fn open(db_path: &str) -> Result<Self, LedgerError> {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(db_path, flags)?;
        conn.execute_batch(LEDGER_SCHEMA)?;
        info!(path = %db_path, "paper ledger opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory ledger for tests.
    pub fn open_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(LEDGER_SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Append-only audit row, one per evaluated decision. Re-inserting the
    /// same decision id (bus redelivery) is a no-op.
    pub fn record_decision(&self, d: &StrategyDecision) -> Result<(), LedgerError> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT OR IGNORE INTO decisions (
                id, ts_ms, symbol, raw_spread_bps, estimated_cost_bps,
                edge_after_costs_bps, would_trade, direction,
                suggested_size_usdt, reason, executed
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0)
            "#,
            params![
                d.id,
                d.ts_ms,
                d.symbol,
                d.raw_spread_bps,
                d.estimated_cost_bps,
                d.edge_after_costs_bps,
                d.would_trade as i64,
                d.direction.map(|x| x.as_str()),
                d.suggested_size_usdt,
                d.reason,
            ],
        )?;
        Ok(())
    }

    /// The only permitted mutation of a decision row.
    pub fn mark_executed(&self, decision_id: &str) -> Result<(), LedgerError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE decisions SET executed = 1 WHERE id = ?1",
            params![decision_id],
        )?;
        Ok(())
    }

    /// Ledger-layer idempotency: has a fill already been written for this
    /// decision?
    pub fn has_decision(&self, decision_id: &str) -> Result<bool, LedgerError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM paper_trades WHERE decision_id = ?1",
            params![decision_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Insert a simulated fill. Returns false (no-op) when a fill for the
    /// same decision already exists — defense in depth under redelivery.
    pub fn record_fill(&self, fill: &PaperFill) -> Result<bool, LedgerError> {
        let conn = self.conn.lock();
        let inserted = conn.execute(
            r#"
            INSERT OR IGNORE INTO paper_trades (
                id, ts_ms, symbol, direction, size_usdt, fill_price,
                edge_bps, pnl_usdt, fees_usdt, cex_price, dex_price, decision_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                fill.trade_id,
                fill.ts_ms,
                fill.symbol,
                fill.direction.as_str(),
                fill.size_usdt,
                fill.fill_price,
                fill.edge_bps,
                fill.pnl_usdt,
                fill.fees_usdt,
                fill.cex_price,
                fill.dex_price,
                fill.decision_id,
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn stats(&self) -> Result<LedgerStats, LedgerError> {
        let conn = self.conn.lock();
        conn.query_row(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(pnl_usdt), 0.0),
                COALESCE(SUM(fees_usdt), 0.0),
                COALESCE(SUM(CASE WHEN pnl_usdt > 0 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN pnl_usdt < 0 THEN 1 ELSE 0 END), 0),
                COALESCE(AVG(edge_bps), 0.0)
            FROM paper_trades
            "#,
            [],
            |row| {
                Ok(LedgerStats {
                    trades: row.get::<_, i64>(0)? as u64,
                    total_pnl_usdt: row.get(1)?,
                    total_fees_usdt: row.get(2)?,
                    wins: row.get::<_, i64>(3)? as u64,
                    losses: row.get::<_, i64>(4)? as u64,
                    avg_edge_bps: row.get(5)?,
                })
            },
        )
        .map_err(LedgerError::from)
    }

    pub fn decision_count(&self) -> Result<u64, LedgerError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM decisions", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(id: &str, would_trade: bool) -> StrategyDecision {
        StrategyDecision {
            id: id.to_string(),
            ts_ms: 1_700_000_000_000,
            symbol: "TKNUSDT".to_string(),
            cex_bid: 1.0,
            cex_ask: 1.001,
            dex_price: 1.01,
            raw_spread_bps: 90.0,
            estimated_cost_bps: 40.0,
            edge_after_costs_bps: 50.0,
            would_trade,
            direction: Some(Direction::BuyCexSellDex),
            suggested_size_usdt: 500.0,
            reason: "test".to_string(),
        }
    }

    fn fill(trade_id: &str, decision_id: &str, pnl: f64) -> PaperFill {
        PaperFill {
            trade_id: trade_id.to_string(),
            ts_ms: 1_700_000_000_000,
            symbol: "TKNUSDT".to_string(),
            direction: Direction::BuyCexSellDex,
            size_usdt: 500.0,
            fill_price: 1.005,
            edge_bps: 50.0,
            pnl_usdt: pnl,
            fees_usdt: 1.5,
            cex_price: Some(1.0),
            dex_price: Some(1.01),
            decision_id: decision_id.to_string(),
        }
    }

    #[test]
    fn decision_insert_is_idempotent() {
        let ledger = PaperLedger::open_memory().unwrap();
        let d = decision("D-1", false);
        ledger.record_decision(&d).unwrap();
        ledger.record_decision(&d).unwrap();
        assert_eq!(ledger.decision_count().unwrap(), 1);
    }

    #[test]
    fn second_fill_for_same_decision_is_a_no_op() {
        let ledger = PaperLedger::open_memory().unwrap();
        assert!(!ledger.has_decision("D-1").unwrap());
        assert!(ledger.record_fill(&fill("T-1", "D-1", 10.0)).unwrap());
        assert!(ledger.has_decision("D-1").unwrap());
        // retried fill, different trade id, same decision
        assert!(!ledger.record_fill(&fill("T-2", "D-1", 10.0)).unwrap());
        let stats = ledger.stats().unwrap();
        assert_eq!(stats.trades, 1);
    }

    #[test]
    fn stats_are_derived_aggregates() {
        let ledger = PaperLedger::open_memory().unwrap();
        ledger.record_fill(&fill("T-1", "D-1", 12.0)).unwrap();
        ledger.record_fill(&fill("T-2", "D-2", -4.0)).unwrap();
        ledger.record_fill(&fill("T-3", "D-3", 6.0)).unwrap();

        let stats = ledger.stats().unwrap();
        assert_eq!(stats.trades, 3);
        assert!((stats.total_pnl_usdt - 14.0).abs() < 1e-9);
        assert!((stats.total_fees_usdt - 4.5).abs() < 1e-9);
        assert_eq!(stats.wins, 2);
        assert_eq!(stats.losses, 1);
        assert!((stats.avg_edge_bps - 50.0).abs() < 1e-9);
    }

    #[test]
    fn mark_executed_flips_the_audit_row() {
        let ledger = PaperLedger::open_memory().unwrap();
        ledger.record_decision(&decision("D-9", true)).unwrap();
        ledger.mark_executed("D-9").unwrap();
        let conn = ledger.conn.lock();
        let executed: i64 = conn
            .query_row(
                "SELECT executed FROM decisions WHERE id = 'D-9'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(executed, 1);
    }
}
