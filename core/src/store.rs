//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Subsystems call store methods and never execute SQL directly.
//!
//! RULE: Shared counters (balances, stock, budgets, goal counters,
//! redemption status) change only through conditional UPDATEs whose
//! guard lives in the WHERE clause. Those methods return `false` when
//! zero rows matched; callers turn that into a typed error, which
//! rolls back the surrounding transaction.

use crate::{
    error::LoyaltyResult,
    event::{EventLogEntry, LoyaltyEvent},
    types::{from_millis, to_millis},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use std::time::Duration;

mod campaign;
mod catalog;
mod ledger;
mod redemption;
mod referral;
mod user;

pub use ledger::ProcessedOrder;
pub use referral::FraudLogRow;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

pub struct LoyaltyStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl LoyaltyStore {
    pub fn open(path: &str) -> LoyaltyResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> LoyaltyResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Reopen a new connection to the same database.
    /// For in-memory databases, this returns a new in-memory database (isolated).
    /// For file-based databases, this opens the same file, one connection
    /// per concurrent caller.
    pub fn reopen(&self) -> LoyaltyResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    pub fn set_busy_timeout(&self, ms: u64) -> LoyaltyResult<()> {
        self.conn.busy_timeout(Duration::from_millis(ms))?;
        Ok(())
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> LoyaltyResult<()> {
        self.conn
            .execute_batch(include_str!("../../migrations/001_loyalty.sql"))?;
        Ok(())
    }

    /// Run `f` inside one IMMEDIATE transaction.
    ///
    /// IMMEDIATE takes the write lock up front, so two operations on the
    /// same user, reward or campaign serialize instead of interleaving
    /// their reads. Any error from `f` drops the transaction, which rolls
    /// back every statement it issued. Never nest calls.
    pub fn with_tx<T>(&self, f: impl FnOnce(&Self) -> LoyaltyResult<T>) -> LoyaltyResult<T> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let out = f(self)?;
        tx.commit()?;
        Ok(out)
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, event: &LoyaltyEvent, at: DateTime<Utc>) -> LoyaltyResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (event_type, payload, created_at) VALUES (?1, ?2, ?3)",
            params![event.type_name(), serde_json::to_string(event)?, to_millis(at)],
        )?;
        Ok(())
    }

    pub fn events(&self, event_type: Option<&str>) -> LoyaltyResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, event_type, payload, created_at
             FROM event_log
             WHERE ?1 IS NULL OR event_type = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![event_type], |row| {
                Ok(EventLogEntry {
                    id: Some(row.get(0)?),
                    event_type: row.get(1)?,
                    payload: row.get(2)?,
                    created_at: from_millis(row.get(3)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

fn bool_to_int(b: bool) -> i64 {
    if b {
        1
    } else {
        0
    }
}
