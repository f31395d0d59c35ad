//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Services call store methods. They never execute SQL directly.
//!
//! Concurrency: one `LedgerStore` owns one connection. Workers that run on
//! their own thread (simulator tasks, webhook request paths) take their own
//! connection via `reopen()`. Writers serialize on `BEGIN IMMEDIATE` and
//! wait up to the configured busy timeout for the lock.

use crate::{
    clock::millis_to_datetime,
    error::{LedgerError, LedgerResult},
    event::{EventLogEntry, LedgerEvent},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, types::Type, Connection, OpenFlags, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::time::Duration;

mod card;
mod journal;
mod payment;
mod statement;

pub use payment::PaymentFilter;

pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

pub struct LedgerStore {
    conn: Connection,
    path: String,
    busy_timeout_ms: u64,
}

impl LedgerStore {
    /// Open (or create) the ledger database at `path`.
    pub fn open(path: &str) -> LedgerResult<Self> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT_MS)
    }

    pub fn open_with_timeout(path: &str, busy_timeout_ms: u64) -> LedgerResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        // WAL mode only for real files (memdb keeps its rollback journal).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(Duration::from_millis(busy_timeout_ms))?;
        Ok(Self {
            conn,
            path: path.to_string(),
            busy_timeout_ms,
        })
    }

    /// Open a fresh, uniquely named in-memory database (used in tests and
    /// by the runner for `--db :memory:`).
    ///
    /// The database lives in SQLite's `memdb` VFS under a process-wide
    /// name, so `reopen()` yields a second connection onto the same data.
    /// Locking is the ordinary pager kind, so contending connections wait
    /// out the busy timeout. Dropped together with the last connection.
    pub fn in_memory() -> LedgerResult<Self> {
        let name = format!(
            "file:/ledger-{}?vfs=memdb",
            uuid::Uuid::new_v4().simple()
        );
        Self::open_with_timeout(&name, DEFAULT_BUSY_TIMEOUT_MS)
    }

    /// Open another connection onto the same database.
    pub fn reopen(&self) -> LedgerResult<Self> {
        Self::open_with_timeout(&self.path, self.busy_timeout_ms)
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> LedgerResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_ledger.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_allocation_journal.sql"))?;
        Ok(())
    }

    /// Start a write transaction that takes the writer lock up front.
    ///
    /// Everything done through the returned `LedgerTx` commits together on
    /// `commit()`. Dropping it without committing rolls back.
    pub fn begin_immediate(&mut self) -> LedgerResult<LedgerTx<'_>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(LedgerTx { tx })
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn events_for_payment(&self, payment_id: &str) -> LedgerResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, payment_id, event_type, payload, created_at
             FROM event_log WHERE payment_id = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![payment_id], |row| {
                Ok(EventLogEntry {
                    id: Some(row.get(0)?),
                    payment_id: row.get(1)?,
                    event_type: row.get(2)?,
                    payload: row.get(3)?,
                    created_at_ms: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn event_count(&self, event_type: &str) -> LedgerResult<i64> {
        let n = self.conn.query_row(
            "SELECT COUNT(*) FROM event_log WHERE event_type = ?1",
            params![event_type],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}

/// An open `BEGIN IMMEDIATE` transaction on the ledger.
pub struct LedgerTx<'conn> {
    tx: rusqlite::Transaction<'conn>,
}

impl LedgerTx<'_> {
    pub fn commit(self) -> LedgerResult<()> {
        self.tx.commit()?;
        Ok(())
    }

    pub fn append_event(&self, event: &LedgerEvent, at: DateTime<Utc>) -> LedgerResult<()> {
        self.tx.execute(
            "INSERT INTO event_log (payment_id, event_type, payload, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                event.payment_id(),
                event.type_name(),
                serde_json::to_string(event)?,
                at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }
}

// ── Row types ──────────────────────────────────────────────────

/// One applied statement delta, as recorded in the allocation journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationEntryRow {
    pub payment_id: String,
    pub statement_id: String,
    pub amount_applied: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub paid_off: bool,
    pub created_at_ms: i64,
}

// ── Column conversion helpers ──────────────────────────────────

fn parse_column<T>(idx: usize, raw: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = LedgerError>,
{
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn timestamp_column(idx: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    millis_to_datetime(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}
