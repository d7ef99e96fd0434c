// src/core/store.rs

//! The embedded state store: a single-writer SQLite database holding the
//! keyed runtime state and the deterministic thread routing table.
//!
//! Every write funnels through one transactional routine with
//! `BEGIN IMMEDIATE` discipline. The routine owns the rollback accounting,
//! including the sticky alert threshold. The caller (`HostCore`) holds the
//! shared lock for the whole call, so read-then-write sequences such as
//! `route_thread` are atomic with respect to other writers.

use std::path::{Path, PathBuf};

use crc::Crc;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use tracing::{debug, warn};

use crate::core::HostError;
use crate::core::metrics::{self, MetricsTable};

/// Key under which the single persisted state row lives.
const STATE_KEY: &str = "default";

/// CRC-32/ISO-HDLC is the polynomial zlib's `crc32` uses, which keeps route
/// assignments identical across every deployment of the wire contract.
const CRC32: Crc<u32> = Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

/// Computes the routing id for a room key: `(crc32(key) % thread_count) + 1`.
pub fn route_id_for(room_key: &str, thread_count: u32) -> i64 {
    i64::from(CRC32.checksum(room_key.as_bytes()) % thread_count) + 1
}

/// Owner of the single writer connection. Shared across handlers behind the
/// host lock; never accessed concurrently.
#[derive(Debug)]
pub struct StateStore {
    conn: Option<Connection>,
    path: PathBuf,
    thread_count: u32,
}

impl StateStore {
    /// Opens (creating if needed) the database at `path` and ensures the
    /// schema exists.
    pub fn open(path: &Path, thread_count: u32) -> Result<Self, HostError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS runtime_state (
                state_key   TEXT PRIMARY KEY,
                state_value TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS thread_routes (
                room_key  TEXT PRIMARY KEY,
                thread_id INTEGER NOT NULL
            );",
        )?;

        debug!("State store opened at {}", path.display());
        Ok(Self {
            conn: Some(conn),
            path: path.to_path_buf(),
            thread_count: thread_count.max(1),
        })
    }

    /// Runs `action` inside an immediate (write-locked) transaction and keeps
    /// the transaction counters in step: begin on entry, commit on success;
    /// on any failure roll back, count the rollback and the error, and once
    /// the rollback count reaches the alert threshold also count a rejected
    /// command. Failures are re-raised to the caller.
    pub fn run_write_txn<F>(&mut self, m: &mut MetricsTable, action: F) -> Result<(), HostError>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> rusqlite::Result<()>,
    {
        m.increment(metrics::DB_TRANSACTION_BEGIN_COUNT, 1);

        let result = (|| -> rusqlite::Result<()> {
            let tx = self
                .conn_mut()?
                .transaction_with_behavior(TransactionBehavior::Immediate)?;
            action(&tx)?;
            tx.commit()
        })();

        match result {
            Ok(()) => {
                m.increment(metrics::DB_COMMIT_COUNT, 1);
                Ok(())
            }
            Err(e) => {
                // The transaction rolled back when it was dropped.
                m.increment(metrics::DB_ROLLBACK_COUNT, 1);
                m.increment(metrics::ERROR_COUNT, 1);
                if m.db_alert_active() {
                    m.increment(metrics::REJECTED_COMMAND_COUNT, 1);
                }
                warn!("Write transaction rolled back: {e}");
                Err(e.into())
            }
        }
    }

    /// Upserts the single state row.
    pub fn save_state(&mut self, m: &mut MetricsTable, value: &str) -> Result<(), HostError> {
        self.run_write_txn(m, |tx| {
            tx.execute(
                "INSERT INTO runtime_state(state_key, state_value) VALUES(?1, ?2)
                 ON CONFLICT(state_key) DO UPDATE SET state_value = excluded.state_value",
                params![STATE_KEY, value],
            )
            .map(|_| ())
        })
    }

    /// Reads the state row, yielding the literal `unset` on absence.
    pub fn load_state(&self) -> Result<String, HostError> {
        let value: Option<String> = self
            .conn()?
            .query_row(
                "SELECT state_value FROM runtime_state WHERE state_key = ?1",
                params![STATE_KEY],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.unwrap_or_else(|| "unset".to_string()))
    }

    pub fn delete_state(&mut self, m: &mut MetricsTable) -> Result<(), HostError> {
        self.run_write_txn(m, |tx| {
            tx.execute(
                "DELETE FROM runtime_state WHERE state_key = ?1",
                params![STATE_KEY],
            )
            .map(|_| ())
        })
    }

    /// Resolves a room key to its thread id. A persisted mapping always wins;
    /// a miss computes the CRC-based id and persists it. The existence check
    /// and the insert share the caller's critical section, so a racing
    /// lookup can never overwrite an already-persisted value.
    pub fn route_thread(&mut self, m: &mut MetricsTable, room_key: &str) -> Result<i64, HostError> {
        let existing: Option<i64> = self
            .conn()?
            .query_row(
                "SELECT thread_id FROM thread_routes WHERE room_key = ?1",
                params![room_key],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }

        let thread_id = route_id_for(room_key, self.thread_count);
        self.run_write_txn(m, |tx| {
            tx.execute(
                "INSERT OR REPLACE INTO thread_routes(room_key, thread_id) VALUES(?1, ?2)",
                params![room_key, thread_id],
            )
            .map(|_| ())
        })?;
        Ok(thread_id)
    }

    pub fn route_count(&self) -> Result<i64, HostError> {
        Ok(self
            .conn()?
            .query_row("SELECT COUNT(*) FROM thread_routes", [], |row| row.get(0))?)
    }

    pub fn state_count(&self) -> Result<i64, HostError> {
        Ok(self
            .conn()?
            .query_row("SELECT COUNT(*) FROM runtime_state", [], |row| row.get(0))?)
    }

    /// Closes the connection. Safe to call once during shutdown; later store
    /// calls fail with an internal error rather than panicking.
    pub fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err((_conn, e)) = conn.close() {
                warn!("Closing state store at {} failed: {e}", self.path.display());
            } else {
                debug!("State store at {} closed.", self.path.display());
            }
        }
    }

    fn conn(&self) -> Result<&Connection, HostError> {
        self.conn
            .as_ref()
            .ok_or_else(|| HostError::Internal("state store is closed".into()))
    }

    fn conn_mut(&mut self) -> rusqlite::Result<&mut Connection> {
        // Mapped to a rusqlite error so the txn routine sees one error type.
        self.conn
            .as_mut()
            .ok_or(rusqlite::Error::InvalidQuery)
    }
}
