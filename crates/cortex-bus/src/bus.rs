use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::{debug, info, warn};

use cortex_core::types::Envelope;

use crate::error::{BusError, Result};
use crate::types::{BusEntry, BusState, Checkpoint, CheckpointData};

/// Durable priority queue over the shared SQLite connection.
///
/// Every state change is a single conditional statement, so a transition
/// either persists before the call returns or fails; partial states cannot
/// exist. Recovery after a crash is a sweep over the leftover rows.
pub struct MessageBus {
    db: Arc<Mutex<Connection>>,
}

impl MessageBus {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    /// Create a pending row for the envelope. Returns the envelope id.
    ///
    /// Enqueueing the same id twice is an error — idempotent dedupe is the
    /// caller's responsibility.
    pub fn enqueue(&self, envelope: &Envelope) -> Result<String> {
        let json = serde_json::to_string(envelope)?;
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let inserted = db.execute(
            "INSERT OR IGNORE INTO cortex_bus (id, envelope, state, priority, enqueued_at, attempts)
             VALUES (?1, ?2, 'pending', ?3, ?4, 0)",
            rusqlite::params![envelope.id, json, envelope.priority.rank(), now],
        )?;
        if inserted == 0 {
            return Err(BusError::Duplicate {
                id: envelope.id.clone(),
            });
        }
        debug!(id = %envelope.id, priority = %envelope.priority, channel = %envelope.channel, "envelope enqueued");
        Ok(envelope.id.clone())
    }

    /// The highest-priority pending entry (priority asc, enqueue time asc),
    /// or `None` when the queue is empty. Does not mutate state.
    pub fn dequeue_next(&self) -> Result<Option<BusEntry>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT envelope, state, enqueued_at, processed_at, attempts, error, checkpoint_id
             FROM cortex_bus
             WHERE state = 'pending'
             ORDER BY priority ASC, enqueued_at ASC, rowid ASC
             LIMIT 1",
        )?;
        let mut rows = stmt.query_map([], row_to_entry)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// All pending entries in dequeue order.
    pub fn peek_pending(&self) -> Result<Vec<BusEntry>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT envelope, state, enqueued_at, processed_at, attempts, error, checkpoint_id
             FROM cortex_bus
             WHERE state = 'pending'
             ORDER BY priority ASC, enqueued_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map([], row_to_entry)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// pending→processing; increments the attempt counter.
    ///
    /// A no-op (returns `false`) when the entry is not in pending.
    pub fn mark_processing(&self, id: &str) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE cortex_bus SET state = 'processing', attempts = attempts + 1
             WHERE id = ?1 AND state = 'pending'",
            rusqlite::params![id],
        )?;
        Ok(changed > 0)
    }

    /// processing→completed; records the processed timestamp. Completed is terminal.
    pub fn mark_completed(&self, id: &str) -> Result<()> {
        self.finish(id, BusState::Completed, None)
    }

    /// processing→failed; records the processed timestamp and the error text.
    /// A failed entry may later be retried via [`MessageBus::retry`].
    pub fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        self.finish(id, BusState::Failed, Some(error))
    }

    /// failed→pending: put a failed entry back in the queue.
    pub fn retry(&self, id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE cortex_bus SET state = 'pending', error = NULL
             WHERE id = ?1 AND state = 'failed'",
            rusqlite::params![id],
        )?;
        if changed == 0 {
            return Err(BusError::InvalidTransition {
                id: id.to_string(),
                expected: "failed",
            });
        }
        Ok(())
    }

    pub fn count_pending(&self) -> Result<u64> {
        let db = self.db.lock().unwrap();
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM cortex_bus WHERE state = 'pending'",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Delete completed entries processed before the cutoff. Returns the count.
    pub fn purge_completed(&self, before: &str) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "DELETE FROM cortex_bus
             WHERE state = 'completed' AND processed_at IS NOT NULL AND processed_at < ?1",
            rusqlite::params![before],
        )?;
        if n > 0 {
            info!(count = n, "purged completed bus entries");
        }
        Ok(n)
    }

    /// Insert a checkpoint row; returns its monotonic id.
    pub fn checkpoint(&self, data: &CheckpointData) -> Result<i64> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO cortex_checkpoints (created_at, session_snapshot, channel_states, pending_ops)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                now,
                data.session_snapshot,
                serde_json::to_string(&data.channel_states)?,
                serde_json::to_string(&data.pending_ops)?,
            ],
        )?;
        Ok(db.last_insert_rowid())
    }

    pub fn load_latest_checkpoint(&self) -> Result<Option<Checkpoint>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT id, created_at, session_snapshot, channel_states, pending_ops
             FROM cortex_checkpoints ORDER BY id DESC LIMIT 1",
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        ) {
            Ok((id, created_at, session_snapshot, channel_states, pending_ops)) => {
                Ok(Some(Checkpoint {
                    id,
                    created_at,
                    session_snapshot,
                    channel_states: serde_json::from_str(&channel_states)?,
                    pending_ops: serde_json::from_str(&pending_ops)?,
                }))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(BusError::Database(e)),
        }
    }

    // --- crash-sweep primitives --------------------------------------------

    /// Reset every stalled `processing` row back to `pending`.
    ///
    /// Run once at startup, before the loop ticks; the entries will be
    /// re-picked-up and their attempt counter incremented on next pick-up.
    pub fn reset_stalled(&self) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE cortex_bus SET state = 'pending' WHERE state = 'processing'",
            [],
        )?;
        if n > 0 {
            warn!(count = n, "stalled bus entries reset to pending");
        }
        Ok(n)
    }

    /// Delete rows whose state value is outside the allowed set.
    pub fn remove_orphans(&self) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "DELETE FROM cortex_bus
             WHERE state NOT IN ('pending', 'processing', 'completed', 'failed')",
            [],
        )?;
        if n > 0 {
            warn!(count = n, "orphan bus rows removed");
        }
        Ok(n)
    }

    /// Run SQLite's integrity check; returns the result string ("ok" when clean).
    pub fn integrity_check(&self) -> Result<String> {
        let db = self.db.lock().unwrap();
        let verdict: String = db.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        Ok(verdict)
    }

    fn finish(&self, id: &str, state: BusState, error: Option<&str>) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE cortex_bus SET state = ?2, processed_at = ?3, error = ?4
             WHERE id = ?1 AND state = 'processing'",
            rusqlite::params![id, state.to_string(), now, error],
        )?;
        if changed == 0 {
            return Err(BusError::InvalidTransition {
                id: id.to_string(),
                expected: "processing",
            });
        }
        debug!(id, state = %state, "bus entry finished");
        Ok(())
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<BusEntry> {
    let envelope_json: String = row.get(0)?;
    let state_str: String = row.get(1)?;
    let envelope: Envelope = serde_json::from_str(&envelope_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(BusEntry {
        envelope,
        state: state_str.parse().unwrap_or(BusState::Failed),
        enqueued_at: row.get(2)?,
        processed_at: row.get(3)?,
        attempts: row.get::<_, i64>(4)? as u32,
        error: row.get(5)?,
        checkpoint_id: row.get(6)?,
    })
}
