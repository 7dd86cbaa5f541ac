use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::{debug, info};

use cortex_core::types::Envelope;

use crate::error::{Result, SessionError};
use crate::types::{
    AttentionLayer, ChannelState, OpStatus, PendingOp, Role, SessionMessage,
};

/// Sender id for assistant rows the loop writes.
pub const CORTEX_SENDER: &str = "cortex";
/// Sender id for archived task-result rows.
pub const OPS_SENDER: &str = "cortex:ops";
/// Sender id for synthetic system rows (ops-trigger sentinel).
pub const SYSTEM_SENDER: &str = "cortex:system";

/// Content of the assistant row recorded when a turn produces no output.
pub const SILENCE_MARKER: &str = "[silence]";

/// Unified store for the conversation log, channel states and pending ops.
///
/// Wraps the shared SQLite connection; every mutation is a single statement
/// except terminal-op archival, which runs one transaction per op.
pub struct SessionStore {
    db: Arc<Mutex<Connection>>,
}

impl SessionStore {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    // --- conversation log --------------------------------------------------

    /// Append an inbound envelope as one user row.
    pub fn append_envelope(&self, envelope: &Envelope) -> Result<i64> {
        let metadata = if envelope.meta.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&envelope.meta)?)
        };
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO cortex_session (envelope_id, role, channel, sender_id, content, timestamp, metadata)
             VALUES (?1, 'user', ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                envelope.id,
                envelope.channel,
                envelope.sender.id,
                envelope.content,
                envelope.timestamp,
                metadata,
            ],
        )?;
        Ok(db.last_insert_rowid())
    }

    /// Append a synthetic user row (e.g. the ops-trigger sentinel) so the
    /// foreground still ends with a user-role message.
    pub fn append_user(
        &self,
        channel: &str,
        sender_id: &str,
        content: &str,
        envelope_id: Option<&str>,
    ) -> Result<i64> {
        self.append(Role::User, channel, sender_id, content, envelope_id, None)
    }

    /// Append one assistant row for an output target.
    pub fn append_assistant(&self, channel: &str, content: &str) -> Result<i64> {
        self.append(Role::Assistant, channel, CORTEX_SENDER, content, None, None)
    }

    /// Record a turn that produced no output targets.
    pub fn append_silence(&self, channel: &str) -> Result<i64> {
        self.append(
            Role::Assistant,
            channel,
            CORTEX_SENDER,
            SILENCE_MARKER,
            None,
            None,
        )
    }

    fn append(
        &self,
        role: Role,
        channel: &str,
        sender_id: &str,
        content: &str,
        envelope_id: Option<&str>,
        metadata: Option<&serde_json::Value>,
    ) -> Result<i64> {
        let now = chrono::Utc::now().to_rfc3339();
        let metadata = metadata.map(|m| m.to_string());
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO cortex_session (envelope_id, role, channel, sender_id, content, timestamp, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![envelope_id, role.to_string(), channel, sender_id, content, now, metadata],
        )?;
        Ok(db.last_insert_rowid())
    }

    /// Fetch history, optionally restricted to a channel and a `before`
    /// timestamp cutoff. Rows come back in ascending timestamp, ascending id.
    pub fn history(
        &self,
        channel: Option<&str>,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SessionMessage>> {
        let db = self.db.lock().unwrap();
        // Take the newest `limit` matching rows, then flip to chronological.
        let mut stmt = db.prepare(
            "SELECT id, envelope_id, role, channel, sender_id, content, timestamp, metadata
             FROM cortex_session
             WHERE (?1 IS NULL OR channel = ?1)
               AND (?2 IS NULL OR timestamp < ?2)
             ORDER BY timestamp DESC, id DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![channel, before, limit as i64],
            row_to_message,
        )?;
        let mut messages = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }

    /// Number of session rows on a channel.
    pub fn count_rows(&self, channel: &str) -> Result<u64> {
        let db = self.db.lock().unwrap();
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM cortex_session WHERE channel = ?1",
            rusqlite::params![channel],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// The oldest `n` rows on a channel, chronological. Compaction input.
    pub fn oldest_rows(&self, channel: &str, n: usize) -> Result<Vec<SessionMessage>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, envelope_id, role, channel, sender_id, content, timestamp, metadata
             FROM cortex_session
             WHERE channel = ?1
             ORDER BY timestamp ASC, id ASC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![channel, n as i64], row_to_message)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Delete compacted rows by id. Returns how many went away.
    pub fn delete_rows(&self, ids: &[i64]) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let mut deleted = 0;
        for id in ids {
            deleted += db.execute(
                "DELETE FROM cortex_session WHERE id = ?1",
                rusqlite::params![id],
            )?;
        }
        Ok(deleted)
    }

    // --- channel states ----------------------------------------------------

    /// Record an inbound message on a channel: bumps last-message time and
    /// unread count, pulls the channel into the foreground. Creates the row
    /// on first reference.
    pub fn record_incoming(&self, channel: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO cortex_channel_states (channel, last_message_at, unread_count, layer)
             VALUES (?1, ?2, 1, 'foreground')
             ON CONFLICT(channel) DO UPDATE SET
               last_message_at = excluded.last_message_at,
               unread_count = unread_count + 1,
               layer = 'foreground'",
            rusqlite::params![channel, now],
        )?;
        Ok(())
    }

    /// Reset the unread counter after the loop replied on a channel.
    pub fn mark_read(&self, channel: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE cortex_channel_states SET unread_count = 0 WHERE channel = ?1",
            rusqlite::params![channel],
        )?;
        Ok(())
    }

    /// Move a channel between attention layers. The layer is the only field
    /// other components may mutate after creation.
    pub fn set_layer(&self, channel: &str, layer: AttentionLayer) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE cortex_channel_states SET layer = ?2 WHERE channel = ?1",
            rusqlite::params![channel, layer.to_string()],
        )?;
        Ok(())
    }

    /// Store the compacted summary for a channel (Gardener contract).
    pub fn set_summary(&self, channel: &str, summary: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE cortex_channel_states SET summary = ?2 WHERE channel = ?1",
            rusqlite::params![channel, summary],
        )?;
        Ok(())
    }

    pub fn channel_state(&self, channel: &str) -> Result<Option<ChannelState>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT channel, last_message_at, unread_count, summary, layer
             FROM cortex_channel_states WHERE channel = ?1",
            rusqlite::params![channel],
            row_to_channel_state,
        ) {
            Ok(state) => Ok(Some(state)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(SessionError::Database(e)),
        }
    }

    /// All channel states, sorted by channel for deterministic output.
    pub fn channel_states(&self) -> Result<Vec<ChannelState>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT channel, last_message_at, unread_count, summary, layer
             FROM cortex_channel_states ORDER BY channel",
        )?;
        let rows = stmt.query_map([], row_to_channel_state)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    // --- pending operations ------------------------------------------------

    /// Insert a new pending operation. The id must be core-generated and is
    /// written before the external dispatcher ever sees it.
    pub fn add_op(&self, op: &PendingOp) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO cortex_pending_ops
             (id, type, description, dispatched_at, expected_channel, status,
              completed_at, result, reply_channel, result_priority)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                op.id,
                op.kind.to_string(),
                op.description,
                op.dispatched_at,
                op.expected_channel,
                op.status.to_string(),
                op.completed_at,
                op.result,
                op.reply_channel,
                op.result_priority.map(|p| p.to_string()),
            ],
        )?;
        debug!(op_id = %op.id, kind = %op.kind, "pending op added");
        Ok(())
    }

    /// pending→completed with the result text. Errors if the op is missing
    /// or already terminal.
    pub fn complete_op(&self, id: &str, result: &str) -> Result<()> {
        self.finish_op(id, OpStatus::Completed, result)
    }

    /// pending→failed with the error text.
    pub fn fail_op(&self, id: &str, error: &str) -> Result<()> {
        self.finish_op(id, OpStatus::Failed, error)
    }

    fn finish_op(&self, id: &str, status: OpStatus, text: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE cortex_pending_ops
             SET status = ?2, completed_at = ?3, result = ?4
             WHERE id = ?1 AND status = 'pending'",
            rusqlite::params![id, status.to_string(), now, text],
        )?;
        if changed == 0 {
            let exists: bool = db
                .query_row(
                    "SELECT 1 FROM cortex_pending_ops WHERE id = ?1",
                    rusqlite::params![id],
                    |_| Ok(true),
                )
                .unwrap_or(false);
            return Err(if exists {
                SessionError::OpNotPending { id: id.to_string() }
            } else {
                SessionError::OpNotFound { id: id.to_string() }
            });
        }
        info!(op_id = %id, status = %status, "pending op finished");
        Ok(())
    }

    pub fn op(&self, id: &str) -> Result<Option<PendingOp>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT id, type, description, dispatched_at, expected_channel, status,
                    completed_at, result, reply_channel, result_priority
             FROM cortex_pending_ops WHERE id = ?1",
            rusqlite::params![id],
            row_to_op,
        ) {
            Ok(op) => Ok(Some(op)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(SessionError::Database(e)),
        }
    }

    /// All pending-op rows, oldest dispatch first.
    pub fn ops(&self) -> Result<Vec<PendingOp>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, type, description, dispatched_at, expected_channel, status,
                    completed_at, result, reply_channel, result_priority
             FROM cortex_pending_ops ORDER BY dispatched_at, id",
        )?;
        let rows = stmt.query_map([], row_to_op)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Ops the startup sweep should fail out: still pending from a prior run.
    pub fn pending_ops(&self) -> Result<Vec<PendingOp>> {
        Ok(self
            .ops()?
            .into_iter()
            .filter(|op| op.status == OpStatus::Pending)
            .collect())
    }

    /// Copy each terminal op into the session log and delete it.
    ///
    /// The copy lands as an assistant row tagged `[TASK_RESULT]` or
    /// `[TASK_FAILED]` on the op's reply channel, sender `cortex:ops`. Copy
    /// and delete run in one transaction per op, so an op is either fully
    /// archived or untouched. Returns the number of ops moved.
    pub fn copy_and_delete_terminal_ops(&self) -> Result<usize> {
        let terminal: Vec<PendingOp> = self
            .ops()?
            .into_iter()
            .filter(|op| op.status.is_terminal())
            .collect();

        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let mut moved = 0;
        for op in &terminal {
            let tx = db.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO cortex_session (envelope_id, role, channel, sender_id, content, timestamp)
                 VALUES (NULL, 'assistant', ?1, ?2, ?3, ?4)",
                rusqlite::params![op.target_channel(), OPS_SENDER, archive_row_content(op), now],
            )?;
            tx.execute(
                "DELETE FROM cortex_pending_ops WHERE id = ?1",
                rusqlite::params![op.id],
            )?;
            tx.commit()?;
            moved += 1;
        }
        if moved > 0 {
            info!(count = moved, "terminal ops archived to session log");
        }
        Ok(moved)
    }
}

/// Render the session-log form of a terminal op.
fn archive_row_content(op: &PendingOp) -> String {
    let text = op.result.as_deref().unwrap_or("");
    match op.status {
        OpStatus::Failed => format!(
            "[TASK_FAILED] [TASK_ID]={}, Message='{}', Error='{}'",
            op.id, op.description, text
        ),
        _ => format!(
            "[TASK_RESULT] [TASK_ID]={}, Message='{}', Result='{}'",
            op.id, op.description, text
        ),
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionMessage> {
    let role_str: String = row.get(2)?;
    let metadata: Option<String> = row.get(7)?;
    Ok(SessionMessage {
        id: row.get(0)?,
        envelope_id: row.get(1)?,
        role: role_str.parse().unwrap_or(Role::User),
        channel: row.get(3)?,
        sender_id: row.get(4)?,
        content: row.get(5)?,
        timestamp: row.get(6)?,
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
    })
}

fn row_to_channel_state(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChannelState> {
    let layer_str: String = row.get(4)?;
    Ok(ChannelState {
        channel: row.get(0)?,
        last_message_at: row.get(1)?,
        unread_count: row.get::<_, i64>(2)? as u32,
        summary: row.get(3)?,
        layer: layer_str.parse().unwrap_or(AttentionLayer::Foreground),
    })
}

fn row_to_op(row: &rusqlite::Row<'_>) -> rusqlite::Result<PendingOp> {
    let kind_str: String = row.get(1)?;
    let status_str: String = row.get(5)?;
    let priority_str: Option<String> = row.get(9)?;
    Ok(PendingOp {
        id: row.get(0)?,
        kind: kind_str.parse().unwrap_or(crate::types::OpKind::RouterJob),
        description: row.get(2)?,
        dispatched_at: row.get(3)?,
        expected_channel: row.get(4)?,
        status: status_str.parse().unwrap_or(OpStatus::Pending),
        completed_at: row.get(6)?,
        result: row.get(7)?,
        reply_channel: row.get(8)?,
        result_priority: priority_str.and_then(|p| p.parse().ok()),
    })
}
