use rusqlite::{Connection, Result};

/// Initialise session tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_session_table(conn)?;
    create_channel_states_table(conn)?;
    create_pending_ops_table(conn)?;
    Ok(())
}

fn create_session_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS cortex_session (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            envelope_id TEXT,
            role        TEXT NOT NULL,
            channel     TEXT NOT NULL,
            sender_id   TEXT NOT NULL,
            content     TEXT NOT NULL,
            timestamp   TEXT NOT NULL,
            metadata    TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_session_channel_ts
            ON cortex_session(channel, timestamp);
        CREATE INDEX IF NOT EXISTS idx_session_ts
            ON cortex_session(timestamp);",
    )
}

fn create_channel_states_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS cortex_channel_states (
            channel         TEXT PRIMARY KEY,
            last_message_at TEXT NOT NULL,
            unread_count    INTEGER NOT NULL DEFAULT 0,
            summary         TEXT,
            layer           TEXT NOT NULL DEFAULT 'foreground'
        );",
    )
}

fn create_pending_ops_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS cortex_pending_ops (
            id               TEXT PRIMARY KEY,
            type             TEXT NOT NULL,
            description      TEXT NOT NULL,
            dispatched_at    TEXT NOT NULL,
            expected_channel TEXT NOT NULL,
            status           TEXT NOT NULL DEFAULT 'pending',
            completed_at     TEXT,
            result           TEXT,
            reply_channel    TEXT,
            result_priority  TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_pending_ops_status
            ON cortex_pending_ops(status);",
    )
}
