use rusqlite::{Connection, Result};

/// Initialise bus tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_bus_table(conn)?;
    create_checkpoints_table(conn)?;
    Ok(())
}

/// Open the backing store with write-ahead journaling enabled.
///
/// One process owns the file; all stores share the returned connection.
pub fn open_database(path: &str) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(conn)
}

fn create_bus_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS cortex_bus (
            id            TEXT PRIMARY KEY,
            envelope      TEXT NOT NULL,
            state         TEXT NOT NULL DEFAULT 'pending',
            priority      INTEGER NOT NULL,
            enqueued_at   TEXT NOT NULL,
            processed_at  TEXT,
            attempts      INTEGER NOT NULL DEFAULT 0,
            error         TEXT,
            checkpoint_id INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_bus_dequeue
            ON cortex_bus(state, priority, enqueued_at);",
    )
}

fn create_checkpoints_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS cortex_checkpoints (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            created_at       TEXT NOT NULL,
            session_snapshot TEXT NOT NULL,
            channel_states   TEXT NOT NULL,
            pending_ops      TEXT NOT NULL
        );",
    )
}
