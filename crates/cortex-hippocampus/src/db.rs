use rusqlite::{Connection, Result};

/// Initialise the hot-memory table. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS cortex_hot_memory (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            fact_text        TEXT NOT NULL UNIQUE,
            inserted_at      TEXT NOT NULL,
            last_accessed_at TEXT NOT NULL,
            hit_count        INTEGER NOT NULL DEFAULT 0
        );",
    )
}

/// Initialise the cold-memory table.
///
/// Kept separate from [`init_db`] so a failure here only disables cold
/// memory — hot memory must keep working regardless.
pub fn init_cold(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS cortex_cold_memory (
            rowid       INTEGER PRIMARY KEY AUTOINCREMENT,
            fact_text   TEXT NOT NULL,
            archived_at TEXT NOT NULL,
            embedding   BLOB NOT NULL
        );",
    )
}
