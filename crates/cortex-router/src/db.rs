use rusqlite::{Connection, Result};

/// Job columns shared by the live and archive tables.
const JOB_COLUMNS: &str = "
    id              TEXT PRIMARY KEY,
    type            TEXT NOT NULL,
    status          TEXT NOT NULL,
    weight          INTEGER,
    tier            TEXT,
    issuer          TEXT NOT NULL,
    payload         TEXT NOT NULL,
    result          TEXT,
    error           TEXT,
    retry_count     INTEGER NOT NULL DEFAULT 0,
    worker_id       TEXT,
    last_checkpoint TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    started_at      TEXT,
    finished_at     TEXT,
    delivered_at    TEXT
";

/// Initialise router tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS jobs ({JOB_COLUMNS});
         CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status, created_at);
         CREATE TABLE IF NOT EXISTS jobs_archive ({JOB_COLUMNS});",
    ))
}
