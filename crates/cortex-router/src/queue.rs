use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::{info, warn};

use crate::error::{Result, RouterError};
use crate::types::{JobStatus, RouterJob, Tier};

/// Error string recorded when a hung job exhausts its retries.
pub const GATEWAY_CRASH_ERROR: &str = "gateway crash: max retries exceeded";

const SELECT_COLUMNS: &str = "id, type, status, weight, tier, issuer, payload, result, error,
    retry_count, worker_id, last_checkpoint, created_at, updated_at, started_at, finished_at,
    delivered_at";

/// Outcome of a recovery or watchdog sweep.
#[derive(Debug, Default)]
pub struct RecoveryOutcome {
    /// Jobs put back in rotation (evaluating→in_queue, stale→pending).
    pub recovered: usize,
    /// Jobs failed permanently this sweep.
    pub failed: usize,
    /// The permanently failed jobs, for redelivery through the notifier.
    pub failed_jobs: Vec<RouterJob>,
}

/// Durable job queue with a FIFO dequeue and a terminal archive.
///
/// The live table only ever contains in-flight work; completed and failed
/// jobs move to `jobs_archive` after delivery.
pub struct RouterQueue {
    db: Arc<Mutex<Connection>>,
}

impl RouterQueue {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    /// Create a row with status `in_queue`. The id is caller-supplied —
    /// for Cortex jobs it is the pre-generated pending-op id.
    pub fn enqueue(&self, id: &str, job_type: &str, payload: &str, issuer: &str) -> Result<RouterJob> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let inserted = db.execute(
            "INSERT OR IGNORE INTO jobs (id, type, status, issuer, payload, retry_count, created_at, updated_at)
             VALUES (?1, ?2, 'in_queue', ?3, ?4, 0, ?5, ?5)",
            rusqlite::params![id, job_type, issuer, payload, now],
        )?;
        if inserted == 0 {
            return Err(RouterError::Duplicate { id: id.to_string() });
        }
        info!(job_id = %id, issuer, "router job enqueued");
        self.get_locked(&db, id)?
            .ok_or_else(|| RouterError::JobNotFound { id: id.to_string() })
    }

    /// Claim the oldest `in_queue` row for evaluation (in_queue→evaluating).
    pub fn dequeue(&self) -> Result<Option<RouterJob>> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let id: Option<String> = match db.query_row(
            "SELECT id FROM jobs WHERE status = 'in_queue' ORDER BY created_at, rowid LIMIT 1",
            [],
            |row| row.get(0),
        ) {
            Ok(id) => Some(id),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(RouterError::Database(e)),
        };
        let Some(id) = id else {
            return Ok(None);
        };
        db.execute(
            "UPDATE jobs SET status = 'evaluating', updated_at = ?2 WHERE id = ?1",
            rusqlite::params![id, now],
        )?;
        self.get_locked(&db, &id)
    }

    /// Claim the oldest retryable `pending` row: tier already set and not
    /// touched for `delay_secs`, so retries don't thrash.
    pub fn dequeue_retry(&self, delay_secs: u64) -> Result<Option<RouterJob>> {
        let cutoff =
            (chrono::Utc::now() - chrono::Duration::seconds(delay_secs as i64)).to_rfc3339();
        let db = self.db.lock().unwrap();
        match db.query_row(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM jobs
                 WHERE status = 'pending' AND tier IS NOT NULL AND updated_at < ?1
                 ORDER BY created_at, rowid LIMIT 1"
            ),
            rusqlite::params![cutoff],
            row_to_job,
        ) {
            Ok(job) => Ok(Some(job)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(RouterError::Database(e)),
        }
    }

    /// Record the evaluator verdict (evaluating→pending).
    pub fn set_evaluated(&self, id: &str, weight: u8) -> Result<()> {
        self.update(
            id,
            "UPDATE jobs SET status = 'pending', weight = ?2, updated_at = ?3 WHERE id = ?1",
            rusqlite::params![id, weight, chrono::Utc::now().to_rfc3339()],
        )
    }

    /// Hand the job to a worker (→in_execution); stamps the first checkpoint.
    pub fn set_dispatched(&self, id: &str, tier: Tier, worker_id: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        self.update(
            id,
            "UPDATE jobs SET status = 'in_execution', tier = ?2, worker_id = ?3,
                 started_at = COALESCE(started_at, ?4), last_checkpoint = ?4, updated_at = ?4
             WHERE id = ?1",
            rusqlite::params![id, tier.to_string(), worker_id, now],
        )
    }

    /// Worker heartbeat — the watchdog's staleness clock.
    pub fn touch_checkpoint(&self, id: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        self.update(
            id,
            "UPDATE jobs SET last_checkpoint = ?2, updated_at = ?2 WHERE id = ?1",
            rusqlite::params![id, now],
        )
    }

    pub fn complete(&self, id: &str, result: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        self.update(
            id,
            "UPDATE jobs SET status = 'completed', result = ?2, finished_at = ?3, updated_at = ?3
             WHERE id = ?1",
            rusqlite::params![id, result, now],
        )
    }

    pub fn fail(&self, id: &str, error: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        self.update(
            id,
            "UPDATE jobs SET status = 'failed', error = ?2, finished_at = ?3, updated_at = ?3
             WHERE id = ?1",
            rusqlite::params![id, error, now],
        )
    }

    pub fn mark_delivered(&self, id: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        self.update(
            id,
            "UPDATE jobs SET delivered_at = ?2, updated_at = ?2 WHERE id = ?1",
            rusqlite::params![id, now],
        )
    }

    pub fn get(&self, id: &str) -> Result<Option<RouterJob>> {
        let db = self.db.lock().unwrap();
        self.get_locked(&db, id)
    }

    /// All live (in-flight) jobs, oldest first.
    pub fn live_jobs(&self) -> Result<Vec<RouterJob>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM jobs ORDER BY created_at, rowid"
        ))?;
        let rows = stmt.query_map([], row_to_job)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Move a terminal job to the archive table and delete it from the live
    /// table, in one transaction.
    pub fn archive(&self, id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let tx = db.unchecked_transaction()?;
        let copied = tx.execute(
            "INSERT INTO jobs_archive SELECT * FROM jobs WHERE id = ?1",
            rusqlite::params![id],
        )?;
        if copied == 0 {
            return Err(RouterError::JobNotFound { id: id.to_string() });
        }
        tx.execute("DELETE FROM jobs WHERE id = ?1", rusqlite::params![id])?;
        tx.commit()?;
        info!(job_id = %id, "job archived");
        Ok(())
    }

    pub fn archived(&self, id: &str) -> Result<Option<RouterJob>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            &format!("SELECT {SELECT_COLUMNS} FROM jobs_archive WHERE id = ?1"),
            rusqlite::params![id],
            row_to_job,
        ) {
            Ok(job) => Ok(Some(job)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(RouterError::Database(e)),
        }
    }

    /// Most recent archive entries, for operator housekeeping.
    pub fn list_archive(&self, limit: usize) -> Result<Vec<RouterJob>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM jobs_archive ORDER BY finished_at DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map(rusqlite::params![limit as i64], row_to_job)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Startup recovery: abandoned `evaluating` rows go back to `in_queue`,
    /// then the stale-execution rule runs once.
    pub fn recover(&self, hang_threshold_secs: u64, max_retries: u32) -> Result<RecoveryOutcome> {
        let now = chrono::Utc::now().to_rfc3339();
        let requeued = {
            let db = self.db.lock().unwrap();
            db.execute(
                "UPDATE jobs SET status = 'in_queue', updated_at = ?1 WHERE status = 'evaluating'",
                rusqlite::params![now],
            )?
        };
        if requeued > 0 {
            warn!(count = requeued, "evaluating jobs requeued on recovery");
        }

        let mut outcome = self.sweep_stale(hang_threshold_secs, max_retries)?;
        outcome.recovered += requeued;
        Ok(outcome)
    }

    /// The stale-checkpoint rule, applied once.
    ///
    /// An `in_execution` job whose last checkpoint is older than the hang
    /// threshold is reset to `pending` with `retry_count + 1` while retries
    /// remain, and failed with [`GATEWAY_CRASH_ERROR`] once they run out.
    pub fn sweep_stale(&self, hang_threshold_secs: u64, max_retries: u32) -> Result<RecoveryOutcome> {
        let cutoff = (chrono::Utc::now()
            - chrono::Duration::seconds(hang_threshold_secs as i64))
        .to_rfc3339();
        let now = chrono::Utc::now().to_rfc3339();

        let stale: Vec<RouterJob> = {
            let db = self.db.lock().unwrap();
            let mut stmt = db.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM jobs
                 WHERE status = 'in_execution'
                   AND COALESCE(last_checkpoint, started_at, created_at) < ?1"
            ))?;
            let rows = stmt.query_map(rusqlite::params![cutoff], row_to_job)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut outcome = RecoveryOutcome::default();
        for job in stale {
            if job.retry_count < max_retries {
                warn!(job_id = %job.id, retry = job.retry_count + 1, "stale job reset for retry");
                self.update(
                    &job.id,
                    "UPDATE jobs SET status = 'pending', retry_count = retry_count + 1, updated_at = ?2
                     WHERE id = ?1",
                    rusqlite::params![job.id, now],
                )?;
                outcome.recovered += 1;
            } else {
                warn!(job_id = %job.id, "stale job exhausted retries, failing permanently");
                self.fail(&job.id, GATEWAY_CRASH_ERROR)?;
                outcome.failed += 1;
                if let Some(failed) = self.get(&job.id)? {
                    outcome.failed_jobs.push(failed);
                }
            }
        }
        Ok(outcome)
    }

    /// Ids of currently stale executions — the watchdog peeks before its
    /// flush delay so writers get a chance to checkpoint.
    pub fn stale_execution_ids(&self, hang_threshold_secs: u64) -> Result<Vec<String>> {
        let cutoff = (chrono::Utc::now()
            - chrono::Duration::seconds(hang_threshold_secs as i64))
        .to_rfc3339();
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id FROM jobs
             WHERE status = 'in_execution'
               AND COALESCE(last_checkpoint, started_at, created_at) < ?1",
        )?;
        let rows = stmt.query_map(rusqlite::params![cutoff], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    fn update(&self, id: &str, sql: &str, params: impl rusqlite::Params) -> Result<()> {
        let db = self.db.lock().unwrap();
        let changed = db.execute(sql, params)?;
        if changed == 0 {
            return Err(RouterError::JobNotFound { id: id.to_string() });
        }
        Ok(())
    }

    fn get_locked(&self, db: &Connection, id: &str) -> Result<Option<RouterJob>> {
        match db.query_row(
            &format!("SELECT {SELECT_COLUMNS} FROM jobs WHERE id = ?1"),
            rusqlite::params![id],
            row_to_job,
        ) {
            Ok(job) => Ok(Some(job)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(RouterError::Database(e)),
        }
    }
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<RouterJob> {
    let status_str: String = row.get(2)?;
    let tier_str: Option<String> = row.get(4)?;
    Ok(RouterJob {
        id: row.get(0)?,
        job_type: row.get(1)?,
        status: status_str.parse().unwrap_or(JobStatus::Failed),
        weight: row.get::<_, Option<i64>>(3)?.map(|w| w as u8),
        tier: tier_str.and_then(|t| t.parse().ok()),
        issuer: row.get(5)?,
        payload: row.get(6)?,
        result: row.get(7)?,
        error: row.get(8)?,
        retry_count: row.get::<_, i64>(9)? as u32,
        worker_id: row.get(10)?,
        last_checkpoint: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
        started_at: row.get(14)?,
        finished_at: row.get(15)?,
        delivered_at: row.get(16)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> RouterQueue {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        RouterQueue::new(Arc::new(Mutex::new(conn)))
    }

    fn backdate(q: &RouterQueue, id: &str, column: &str, ts: &str) {
        let db = q.db.lock().unwrap();
        db.execute(
            &format!("UPDATE jobs SET {column} = ?2 WHERE id = ?1"),
            rusqlite::params![id, ts],
        )
        .unwrap();
    }

    #[test]
    fn dequeue_claims_oldest_in_queue() {
        let q = queue();
        q.enqueue("j1", "general", r#"{"task":"first"}"#, "cortex").unwrap();
        q.enqueue("j2", "general", r#"{"task":"second"}"#, "cortex").unwrap();

        let job = q.dequeue().unwrap().unwrap();
        assert_eq!(job.id, "j1");
        assert_eq!(job.status, JobStatus::Evaluating);

        let job = q.dequeue().unwrap().unwrap();
        assert_eq!(job.id, "j2");
        assert!(q.dequeue().unwrap().is_none());
    }

    #[test]
    fn duplicate_enqueue_is_rejected() {
        let q = queue();
        q.enqueue("j1", "general", "{}", "cortex").unwrap();
        assert!(matches!(
            q.enqueue("j1", "general", "{}", "cortex"),
            Err(RouterError::Duplicate { .. })
        ));
    }

    #[test]
    fn dequeue_retry_respects_delay_window() {
        let q = queue();
        q.enqueue("j1", "general", "{}", "cortex").unwrap();
        q.dequeue().unwrap();
        q.set_evaluated("j1", 4).unwrap();
        q.set_dispatched("j1", Tier::Sonnet, "w1").unwrap();
        // Simulate a watchdog reset to pending.
        q.update(
            "j1",
            "UPDATE jobs SET status = 'pending', updated_at = ?2 WHERE id = ?1",
            rusqlite::params!["j1", chrono::Utc::now().to_rfc3339()],
        )
        .unwrap();

        // Touched just now — inside the delay window, not retryable yet.
        assert!(q.dequeue_retry(5).unwrap().is_none());

        backdate(&q, "j1", "updated_at", "2020-01-01T00:00:00+00:00");
        let job = q.dequeue_retry(5).unwrap().unwrap();
        assert_eq!(job.id, "j1");
        assert_eq!(job.tier, Some(Tier::Sonnet));
    }

    #[test]
    fn archive_moves_job_out_of_live_table() {
        let q = queue();
        q.enqueue("j1", "general", "{}", "cortex").unwrap();
        q.dequeue().unwrap();
        q.set_evaluated("j1", 3).unwrap();
        q.set_dispatched("j1", Tier::Haiku, "w1").unwrap();
        q.complete("j1", "done").unwrap();
        q.mark_delivered("j1").unwrap();
        q.archive("j1").unwrap();

        assert!(q.get("j1").unwrap().is_none());
        let archived = q.archived("j1").unwrap().unwrap();
        assert_eq!(archived.status, JobStatus::Completed);
        assert_eq!(archived.result.as_deref(), Some("done"));
        assert!(archived.delivered_at.is_some());
        assert!(q.live_jobs().unwrap().is_empty());
    }

    #[test]
    fn recover_requeues_evaluating_jobs() {
        let q = queue();
        q.enqueue("j1", "general", "{}", "cortex").unwrap();
        q.dequeue().unwrap(); // leaves j1 in evaluating

        let outcome = q.recover(90, 2).unwrap();
        assert_eq!(outcome.recovered, 1);
        assert_eq!(outcome.failed, 0);
        assert_eq!(q.get("j1").unwrap().unwrap().status, JobStatus::InQueue);
    }

    #[test]
    fn hung_job_retries_then_fails_permanently() {
        let q = queue();
        q.enqueue("hang-detect", "general", "{}", "cortex").unwrap();
        q.dequeue().unwrap();
        q.set_evaluated("hang-detect", 5).unwrap();
        q.set_dispatched("hang-detect", Tier::Sonnet, "w1").unwrap();
        // Checkpoint 200 s in the past, retry_count = 0.
        backdate(
            &q,
            "hang-detect",
            "last_checkpoint",
            &(chrono::Utc::now() - chrono::Duration::seconds(200)).to_rfc3339(),
        );

        let outcome = q.sweep_stale(90, 2).unwrap();
        assert_eq!(outcome.recovered, 1);
        let job = q.get("hang-detect").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 1);

        // Exhaust retries and hang again.
        q.set_dispatched("hang-detect", Tier::Sonnet, "w2").unwrap();
        q.update(
            "hang-detect",
            "UPDATE jobs SET retry_count = 2 WHERE id = ?1",
            rusqlite::params!["hang-detect"],
        )
        .unwrap();
        backdate(
            &q,
            "hang-detect",
            "last_checkpoint",
            &(chrono::Utc::now() - chrono::Duration::seconds(200)).to_rfc3339(),
        );

        let outcome = q.sweep_stale(90, 2).unwrap();
        assert_eq!(outcome.failed, 1);
        let job = q.get("hang-detect").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some(GATEWAY_CRASH_ERROR));
        assert_eq!(outcome.failed_jobs[0].id, "hang-detect");
    }

    #[test]
    fn fresh_execution_is_not_stale() {
        let q = queue();
        q.enqueue("j1", "general", "{}", "cortex").unwrap();
        q.dequeue().unwrap();
        q.set_evaluated("j1", 5).unwrap();
        q.set_dispatched("j1", Tier::Sonnet, "w1").unwrap();

        let outcome = q.sweep_stale(90, 2).unwrap();
        assert_eq!(outcome.recovered, 0);
        assert_eq!(outcome.failed, 0);
        assert_eq!(q.get("j1").unwrap().unwrap().status, JobStatus::InExecution);
    }
}
