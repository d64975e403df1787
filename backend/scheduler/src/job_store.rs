//! Durable job ledger in SQLite.
//!
//! One row per receipt job. The worker consults it before doing any work so
//! a redelivered job that already succeeded is not appended twice.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use slipscan_core::{JobRecord, JobStatus, ReceiptJob, SlipError, SlipResult};
use uuid::Uuid;

/// Fixed-width timestamps so text ordering matches time ordering.
fn stamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn db_err(e: rusqlite::Error) -> SlipError {
    SlipError::Storage(format!("job store: {e}"))
}

/// How long a `running` claim holds before another delivery may take over.
pub const DEFAULT_RUNNING_LEASE: Duration = Duration::from_secs(15 * 60);

/// Result of trying to claim a job for an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// This caller owns the attempt with the given number.
    Claimed(u32),
    AlreadySucceeded,
    /// Another delivery holds a live claim.
    InProgress,
}

pub struct JobStore {
    conn: Mutex<Connection>,
    lease: Duration,
}

impl JobStore {
    pub fn open(path: &Path) -> SlipResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        Self::init(conn)
    }

    pub fn in_memory() -> SlipResult<Self> {
        Self::init(Connection::open_in_memory().map_err(db_err)?)
    }

    fn init(conn: Connection) -> SlipResult<Self> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS receipt_jobs (
                id          TEXT PRIMARY KEY,
                image_url   TEXT NOT NULL,
                status      TEXT NOT NULL,
                attempts    INTEGER NOT NULL DEFAULT 0,
                last_error  TEXT,
                task_name   TEXT,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS receipt_jobs_created ON receipt_jobs(created_at);
            "#,
        )
        .map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
            lease: DEFAULT_RUNNING_LEASE,
        })
    }

    pub fn with_running_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> SlipResult<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| SlipError::Storage("job store lock poisoned".to_string()))?;
        f(&conn).map_err(db_err)
    }

    /// Insert the job as queued. A job that is already known is left alone.
    pub fn record_queued(&self, job: &ReceiptJob) -> SlipResult<()> {
        let now = stamp(Utc::now());
        self.with_conn(|c| {
            c.execute(
                "INSERT OR IGNORE INTO receipt_jobs (id, image_url, status, attempts, created_at, updated_at)
                 VALUES (?1, ?2, 'queued', 0, ?3, ?4)",
                params![job.id.to_string(), job.image_url, stamp(job.submitted_at), now],
            )
        })?;
        Ok(())
    }

    pub fn set_task_name(&self, id: Uuid, task_name: &str) -> SlipResult<()> {
        self.with_conn(|c| {
            c.execute(
                "UPDATE receipt_jobs SET task_name = ?2, updated_at = ?3 WHERE id = ?1",
                params![id.to_string(), task_name, stamp(Utc::now())],
            )
        })?;
        Ok(())
    }

    /// Claim the job for an attempt and bump its attempt counter.
    ///
    /// The claim is a single conditional UPDATE, so of two overlapping
    /// deliveries only one wins. A `running` job is only reclaimed once its
    /// lease has lapsed, which covers a worker that died mid-attempt.
    pub fn mark_running(&self, id: Uuid) -> SlipResult<Claim> {
        let now = Utc::now();
        let lease_cutoff = chrono::Duration::from_std(self.lease)
            .ok()
            .and_then(|lease| now.checked_sub_signed(lease))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.with_conn(|c| {
            let changed = c.execute(
                "UPDATE receipt_jobs SET status = 'running', attempts = attempts + 1, updated_at = ?2
                 WHERE id = ?1
                   AND (status IN ('queued', 'retrying', 'failed')
                        OR (status = 'running' AND updated_at < ?3))",
                params![id.to_string(), stamp(now), stamp(lease_cutoff)],
            )?;
            let (status, attempts): (String, u32) = c.query_row(
                "SELECT status, attempts FROM receipt_jobs WHERE id = ?1",
                params![id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(match (changed, status.as_str()) {
                (0, "succeeded") => Claim::AlreadySucceeded,
                (0, _) => Claim::InProgress,
                _ => Claim::Claimed(attempts),
            })
        })
    }

    pub fn mark_succeeded(&self, id: Uuid) -> SlipResult<()> {
        self.set_status(id, JobStatus::Succeeded, None)
    }

    pub fn mark_retrying(&self, id: Uuid, error: &str) -> SlipResult<()> {
        self.set_status(id, JobStatus::Retrying, Some(error))
    }

    pub fn mark_failed(&self, id: Uuid, error: &str) -> SlipResult<()> {
        self.set_status(id, JobStatus::Failed, Some(error))
    }

    fn set_status(&self, id: Uuid, status: JobStatus, error: Option<&str>) -> SlipResult<()> {
        self.with_conn(|c| {
            c.execute(
                "UPDATE receipt_jobs SET status = ?2, last_error = COALESCE(?3, last_error), updated_at = ?4
                 WHERE id = ?1",
                params![id.to_string(), status.as_str(), error, stamp(Utc::now())],
            )
        })?;
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> SlipResult<Option<JobRecord>> {
        self.with_conn(|c| {
            c.query_row(
                "SELECT id, image_url, status, attempts, last_error, task_name, created_at, updated_at
                 FROM receipt_jobs WHERE id = ?1",
                params![id.to_string()],
                record_from_row,
            )
            .optional()
        })
    }

    /// Most recently submitted jobs first.
    pub fn recent(&self, limit: usize) -> SlipResult<Vec<JobRecord>> {
        self.with_conn(|c| {
            let mut stmt = c.prepare(
                "SELECT id, image_url, status, attempts, last_error, task_name, created_at, updated_at
                 FROM receipt_jobs ORDER BY created_at DESC, rowid DESC LIMIT ?1",
            )?;
            let records = stmt
                .query_map(params![limit as i64], record_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(records)
        })
    }
}

fn parse_time(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    let id: String = row.get(0)?;
    let status: String = row.get(2)?;
    Ok(JobRecord {
        id: Uuid::parse_str(&id)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?,
        image_url: row.get(1)?,
        status: status.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
        })?,
        attempts: row.get(3)?,
        last_error: row.get(4)?,
        task_name: row.get(5)?,
        created_at: parse_time(6, row.get(6)?)?,
        updated_at: parse_time(7, row.get(7)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle() {
        let store = JobStore::in_memory().unwrap();
        let job = ReceiptJob::new("https://img/a.jpg");
        store.record_queued(&job).unwrap();
        store.set_task_name(job.id, "tasks/1").unwrap();

        assert_eq!(store.mark_running(job.id).unwrap(), Claim::Claimed(1));
        store.mark_retrying(job.id, "gemini returned 503").unwrap();
        assert_eq!(store.mark_running(job.id).unwrap(), Claim::Claimed(2));
        store.mark_succeeded(job.id).unwrap();

        let record = store.get(job.id).unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Succeeded);
        assert_eq!(record.attempts, 2);
        assert_eq!(record.task_name.as_deref(), Some("tasks/1"));
        assert_eq!(record.last_error.as_deref(), Some("gemini returned 503"));
    }

    #[test]
    fn succeeded_jobs_cannot_be_claimed_again() {
        let store = JobStore::in_memory().unwrap();
        let job = ReceiptJob::new("u");
        store.record_queued(&job).unwrap();
        store.mark_running(job.id).unwrap();
        store.mark_succeeded(job.id).unwrap();
        assert_eq!(store.mark_running(job.id).unwrap(), Claim::AlreadySucceeded);
        // Re-recording a known job does not reset it.
        store.record_queued(&job).unwrap();
        assert_eq!(store.get(job.id).unwrap().unwrap().status, JobStatus::Succeeded);
    }

    #[test]
    fn running_job_is_not_claimed_twice() {
        let store = JobStore::in_memory().unwrap();
        let job = ReceiptJob::new("u");
        store.record_queued(&job).unwrap();
        assert_eq!(store.mark_running(job.id).unwrap(), Claim::Claimed(1));
        assert_eq!(store.mark_running(job.id).unwrap(), Claim::InProgress);
        assert_eq!(store.get(job.id).unwrap().unwrap().attempts, 1);
    }

    #[test]
    fn stale_running_claim_can_be_taken_over() {
        let store = JobStore::in_memory().unwrap().with_running_lease(Duration::ZERO);
        let job = ReceiptJob::new("u");
        store.record_queued(&job).unwrap();
        assert_eq!(store.mark_running(job.id).unwrap(), Claim::Claimed(1));
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(store.mark_running(job.id).unwrap(), Claim::Claimed(2));
    }

    #[test]
    fn recent_is_newest_first_and_limited() {
        let store = JobStore::in_memory().unwrap();
        let mut ids = Vec::new();
        for i in 0..3 {
            let mut job = ReceiptJob::new(format!("u{i}"));
            job.submitted_at = Utc::now() + chrono::Duration::seconds(i);
            store.record_queued(&job).unwrap();
            ids.push(job.id);
        }
        let recent = store.recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, ids[2]);
        assert_eq!(recent[1].id, ids[1]);
        assert!(store.get(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn persists_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data/jobs.db");
        let job = ReceiptJob::new("u");
        JobStore::open(&path).unwrap().record_queued(&job).unwrap();
        let reopened = JobStore::open(&path).unwrap();
        assert_eq!(reopened.get(job.id).unwrap().unwrap().status, JobStatus::Queued);
    }
}
