use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS import_jobs (
    job_id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    table_name             TEXT NOT NULL,
    strategy               TEXT NOT NULL,
    create_missing_tables  INTEGER NOT NULL DEFAULT 0,
    sender_url             TEXT NOT NULL,
    session_code           TEXT NOT NULL,
    batch_size             INTEGER NOT NULL,
    status                 TEXT NOT NULL DEFAULT 'pending',
    attempts               INTEGER NOT NULL DEFAULT 0,
    last_error             TEXT,
    result                 TEXT,
    created_at             TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at             TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_import_jobs_status ON import_jobs(status, job_id);
"#;

const JOB_COLUMNS: &str = "job_id, table_name, strategy, create_missing_tables, sender_url, \
     session_code, batch_size, status, attempts, last_error, result, created_at, updated_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            other => Err(anyhow!("unknown job status: {other}")),
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

/// A table import waiting to be picked up by a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub table_name: String,
    pub strategy: String,
    pub create_missing_tables: bool,
    pub sender_url: String,
    pub session_code: String,
    pub batch_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportJob {
    pub job_id: i64,
    pub table_name: String,
    pub strategy: String,
    pub create_missing_tables: bool,
    pub sender_url: String,
    #[serde(skip_serializing)]
    pub session_code: String,
    pub batch_size: u32,
    pub status: JobStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    /// JSON-encoded outcome, set once the job is done.
    pub result: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ImportJob {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<(Self, String)> {
        let status: String = row.get(7)?;
        Ok((
            ImportJob {
                job_id: row.get(0)?,
                table_name: row.get(1)?,
                strategy: row.get(2)?,
                create_missing_tables: row.get::<_, i64>(3)? != 0,
                sender_url: row.get(4)?,
                session_code: row.get(5)?,
                batch_size: row.get(6)?,
                status: JobStatus::Pending,
                attempts: row.get(8)?,
                last_error: row.get(9)?,
                result: row.get(10)?,
                created_at: row.get(11)?,
                updated_at: row.get(12)?,
            },
            status,
        ))
    }

    fn with_status((mut job, status): (Self, String)) -> Result<Self> {
        job.status = JobStatus::from_str(&status)?;
        Ok(job)
    }
}

pub struct JobQueue {
    path: PathBuf,
    conn: Connection,
}

impl JobQueue {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty() && !p.exists())
        {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create queue directory {}", parent.display())
            })?;
            // Only a directory created here is ours to lock down
            set_owner_perms(parent)?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open job queue {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "wal")
            .context("failed to enable WAL for job queue")?;
        conn.pragma_update(None, "synchronous", "normal").ok();
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .context("failed to set busy timeout")?;
        conn.execute_batch(SCHEMA)
            .context("failed to initialize job queue schema")?;
        Ok(Self {
            path: path.to_path_buf(),
            conn,
        })
    }

    pub fn enqueue(&self, job: &NewJob) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO import_jobs(table_name, strategy, create_missing_tables, sender_url, session_code, batch_size)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                job.table_name,
                job.strategy,
                job.create_missing_tables,
                job.sender_url,
                job.session_code,
                job.batch_size,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Mark the oldest pending job as running and return it.
    pub fn claim_next(&self) -> Result<Option<ImportJob>> {
        let query = format!(
            "UPDATE import_jobs
             SET status = 'running', attempts = attempts + 1, updated_at = CURRENT_TIMESTAMP
             WHERE job_id = (
                 SELECT job_id FROM import_jobs WHERE status = 'pending' ORDER BY job_id ASC LIMIT 1
             )
             RETURNING {JOB_COLUMNS}"
        );
        let claimed = self
            .conn
            .query_row(&query, [], ImportJob::from_row)
            .optional()?;
        claimed.map(ImportJob::with_status).transpose()
    }

    pub fn complete(&self, job_id: i64, result: &str) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE import_jobs
             SET status = 'done', result = ?2, last_error = NULL, updated_at = CURRENT_TIMESTAMP
             WHERE job_id = ?1",
            params![job_id, result],
        )?;
        if updated == 0 {
            return Err(anyhow!("job {job_id} not found"));
        }
        Ok(())
    }

    /// Record a failed attempt. The job goes back to pending until it has
    /// been tried `max_attempts` times, then stays failed.
    pub fn fail(&self, job_id: i64, error: &str, max_attempts: u32) -> Result<JobStatus> {
        let attempts: u32 = self
            .conn
            .query_row(
                "SELECT attempts FROM import_jobs WHERE job_id = ?1",
                [job_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| anyhow!("job {job_id} not found"))?;

        let status = if attempts >= max_attempts {
            JobStatus::Failed
        } else {
            JobStatus::Pending
        };
        self.conn.execute(
            "UPDATE import_jobs
             SET status = ?2, last_error = ?3, updated_at = CURRENT_TIMESTAMP
             WHERE job_id = ?1",
            params![job_id, status.as_str(), error],
        )?;
        Ok(status)
    }

    /// Put jobs left running by a worker that died back in the queue.
    pub fn requeue_running(&self) -> Result<u64> {
        let updated = self.conn.execute(
            "UPDATE import_jobs SET status = 'pending', updated_at = CURRENT_TIMESTAMP
             WHERE status = 'running'",
            [],
        )?;
        Ok(updated as u64)
    }

    pub fn get(&self, job_id: i64) -> Result<Option<ImportJob>> {
        let query = format!("SELECT {JOB_COLUMNS} FROM import_jobs WHERE job_id = ?1");
        let job = self
            .conn
            .query_row(&query, [job_id], ImportJob::from_row)
            .optional()?;
        job.map(ImportJob::with_status).transpose()
    }

    /// Jobs in submission order, optionally only those with `status`.
    pub fn list(&self, status: Option<JobStatus>) -> Result<Vec<ImportJob>> {
        let query = format!(
            "SELECT {JOB_COLUMNS} FROM import_jobs
             WHERE ?1 IS NULL OR status = ?1
             ORDER BY job_id ASC"
        );
        let mut stmt = self.conn.prepare(&query)?;
        let mut rows = stmt.query([status.map(|s| s.as_str())])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(ImportJob::with_status(ImportJob::from_row(row)?)?);
        }
        Ok(out)
    }

    /// Delete done and failed jobs.
    pub fn vacuum_finished(&self) -> Result<u64> {
        let deleted = self.conn.execute(
            "DELETE FROM import_jobs WHERE status IN ('done', 'failed')",
            [],
        )?;
        Ok(deleted as u64)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn set_owner_perms(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let metadata = fs::metadata(path)?;
    let mut perms = metadata.permissions();
    perms.set_mode(0o700);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_owner_perms(_path: &Path) -> Result<()> {
    Ok(())
}
