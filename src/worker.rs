// ABOUTME: Background import worker draining the durable job queue
// ABOUTME: Each job connects to a sender, pulls one table, and records the outcome

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use tokio::time::interval;
use transfer_queue::{JobQueue, JobStatus, NewJob};

use crate::config::MirrorConfig;
use crate::error::TransferError;
use crate::import::{ConflictStrategy, TransferResult};
use crate::session::{is_well_formed_code, ReceiverIdentity};
use crate::transport::{Client, ConnectOptions, TransferOptions};
use crate::utils::{retry_with_backoff, validate_identifier};

/// A table import to run in the background.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportJob {
    pub table: String,
    pub strategy: ConflictStrategy,
    pub create_missing_tables: bool,
    pub sender_url: String,
    pub session_code: String,
    pub batch_size: u32,
}

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub poll_interval: Duration,
    /// Attempts per job before it is marked failed. Only transient failures
    /// are retried.
    pub max_attempts: u32,
    /// Extra connection attempts within one job attempt.
    pub connect_retries: u32,
    pub connect: ConnectOptions,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_attempts: 3,
            connect_retries: 2,
            connect: ConnectOptions::default(),
        }
    }
}

impl WorkerOptions {
    pub fn from_config(config: &MirrorConfig, receiver: ReceiverIdentity) -> Self {
        Self {
            poll_interval: config.worker.poll_interval(),
            max_attempts: config.worker.max_attempts.max(1),
            connect_retries: 2,
            connect: ConnectOptions {
                timeout: config.transfer.timeout(),
                receiver,
            },
        }
    }
}

/// Outcome of one processed job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub job_id: i64,
    pub table: String,
    /// Queue status after recording the outcome.
    pub status: JobStatus,
    pub outcome: std::result::Result<TransferResult, TransferError>,
}

/// Pulls queued tables into the receiver's database.
pub struct ImportWorker {
    local_path: PathBuf,
    queue_path: PathBuf,
    options: WorkerOptions,
}

impl ImportWorker {
    pub fn new(local_path: PathBuf, queue_path: PathBuf, options: WorkerOptions) -> Self {
        Self {
            local_path,
            queue_path,
            options,
        }
    }

    fn open_queue(&self) -> Result<JobQueue> {
        JobQueue::open(&self.queue_path)
    }

    /// Queue a job and return its id.
    pub fn submit(&self, job: &ImportJob) -> Result<i64> {
        validate_identifier(&job.table)?;
        if !is_well_formed_code(&job.session_code) {
            bail!("'{}' is not a valid connection code", job.session_code);
        }
        if job.batch_size == 0 {
            bail!("batch size must be greater than zero");
        }

        let id = self.open_queue()?.enqueue(&NewJob {
            table_name: job.table.clone(),
            strategy: job.strategy.as_str().to_string(),
            create_missing_tables: job.create_missing_tables,
            sender_url: job.sender_url.clone(),
            session_code: job.session_code.clone(),
            batch_size: job.batch_size,
        })?;
        tracing::info!(
            "Queued import of '{}' from {} as job {}",
            job.table,
            job.sender_url,
            id
        );
        Ok(id)
    }

    /// Claim and run the oldest pending job, if any.
    pub async fn run_once(&self) -> Result<Option<JobReport>> {
        let Some(job) = self.open_queue()?.claim_next()? else {
            return Ok(None);
        };

        tracing::info!(
            "Starting job {} ('{}', attempt {})",
            job.job_id,
            job.table_name,
            job.attempts
        );
        let outcome = self.perform(&job).await;

        let queue = self.open_queue()?;
        let status = match &outcome {
            Ok(result) => {
                let encoded = serde_json::to_string(result)
                    .context("failed to encode transfer result")?;
                queue.complete(job.job_id, &encoded)?;
                tracing::info!(
                    "Job {} done: created={} updated={} skipped={} errors={}",
                    job.job_id,
                    result.created,
                    result.updated,
                    result.skipped,
                    result.errors.len()
                );
                JobStatus::Done
            }
            Err(err) => {
                // Permanent failures are not worth another attempt
                let max_attempts = if err.is_transient() {
                    self.options.max_attempts
                } else {
                    0
                };
                let status = queue.fail(job.job_id, &err.to_string(), max_attempts)?;
                tracing::warn!("Job {} failed ({}): {}", job.job_id, status.as_str(), err);
                status
            }
        };

        Ok(Some(JobReport {
            job_id: job.job_id,
            table: job.table_name,
            status,
            outcome,
        }))
    }

    /// Run pending jobs until the queue is empty. Returns how many ran.
    pub async fn drain(&self) -> Result<usize> {
        let mut processed = 0;
        while self.run_once().await?.is_some() {
            processed += 1;
        }
        Ok(processed)
    }

    /// Poll the queue until `shutdown` fires.
    pub async fn run(&self, mut shutdown: tokio::sync::broadcast::Receiver<()>) -> Result<()> {
        let requeued = self.open_queue()?.requeue_running()?;
        if requeued > 0 {
            tracing::warn!("Requeued {} interrupted jobs", requeued);
        }

        let mut poll = interval(self.options.poll_interval);
        tracing::info!(
            "Starting ImportWorker with poll_interval={:?}, queue={}",
            self.options.poll_interval,
            self.queue_path.display()
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, stopping ImportWorker");
                    break;
                }
                _ = poll.tick() => {
                    tokio::select! {
                        result = self.drain() => {
                            match result {
                                Ok(0) => {}
                                Ok(n) => tracing::info!("Processed {} jobs", n),
                                Err(e) => tracing::error!("Worker cycle failed: {:#}", e),
                            }
                        }
                        _ = shutdown.recv() => {
                            tracing::info!("Shutdown during job, stopping ImportWorker");
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn perform(
        &self,
        job: &transfer_queue::ImportJob,
    ) -> std::result::Result<TransferResult, TransferError> {
        let strategy: ConflictStrategy = job.strategy.parse().map_err(TransferError::Protocol)?;
        let mut local = Connection::open(&self.local_path)?;

        let url = job.sender_url.as_str();
        let code = job.session_code.as_str();
        let connect = &self.options.connect;
        let mut client = retry_with_backoff(
            move || Client::connect(url, code, connect.clone()),
            self.options.connect_retries,
            Duration::from_secs(1),
            TransferError::is_transient,
        )
        .await?;

        let options = TransferOptions {
            strategy,
            batch_size: job.batch_size,
            create_missing_tables: job.create_missing_tables,
        };
        let outcome = client.transfer(&mut local, &job.table_name, &options).await;
        client.disconnect().await;
        outcome
    }
}
