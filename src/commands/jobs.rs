// ABOUTME: `worker` and `jobs` commands for the background import queue
// ABOUTME: The worker runs until Ctrl+C unless --once is given

use std::path::PathBuf;

use anyhow::Result;
use transfer_queue::JobQueue;

use super::ReceiverArgs;
use crate::config::MirrorConfig;
use crate::worker::{ImportWorker, WorkerOptions};

pub async fn worker(
    config: &MirrorConfig,
    db: PathBuf,
    queue: Option<PathBuf>,
    receiver: ReceiverArgs,
    once: bool,
) -> Result<()> {
    let queue_path = queue.unwrap_or_else(|| config.worker.queue_path());
    let worker = ImportWorker::new(
        db,
        queue_path,
        WorkerOptions::from_config(config, receiver.into()),
    );

    if once {
        tracing::info!("Draining job queue once...");
        let processed = worker.drain().await?;
        println!("Processed {} job(s)", processed);
        return Ok(());
    }

    tracing::info!("Starting import worker...");
    tracing::info!("Press Ctrl+C to stop");

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
                let _ = shutdown_tx.send(());
            }
            Err(e) => tracing::error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    worker.run(shutdown_rx).await
}

pub fn list(config: &MirrorConfig, queue: Option<PathBuf>, json: bool) -> Result<()> {
    let queue_path = queue.unwrap_or_else(|| config.worker.queue_path());
    let jobs = JobQueue::open(&queue_path)?.list(None)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&jobs)?);
        return Ok(());
    }

    if jobs.is_empty() {
        println!("No jobs in {}", queue_path.display());
        return Ok(());
    }

    for job in &jobs {
        println!(
            "#{:<5} {:<8} {:<24} {:<9} attempts={} {}",
            job.job_id,
            job.status.as_str(),
            job.table_name,
            job.strategy,
            job.attempts,
            job.last_error.as_deref().unwrap_or("")
        );
    }
    Ok(())
}
