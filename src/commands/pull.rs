// ABOUTME: `pull` command: import tables from a sender now or queue them for the worker
// ABOUTME: Reports per-table counts and fails if any table failed

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use rusqlite::Connection;

use super::{connect, ReceiverArgs, RemoteArgs};
use crate::config::MirrorConfig;
use crate::import::ConflictStrategy;
use crate::transport::{TransferAllOptions, TransferOptions};
use crate::worker::{ImportJob, ImportWorker, WorkerOptions};

pub struct PullOptions {
    pub db: PathBuf,
    pub tables: Vec<String>,
    pub strategy: Option<ConflictStrategy>,
    pub batch_size: Option<u32>,
    pub create_missing_tables: bool,
    pub background: bool,
    pub queue: Option<PathBuf>,
}

pub async fn run(
    config: &MirrorConfig,
    remote: &RemoteArgs,
    receiver: ReceiverArgs,
    opts: PullOptions,
) -> Result<()> {
    let defaults = TransferOptions {
        strategy: opts.strategy.unwrap_or(config.transfer.strategy),
        batch_size: opts.batch_size.unwrap_or(config.transfer.batch_size).max(1),
        create_missing_tables: opts.create_missing_tables || config.transfer.create_missing_tables,
    };

    let mut client = connect(config, remote, receiver.clone()).await?;

    if opts.background {
        let tables = if opts.tables.is_empty() {
            let listing = client.list_tables().await;
            client.disconnect().await;
            listing?.into_iter().map(|t| t.name).collect()
        } else {
            client.disconnect().await;
            opts.tables
        };

        let queue_path = opts.queue.unwrap_or_else(|| config.worker.queue_path());
        let worker = ImportWorker::new(
            opts.db,
            queue_path,
            WorkerOptions::from_config(config, receiver.into()),
        );
        for table in tables {
            let id = worker.submit(&ImportJob {
                table: table.clone(),
                strategy: defaults.strategy,
                create_missing_tables: defaults.create_missing_tables,
                sender_url: remote.url.clone(),
                session_code: remote.code.clone(),
                batch_size: defaults.batch_size,
            })?;
            println!("Queued '{}' as job {}", table, id);
        }
        return Ok(());
    }

    let mut local = Connection::open(&opts.db)
        .with_context(|| format!("Failed to open local database {}", opts.db.display()))?;

    let options = TransferAllOptions {
        tables: if opts.tables.is_empty() {
            None
        } else {
            Some(opts.tables)
        },
        strategies: Default::default(),
        defaults,
    };
    let results = client.transfer_all(&mut local, &options).await;
    client.disconnect().await;
    let results = results?;

    println!();
    println!("========================================");
    println!("Transfer complete");
    println!("========================================");
    let mut failed = 0;
    for (table, outcome) in &results {
        match outcome {
            Ok(result) => {
                println!(
                    "  {}: created {}, updated {}, skipped {}, errors {}",
                    table,
                    result.created,
                    result.updated,
                    result.skipped,
                    result.errors.len()
                );
                for err in result.errors.iter().take(5) {
                    println!("      - {}", err.reason);
                }
            }
            Err(err) => {
                failed += 1;
                println!("  {}: FAILED ({})", table, err);
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} tables failed", failed, results.len());
    }
    Ok(())
}
