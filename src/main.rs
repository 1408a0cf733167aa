// ABOUTME: CLI entry point for table-mirror
// ABOUTME: Parses commands, sets up logging and config, and routes to handlers

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use table_mirror::commands::{self, ReceiverArgs, RemoteArgs};
use table_mirror::import::ConflictStrategy;

#[derive(Parser)]
#[command(name = "table-mirror")]
#[command(about = "Peer-to-peer table transfer between two running instances", long_about = None)]
#[command(version)]
struct Cli {
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    /// Path to config.toml (defaults to ~/.table-mirror/config.toml)
    #[arg(long, global = true, env = "TABLE_MIRROR_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a send session and serve local tables until Ctrl+C
    Send {
        /// SQLite database to share
        #[arg(long)]
        db: PathBuf,
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:7878")]
        listen: SocketAddr,
    },
    /// List the tables a sender offers
    Tables {
        #[command(flatten)]
        remote: RemoteArgs,
        #[command(flatten)]
        receiver: ReceiverArgs,
    },
    /// Print a remote table's schema as JSON
    Schema {
        #[command(flatten)]
        remote: RemoteArgs,
        #[command(flatten)]
        receiver: ReceiverArgs,
        #[arg(long)]
        table: String,
    },
    /// Import tables from a sender into a local database
    Pull {
        #[command(flatten)]
        remote: RemoteArgs,
        #[command(flatten)]
        receiver: ReceiverArgs,
        /// Local SQLite database to import into
        #[arg(long)]
        db: PathBuf,
        /// Tables to pull (repeatable; default: every table the sender offers)
        #[arg(long = "table")]
        tables: Vec<String>,
        /// Conflict strategy for rows that already exist
        #[arg(long, value_enum)]
        strategy: Option<ConflictStrategy>,
        /// Rows per page
        #[arg(long)]
        batch_size: Option<u32>,
        /// Create missing local tables from the sender's schema
        #[arg(long)]
        create_missing_tables: bool,
        /// Queue one job per table instead of transferring now
        #[arg(long)]
        background: bool,
        /// Job queue path (defaults to worker.queue_path)
        #[arg(long)]
        queue: Option<PathBuf>,
    },
    /// Run queued import jobs
    Worker {
        /// Local SQLite database to import into
        #[arg(long)]
        db: PathBuf,
        /// Job queue path (defaults to worker.queue_path)
        #[arg(long)]
        queue: Option<PathBuf>,
        #[command(flatten)]
        receiver: ReceiverArgs,
        /// Drain the queue once and exit
        #[arg(long)]
        once: bool,
    },
    /// List queued import jobs
    Jobs {
        /// Job queue path (defaults to worker.queue_path)
        #[arg(long)]
        queue: Option<PathBuf>,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // 1. RUST_LOG environment variable has highest precedence
    // 2. --log flag is used if RUST_LOG is not set
    // 3. Default to "info" if neither are provided
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config = table_mirror::config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Send { db, listen } => commands::send::run(&config, db, listen).await,
        Commands::Tables { remote, receiver } => {
            commands::inspect::tables(&config, &remote, receiver).await
        }
        Commands::Schema {
            remote,
            receiver,
            table,
        } => commands::inspect::schema(&config, &remote, receiver, &table).await,
        Commands::Pull {
            remote,
            receiver,
            db,
            tables,
            strategy,
            batch_size,
            create_missing_tables,
            background,
            queue,
        } => {
            commands::pull::run(
                &config,
                &remote,
                receiver,
                commands::pull::PullOptions {
                    db,
                    tables,
                    strategy,
                    batch_size,
                    create_missing_tables,
                    background,
                    queue,
                },
            )
            .await
        }
        Commands::Worker {
            db,
            queue,
            receiver,
            once,
        } => commands::jobs::worker(&config, db, queue, receiver, once).await,
        Commands::Jobs { queue, json } => commands::jobs::list(&config, queue, json),
    }
}
