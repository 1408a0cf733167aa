// ABOUTME: `send` command: open a session and serve local tables until Ctrl+C
// ABOUTME: Dropping the session owner retires the code so it can never be reused

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use crate::config::MirrorConfig;
use crate::session::{Direction, SessionRegistry};
use crate::transport::{SenderConfig, SenderHandle};

pub async fn run(config: &MirrorConfig, db: PathBuf, listen: SocketAddr) -> Result<()> {
    if !db.exists() {
        bail!("Database file not found: {}", db.display());
    }

    let registry = SessionRegistry::new();
    let owner = registry.create_session(Direction::Send);
    let handle = SenderHandle::bind(
        listen,
        registry.clone(),
        SenderConfig {
            db_path: db.clone(),
            deny_list: config.deny_list.to_deny_list(),
        },
    )
    .await?;

    println!();
    println!("========================================");
    println!("Sharing {}", db.display());
    println!("========================================");
    println!("  URL:  {}", handle.url());
    println!("  Code: {}", owner.code());
    println!("  Press Ctrl+C to end the session");
    println!();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    tracing::info!("Ending session");
    if let Some(session) = owner.close() {
        tracing::info!(
            "Session closed after serving {} receiver(s)",
            session.receivers.len()
        );
    }
    registry.end_all();
    handle.shutdown().await?;
    Ok(())
}
