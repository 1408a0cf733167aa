// ABOUTME: `tables` and `schema` commands for looking at a sender before pulling
// ABOUTME: Output is a plain listing or pretty JSON

use anyhow::Result;

use super::{connect, ReceiverArgs, RemoteArgs};
use crate::config::MirrorConfig;

pub async fn tables(config: &MirrorConfig, remote: &RemoteArgs, receiver: ReceiverArgs) -> Result<()> {
    let mut client = connect(config, remote, receiver).await?;
    let listing = client.list_tables().await;
    client.disconnect().await;
    let tables = listing?;

    if tables.is_empty() {
        println!("The sender offers no tables.");
        return Ok(());
    }

    let width = tables.iter().map(|t| t.name.len()).max().unwrap_or(0);
    for table in &tables {
        println!("{:<width$}  ~{} rows", table.name, table.estimated_count, width = width);
    }
    Ok(())
}

pub async fn schema(
    config: &MirrorConfig,
    remote: &RemoteArgs,
    receiver: ReceiverArgs,
    table: &str,
) -> Result<()> {
    let mut client = connect(config, remote, receiver).await?;
    let schema = client.get_schema(table).await;
    client.disconnect().await;

    println!("{}", serde_json::to_string_pretty(&schema?)?);
    Ok(())
}
