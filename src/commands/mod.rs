// ABOUTME: Command implementations behind the table-mirror CLI
// ABOUTME: send serves tables; tables/schema/pull talk to a sender; worker/jobs drive the queue

pub mod inspect;
pub mod jobs;
pub mod pull;
pub mod send;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use crate::config::MirrorConfig;
use crate::session::ReceiverIdentity;
use crate::transport::{Client, ConnectOptions};

/// Where the sender is and how to authenticate with it.
#[derive(Args, Debug, Clone)]
pub struct RemoteArgs {
    /// Sender URL, e.g. http://192.168.1.20:7878
    #[arg(long, env = "TABLE_MIRROR_URL")]
    pub url: String,
    /// Connection code shown by `table-mirror send`
    #[arg(long, env = "TABLE_MIRROR_CODE")]
    pub code: String,
    /// Per-call timeout in seconds (defaults to transfer.timeout_secs)
    #[arg(long)]
    pub timeout: Option<u64>,
}

/// How this receiver introduces itself to the sender.
#[derive(Args, Debug, Clone, Default)]
pub struct ReceiverArgs {
    #[arg(long = "name", env = "TABLE_MIRROR_NAME", default_value = "")]
    pub name: String,
    #[arg(long = "email", env = "TABLE_MIRROR_EMAIL", default_value = "")]
    pub email: String,
    #[arg(long = "project", env = "TABLE_MIRROR_PROJECT", default_value = "")]
    pub project: String,
    #[arg(long = "site-url", env = "TABLE_MIRROR_SITE_URL", default_value = "")]
    pub site_url: String,
}

impl From<ReceiverArgs> for ReceiverIdentity {
    fn from(args: ReceiverArgs) -> Self {
        Self {
            name: args.name,
            email: args.email,
            project: args.project,
            site_url: args.site_url,
        }
    }
}

pub(crate) fn connect_options(
    config: &MirrorConfig,
    remote: &RemoteArgs,
    receiver: ReceiverArgs,
) -> ConnectOptions {
    ConnectOptions {
        timeout: remote
            .timeout
            .map(|secs| Duration::from_secs(secs.max(1)))
            .unwrap_or_else(|| config.transfer.timeout()),
        receiver: receiver.into(),
    }
}

pub(crate) async fn connect(
    config: &MirrorConfig,
    remote: &RemoteArgs,
    receiver: ReceiverArgs,
) -> Result<Client> {
    let options = connect_options(config, remote, receiver);
    Client::connect(&remote.url, &remote.code, options)
        .await
        .with_context(|| format!("Failed to connect to sender at {}", remote.url))
}
