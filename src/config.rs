// ABOUTME: TOML configuration for deny-lists, transfer defaults, and the job worker
// ABOUTME: Missing files fall back to defaults; CLI flags override loaded values

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::import::ConflictStrategy;
use crate::schema::DenyList;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    pub deny_list: DenyListConfig,
    pub transfer: TransferDefaults,
    pub worker: WorkerConfig,
}

/// Tables that must never be listed or exported.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DenyListConfig {
    pub tables: Vec<String>,
    pub prefixes: Vec<String>,
}

impl Default for DenyListConfig {
    fn default() -> Self {
        let defaults = DenyList::default();
        Self {
            tables: defaults.names().to_vec(),
            prefixes: defaults.prefixes().to_vec(),
        }
    }
}

impl DenyListConfig {
    pub fn to_deny_list(&self) -> DenyList {
        DenyList::new(self.tables.clone(), self.prefixes.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferDefaults {
    pub batch_size: u32,
    pub timeout_secs: u64,
    pub strategy: ConflictStrategy,
    pub create_missing_tables: bool,
}

impl Default for TransferDefaults {
    fn default() -> Self {
        Self {
            batch_size: 500,
            timeout_secs: 30,
            strategy: ConflictStrategy::Skip,
            create_missing_tables: false,
        }
    }
}

impl TransferDefaults {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Path of the SQLite job queue (`~/` is expanded)
    pub queue_path: String,
    pub poll_interval_secs: u64,
    /// Attempts per job before it is marked failed
    pub max_attempts: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_path: "~/.table-mirror/jobs.db".to_string(),
            poll_interval_secs: 5,
            max_attempts: 3,
        }
    }
}

impl WorkerConfig {
    pub fn queue_path(&self) -> PathBuf {
        crate::utils::expand_home(&self.queue_path)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

/// Default config location: `~/.table-mirror/config.toml`.
pub fn default_config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?;
    Ok(home.join(".table-mirror").join("config.toml"))
}

/// Load configuration from `path`, or from the default location when `None`.
///
/// A missing file yields the defaults. A file that exists but does not parse
/// is an error, so a typo never silently re-enables a denied table.
pub fn load(path: Option<&Path>) -> Result<MirrorConfig> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match default_config_path() {
            Ok(p) => p,
            Err(_) => return Ok(MirrorConfig::default()),
        },
    };

    if !path.exists() {
        tracing::debug!("No config at {}, using defaults", path.display());
        return Ok(MirrorConfig::default());
    }

    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    parse(&contents).with_context(|| format!("Failed to parse config file {}", path.display()))
}

pub fn parse(contents: &str) -> Result<MirrorConfig> {
    let config: MirrorConfig = toml::from_str(contents)?;
    if config.transfer.batch_size == 0 {
        anyhow::bail!("transfer.batch_size must be greater than zero");
    }
    Ok(config)
}
