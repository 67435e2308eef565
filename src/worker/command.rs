//! Sources backed by external commands, configured in TOML.
//!
//! ```toml
//! [worker]
//! event_type = "DINNER_QUEEN"
//! batch_size = 1
//! batch_delay_ms = 1000
//!
//! [worker.list]
//! command = "scrapers/dinner-queen/list"
//!
//! [worker.refresh]
//! command = "node"
//! args = ["scrapers/dinner-queen.js", "refresh"]
//! ```
//!
//! The list command prints one target id per line on stdout. The refresh
//! command gets the target id appended after its configured `args`. Both see
//! `REFRESHQ_EVENT_TYPE`; refresh also sees `REFRESHQ_EVENT_ID` and
//! `REFRESHQ_TARGET_ID`. A non-zero exit is a failure.

use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use super::{BatchPolicy, Source};
use crate::error::{Error, Result};
use crate::model::{EventId, EventType};

/// Top-level TOML wrapper.
#[derive(Debug, Deserialize)]
struct WorkerFile {
    worker: WorkerConfig,
}

/// One source's worker definition.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    pub event_type: EventType,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    pub list: HookConfig,
    pub refresh: HookConfig,
}

/// An executable plus leading arguments.
#[derive(Debug, Clone, Deserialize)]
pub struct HookConfig {
    pub command: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_batch_size() -> usize {
    1
}

fn default_batch_delay_ms() -> u64 {
    1000
}

impl WorkerConfig {
    /// Parse a worker definition file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let file: WorkerFile = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("bad worker config {}: {e}", path.display())))?;
        if file.worker.batch_size == 0 {
            return Err(Error::Config(format!(
                "bad worker config {}: batch_size must be at least 1",
                path.display()
            )));
        }
        Ok(file.worker)
    }

    pub fn policy(&self) -> BatchPolicy {
        BatchPolicy {
            batch_size: self.batch_size,
            batch_delay: Duration::from_millis(self.batch_delay_ms),
        }
    }
}

pub struct CommandSource {
    config: WorkerConfig,
}

impl CommandSource {
    pub fn new(config: WorkerConfig) -> Self {
        Self { config }
    }

    fn command(&self, hook: &HookConfig) -> Result<Command> {
        // Relative paths resolve against the process CWD; bare names go
        // through PATH.
        let path = if hook.command.is_relative() && hook.command.components().count() > 1 {
            std::env::current_dir()?.join(&hook.command)
        } else {
            hook.command.clone()
        };
        let mut command = Command::new(path);
        command
            .args(&hook.args)
            .env("REFRESHQ_EVENT_TYPE", self.config.event_type.as_str())
            .kill_on_drop(true);
        Ok(command)
    }
}

fn check_exit(name: &str, output: &Output) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(Error::Other(format!(
        "{name} command exited with status {}: {}",
        output.status.code().unwrap_or(-1),
        stderr.trim()
    )))
}

#[async_trait]
impl Source for CommandSource {
    fn event_type(&self) -> EventType {
        self.config.event_type
    }

    async fn list_targets(&self) -> Result<Vec<String>> {
        debug!(command = %self.config.list.command.display(), "listing targets");
        let output = self.command(&self.config.list)?.output().await?;
        check_exit("list", &output)?;

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn refresh(&self, event_id: EventId, target_id: &str) -> Result<()> {
        debug!(%event_id, target_id, "refreshing target");
        let output = self
            .command(&self.config.refresh)?
            .arg(target_id)
            .env("REFRESHQ_EVENT_ID", event_id.to_string())
            .env("REFRESHQ_TARGET_ID", target_id)
            .output()
            .await?;
        check_exit("refresh", &output)
    }
}
