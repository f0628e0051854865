//! Runtime configuration loaded from `<home>/.armada/config.yaml`.
//!
//! Every field has a default, so a missing file or a partial file is fine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, StoreError};
use crate::registry::armada_dir_at;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub reconciler: ReconcilerConfig,
    pub sync: SyncConfig,
}

/// Worker pool and retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Upper bound on concurrent host operations.
    pub workers: usize,
    /// Failures after which a changeset is marked failed.
    pub max_attempts: u32,
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
    /// Request-level timeout for each host call.
    pub host_timeout_secs: u64,
    /// Idle wait between queue polls.
    pub poll_interval_ms: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_attempts: 5,
            backoff_base_secs: 5,
            backoff_max_secs: 600,
            host_timeout_secs: 30,
            poll_interval_ms: 500,
        }
    }
}

impl ReconcilerConfig {
    pub fn host_timeout(&self) -> Duration {
        Duration::from_secs(self.host_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Exponential backoff after the `attempt`th failure (1-based), capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let secs = self.backoff_base_secs.saturating_mul(1u64 << exp);
        Duration::from_secs(secs.min(self.backoff_max_secs))
    }
}

/// Sync scheduling policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Delay for newly published or manually requeued changesets.
    pub priority_delay_secs: u64,
    pub min_delay_secs: u64,
    /// Ceiling for backoff between syncs.
    pub max_delay_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            priority_delay_secs: 30,
            min_delay_secs: 2 * 60,
            max_delay_secs: 8 * 60 * 60,
        }
    }
}

pub fn config_path_at(home: &Path) -> PathBuf {
    home.join(".armada").join("config.yaml")
}

/// Load config; a missing file yields [`Config::default`].
pub fn load_at(home: &Path) -> Result<Config, StoreError> {
    let path = config_path_at(home);
    let contents = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Config::default()),
        Err(err) => return Err(io_err(&path, err)),
    };
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    serde_yaml::from_str(&contents).map_err(|source| StoreError::Parse { path, source })
}

pub fn save_at(home: &Path, config: &Config) -> Result<(), StoreError> {
    armada_dir_at(home)?;
    let path = config_path_at(home);
    crate::registry::write_atomic(&path, &serde_yaml::to_string(config)?)
}
