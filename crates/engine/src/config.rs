//! Engine configuration via `arbor.toml`
//!
//! Every field has a default, so an empty file (or no file at all) gives a
//! working engine. To change settings, edit the file and restart.

use arbor_concurrency::ChangeLogConfig;
use arbor_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Config file name placed next to the data it configures.
pub const CONFIG_FILE_NAME: &str = "arbor.toml";

/// Engine configuration loaded from `arbor.toml`.
///
/// # Example
///
/// ```toml
/// # Per-change execution budget; waiters declare FailedTimeout after it
/// execution_budget_ms = 30000
///
/// # Cache a model snapshot every 10 revisions
/// snapshot_interval = 10
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Per-change deadline in milliseconds.
    #[serde(default = "default_execution_budget_ms")]
    pub execution_budget_ms: u64,
    /// First poll delay while waiting on a conflicting change.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Cap of the doubling poll delay.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Preferred number of revisions per change-log read.
    #[serde(default = "default_change_batch_size")]
    pub change_batch_size: usize,
    /// Standard snapshot cache points are multiples of this.
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval: u64,
    /// Standard cache points probed backward before replaying from scratch.
    #[serde(default = "default_snapshot_probe_count")]
    pub snapshot_probe_count: usize,
    /// Persist revision info every this many stable revisions.
    #[serde(default = "default_revision_persist_interval")]
    pub revision_persist_interval: u64,
}

fn default_execution_budget_ms() -> u64 {
    30_000
}

fn default_initial_backoff_ms() -> u64 {
    10
}

fn default_max_backoff_ms() -> u64 {
    1000
}

fn default_change_batch_size() -> usize {
    32
}

fn default_snapshot_interval() -> u64 {
    10
}

fn default_snapshot_probe_count() -> usize {
    3
}

fn default_revision_persist_interval() -> u64 {
    10
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            execution_budget_ms: default_execution_budget_ms(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            change_batch_size: default_change_batch_size(),
            snapshot_interval: default_snapshot_interval(),
            snapshot_probe_count: default_snapshot_probe_count(),
            revision_persist_interval: default_revision_persist_interval(),
        }
    }
}

impl EngineConfig {
    /// Check that every setting is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero budget, batch size, snapshot
    /// interval or persist interval, or a backoff cap below its start.
    pub fn validate(&self) -> Result<()> {
        let zero = [
            ("execution_budget_ms", self.execution_budget_ms == 0),
            ("change_batch_size", self.change_batch_size == 0),
            ("snapshot_interval", self.snapshot_interval == 0),
            ("revision_persist_interval", self.revision_persist_interval == 0),
        ];
        if let Some((name, _)) = zero.iter().find(|(_, is_zero)| *is_zero) {
            return Err(Error::Config(format!("{} must be greater than zero", name)));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(Error::Config(format!(
                "max_backoff_ms ({}) is below initial_backoff_ms ({})",
                self.max_backoff_ms, self.initial_backoff_ms
            )));
        }
        if self.execution_budget_ms > i64::MAX as u64 {
            return Err(Error::Config("execution_budget_ms is too large".to_string()));
        }
        Ok(())
    }

    /// The change-log tunables derived from this config.
    pub fn change_log_config(&self) -> ChangeLogConfig {
        ChangeLogConfig {
            execution_budget_ms: self.execution_budget_ms as i64,
            batch_size: self.change_batch_size,
            initial_backoff_ms: self.initial_backoff_ms,
            max_backoff_ms: self.max_backoff_ms,
        }
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# arbordb engine configuration
#
# Per-change execution budget in milliseconds. A change still running after
# this long is declared FailedTimeout by whichever writer next waits on it.
execution_budget_ms = 30000

# Poll delays while waiting on a conflicting change (doubling, capped)
initial_backoff_ms = 10
max_backoff_ms = 1000

# Revisions fetched per change-log read
change_batch_size = 32

# Model snapshots are cached at multiples of snapshot_interval; a snapshot
# request probes this many earlier cache points before replaying from scratch
snapshot_interval = 10
snapshot_probe_count = 3

# Revision info is persisted every this many stable revisions
revision_persist_interval = 10
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: EngineConfig = toml::from_str(&content).map_err(|e| {
            Error::Config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                Error::Config(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::Config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
