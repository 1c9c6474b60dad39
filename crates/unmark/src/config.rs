//! TOML configuration for `unmark`.
//!
//! Every section is optional. Command-line flags override file values.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use unmark_engine::PoolSizes;
use unmark_store::MAX_DELETE_KEYS;

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UnmarkConfig {
    /// Remote bucket and call rate.
    pub store: StoreSection,
    /// Worker pool sizing.
    pub pools: PoolsSection,
    /// Receipt fixup settings.
    pub fixup: FixupSection,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[store]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// Bucket to operate on.
    pub bucket: Option<String>,
    /// Bucket region. Discovered from the bucket when unset.
    pub region: Option<String>,
    /// Calls per second: negative disables limiting, `0` picks the default.
    pub rate_limit: i64,
}

/// `[pools]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PoolsSection {
    pub scan_workers: usize,
    pub scan_batch: usize,
    pub restore_workers: usize,
    pub restore_batch: usize,
    pub fixup_workers: usize,
    pub fixup_batch: usize,
    pub queue_capacity: usize,
    /// Delete markers per batch handed to the restore pool.
    pub emit_threshold: usize,
}

impl Default for PoolsSection {
    fn default() -> Self {
        let sizes = PoolSizes::default();
        Self {
            scan_workers: sizes.scan_workers,
            scan_batch: sizes.scan_batch,
            restore_workers: sizes.restore_workers,
            restore_batch: sizes.restore_batch,
            fixup_workers: sizes.fixup_workers,
            fixup_batch: sizes.fixup_batch,
            queue_capacity: sizes.queue_capacity,
            emit_threshold: sizes.emit_threshold,
        }
    }
}

impl PoolsSection {
    /// Pool sizes with every value clamped to at least one.
    ///
    /// `restore_batch` is also capped at the bulk delete limit.
    pub fn sizes(&self) -> PoolSizes {
        PoolSizes {
            scan_workers: self.scan_workers.max(1),
            scan_batch: self.scan_batch.max(1),
            restore_workers: self.restore_workers.max(1),
            restore_batch: self.restore_batch.clamp(1, MAX_DELETE_KEYS),
            fixup_workers: self.fixup_workers.max(1),
            fixup_batch: self.fixup_batch.max(1),
            queue_capacity: self.queue_capacity.max(1),
            emit_threshold: self.emit_threshold.max(1),
        }
    }
}

/// `[fixup]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FixupSection {
    /// Where receipts are downloaded before repair.
    pub staging_dir: Option<PathBuf>,
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`).
    pub level: String,
    /// Log file, or a directory to create a timestamped log file in.
    pub file: Option<PathBuf>,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl UnmarkConfig {
    /// Load config from a TOML file, or defaults if no path is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)?;
                Ok(toml::from_str(&content)?)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }
}
