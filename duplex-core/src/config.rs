//! Deployment configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.duplex/
//!   config.yaml     (optional; defaults apply when absent)
//!   state/          (one JSON record per artifact, see duplex-sync)
//! ```
//!
//! Every loader has an `_at(home)` form used by tests and a no-arg wrapper
//! that resolves `dirs::home_dir()`. Configuration is immutable once an
//! orchestrator has been built from it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{invalid, ConfigError};

/// Upper bound on `max_retries`.
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// How conflicts are resolved when no human is involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Never resolve automatically.
    #[default]
    Manual,
    /// Two-way union merge with inline markers on overlap.
    AutoMerge,
    /// Remote content wins. Discards the local edit.
    LastWriterWins,
    /// Merge against the stored common ancestor.
    ThreeWayMerge,
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeStrategy::Manual => write!(f, "manual"),
            MergeStrategy::AutoMerge => write!(f, "auto_merge"),
            MergeStrategy::LastWriterWins => write!(f, "last_writer_wins"),
            MergeStrategy::ThreeWayMerge => write!(f, "three_way_merge"),
        }
    }
}

/// What a bidirectional sync does with a checksum mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EscalationPolicy {
    /// Every mismatch becomes a conflict; clock concurrency only upgrades
    /// its type.
    #[default]
    Strict,
    /// Consult causality first: a side that strictly dominates, or the only
    /// side that changed since the last sync, is fast-forwarded.
    Causal,
}

/// Construction-time settings for the sync core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    pub strategy: MergeStrategy,
    pub escalation: EscalationPolicy,
    pub auto_sync: bool,
    pub auto_sync_interval_secs: u64,
    /// Consumed by the external watcher layer; carried here so one file
    /// configures the whole deployment.
    pub file_watch: bool,
    /// Extra attempts after the first failed remote apply.
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// Root for persisted sync state. `None` keeps state in memory only.
    pub storage_root: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            strategy: MergeStrategy::Manual,
            escalation: EscalationPolicy::Strict,
            auto_sync: false,
            auto_sync_interval_secs: 300,
            file_watch: false,
            max_retries: 3,
            retry_backoff_ms: 200,
            storage_root: None,
        }
    }
}

impl SyncConfig {
    pub fn with_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_escalation(mut self, escalation: EscalationPolicy) -> Self {
        self.escalation = escalation;
        self
    }

    pub fn with_storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.storage_root = Some(root.into());
        self
    }

    pub fn auto_sync_interval(&self) -> Duration {
        Duration::from_secs(self.auto_sync_interval_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Reject settings that cannot work. Called by every constructor that
    /// accepts a config.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auto_sync && self.auto_sync_interval_secs == 0 {
            return Err(invalid(
                "auto_sync_interval_secs",
                "must be greater than zero when auto_sync is enabled",
            ));
        }
        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(invalid(
                "max_retries",
                format!("{} exceeds the limit of {MAX_RETRIES_LIMIT}", self.max_retries),
            ));
        }
        if let Some(root) = &self.storage_root {
            if root.as_os_str().is_empty() {
                return Err(invalid("storage_root", "must not be empty"));
            }
            if root.is_file() {
                return Err(invalid(
                    "storage_root",
                    format!("{} is a file, expected a directory", root.display()),
                ));
            }
        }
        Ok(())
    }

    /// Parse and validate YAML. `origin` is only used in error messages.
    pub fn from_yaml_str(yaml: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: SyncConfig = serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }
}

/// `<home>/.duplex/`
pub fn duplex_root_at(home: &Path) -> PathBuf {
    home.join(".duplex")
}

/// `<home>/.duplex/config.yaml`
pub fn config_path_at(home: &Path) -> PathBuf {
    duplex_root_at(home).join("config.yaml")
}

/// Load `<home>/.duplex/config.yaml`.
///
/// Returns validated defaults (with `storage_root` pointing at
/// `<home>/.duplex`) when the file does not exist. A relative
/// `storage_root` in the file is resolved against `<home>/.duplex`.
pub fn load_at(home: &Path) -> Result<SyncConfig, ConfigError> {
    let path = config_path_at(home);
    let mut config = if path.exists() {
        let contents = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io {
            path: path.clone(),
            source: e,
        })?;
        SyncConfig::from_yaml_str(&contents, &path)?
    } else {
        SyncConfig::default()
    };

    config.storage_root = Some(match config.storage_root.take() {
        Some(root) if root.is_relative() => duplex_root_at(home).join(root),
        Some(root) => root,
        None => duplex_root_at(home),
    });
    config.validate()?;
    Ok(config)
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<SyncConfig, ConfigError> {
    load_at(&home()?)
}

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_valid_and_manual() {
        let config = SyncConfig::default();
        config.validate().expect("defaults validate");
        assert_eq!(config.strategy, MergeStrategy::Manual);
        assert_eq!(config.escalation, EscalationPolicy::Strict);
    }

    #[test]
    fn zero_interval_rejected_only_when_auto_sync_enabled() {
        let mut config = SyncConfig {
            auto_sync_interval_secs: 0,
            ..SyncConfig::default()
        };
        config.validate().expect("disabled auto-sync ignores interval");

        config.auto_sync = true;
        let err = config.validate().expect_err("zero interval");
        assert!(err.to_string().contains("auto_sync_interval_secs"));
    }

    #[test]
    fn too_many_retries_rejected() {
        let config = SyncConfig {
            max_retries: MAX_RETRIES_LIMIT + 1,
            ..SyncConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation {
                field: "max_retries",
                ..
            })
        ));
    }

    #[test]
    fn storage_root_pointing_at_file_rejected() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("not-a-dir");
        std::fs::write(&file, "x").unwrap();
        let config = SyncConfig::default().with_storage_root(&file);
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_without_file_returns_defaults_rooted_at_home() {
        let home = TempDir::new().unwrap();
        let config = load_at(home.path()).unwrap();
        assert_eq!(config.strategy, MergeStrategy::Manual);
        assert_eq!(config.storage_root, Some(home.path().join(".duplex")));
    }
}
