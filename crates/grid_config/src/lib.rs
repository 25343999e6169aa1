//! Configuration management for GridSync
//!
//! This crate handles loading and validating `gridsync.toml`.

use grid_common::{GridError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Batch-channel / server settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Client-side optimistic update settings
    #[serde(default)]
    pub optimistic: OptimisticConfig,

    /// Offline queue settings
    #[serde(default)]
    pub offline: OfflineConfig,
}

/// Server-side sync configuration ([sync])
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Default strategy id applied when conflicts auto-resolve
    #[serde(default = "default_conflict_strategy")]
    pub conflict_strategy: String,

    /// Days to keep change-log entries before the sweep purges them
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Cap on per-table change history (oldest evicted first)
    #[serde(default = "default_max_history_items")]
    pub max_history_items: usize,

    /// Maximum serialized upload size in bytes
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: usize,

    /// Upload calls allowed per user per minute
    #[serde(default = "default_rate_limit_rpm")]
    pub rate_limit_rpm: usize,

    /// Page size for Download responses
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Screen upload payloads for credential material
    #[serde(default = "default_true")]
    pub screen_credentials: bool,
}

fn default_conflict_strategy() -> String {
    "last_write_wins".to_string()
}
fn default_retention_days() -> u32 {
    30
}
fn default_max_history_items() -> usize {
    1000
}
fn default_max_upload_size() -> usize {
    10 * 1024 * 1024
}
fn default_rate_limit_rpm() -> usize {
    60
}
fn default_page_size() -> usize {
    500
}
fn default_true() -> bool {
    true
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            conflict_strategy: default_conflict_strategy(),
            retention_days: default_retention_days(),
            max_history_items: default_max_history_items(),
            max_upload_size: default_max_upload_size(),
            rate_limit_rpm: default_rate_limit_rpm(),
            page_size: default_page_size(),
            screen_credentials: default_true(),
        }
    }
}

/// Client-side optimistic update configuration ([optimistic])
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimisticConfig {
    /// Apply edits locally before the server acknowledges them
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Milliseconds to wait for an ack before auto-rollback
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,

    /// Pending updates beyond this count are submitted without optimistic display
    #[serde(default = "default_max_pending_updates")]
    pub max_pending_updates: usize,

    /// Remove failed updates and revert the mirror (vs. retain as rejected)
    #[serde(default = "default_true")]
    pub rollback_on_error: bool,

    /// How long a confirmed update stays visible before purging (UI feedback)
    #[serde(default = "default_confirmed_purge_ms")]
    pub confirmed_purge_ms: u64,

    /// Grace window before an auto-applicable conflict resolution fires
    #[serde(default = "default_auto_resolve_grace_ms")]
    pub auto_resolve_grace_ms: u64,
}

fn default_ack_timeout_ms() -> u64 {
    10_000
}
fn default_max_pending_updates() -> usize {
    100
}
fn default_confirmed_purge_ms() -> u64 {
    1_000
}
fn default_auto_resolve_grace_ms() -> u64 {
    1_000
}

impl Default for OptimisticConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            ack_timeout_ms: default_ack_timeout_ms(),
            max_pending_updates: default_max_pending_updates(),
            rollback_on_error: default_true(),
            confirmed_purge_ms: default_confirmed_purge_ms(),
            auto_resolve_grace_ms: default_auto_resolve_grace_ms(),
        }
    }
}

/// Offline queue configuration ([offline])
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineConfig {
    /// Directory where queued changes are persisted while offline
    #[serde(default = "default_queue_dir")]
    pub queue_dir: PathBuf,
}

fn default_queue_dir() -> PathBuf {
    PathBuf::from(".gridsync/offline")
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            queue_dir: default_queue_dir(),
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn from_toml(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.sync.conflict_strategy.is_empty() {
            return Err(GridError::Config(
                "sync.conflict_strategy cannot be empty".to_string(),
            ));
        }
        if self.sync.page_size == 0 {
            return Err(GridError::Config(
                "sync.page_size must be at least 1".to_string(),
            ));
        }
        if self.sync.max_upload_size == 0 {
            return Err(GridError::Config(
                "sync.max_upload_size must be at least 1".to_string(),
            ));
        }
        if self.optimistic.max_pending_updates == 0 {
            return Err(GridError::Config(
                "optimistic.max_pending_updates must be at least 1".to_string(),
            ));
        }
        if self.optimistic.ack_timeout_ms == 0 {
            return Err(GridError::Config(
                "optimistic.ack_timeout_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.sync.conflict_strategy, "last_write_wins");
        assert_eq!(config.sync.retention_days, 30);
        assert_eq!(config.optimistic.ack_timeout_ms, 10_000);
        assert_eq!(config.optimistic.max_pending_updates, 100);
        assert!(config.optimistic.rollback_on_error);
        config.validate().unwrap();
    }

    #[test]
    fn test_from_toml_partial_sections() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("gridsync.toml");
        file.write_str(
            "[sync]\n\
             retention_days = 7\n\
             rate_limit_rpm = 10\n\
             \n\
             [optimistic]\n\
             ack_timeout_ms = 2500\n",
        )
        .unwrap();

        let config = Config::from_toml(file.path()).unwrap();
        assert_eq!(config.sync.retention_days, 7);
        assert_eq!(config.sync.rate_limit_rpm, 10);
        assert_eq!(config.optimistic.ack_timeout_ms, 2500);
        // Untouched fields keep their defaults
        assert_eq!(config.sync.max_history_items, 1000);
        assert_eq!(config.offline.queue_dir, PathBuf::from(".gridsync/offline"));
    }

    #[test]
    fn test_validate_rejects_zero_page_size() {
        let mut config = Config::default();
        config.sync.page_size = 0;
        assert!(config.validate().is_err());
    }
}
