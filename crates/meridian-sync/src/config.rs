//! # Sync Configuration
//!
//! TOML-backed configuration for the delivery worker and the pull path.
//!
//! ## Example File
//! ```toml
//! poll_interval_secs = 5
//! batch_size = 100
//! max_retries = 10
//! request_timeout_secs = 10
//! retention_days = 7
//! backoff_initial_secs = 2
//! backoff_max_secs = 300
//! ```
//! Every field has a default; an absent file or absent keys fall back to
//! them.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{SyncError, SyncResult};

/// Configuration for the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between outbox sweeps.
    pub poll_interval_secs: u64,

    /// Maximum entries fetched per sweep.
    pub batch_size: u32,

    /// Retry cap per entry. An entry past the cap is skipped and left
    /// FAILED for operator attention; it is never silently dropped.
    pub max_retries: i64,

    /// Per-gateway-call timeout in seconds.
    pub request_timeout_secs: u64,

    /// Days a SYNCED entry is retained before pruning.
    pub retention_days: i64,

    /// Base delay of the per-entry exponential backoff.
    pub backoff_initial_secs: u64,

    /// Upper bound of the per-entry exponential backoff.
    pub backoff_max_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            poll_interval_secs: 5,
            batch_size: 100,
            max_retries: 10,
            request_timeout_secs: 10,
            retention_days: 7,
            backoff_initial_secs: 2,
            backoff_max_secs: 300,
        }
    }
}

impl SyncConfig {
    /// Loads configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading sync config");

        let raw = fs::read_to_string(path)
            .map_err(|e| SyncError::ConfigLoadFailed(format!("{}: {}", path.display(), e)))?;

        toml::from_str(&raw).map_err(|e| SyncError::ConfigLoadFailed(e.to_string()))
    }

    /// Loads from the platform config directory, falling back to defaults
    /// when no file exists yet.
    pub fn load_default() -> Self {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path).unwrap_or_default(),
            _ => SyncConfig::default(),
        }
    }

    /// Platform path of the config file (`<config dir>/sync.toml`).
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "meridian", "meridian-pos")
            .map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    /// Per-call timeout as a Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Sweep interval as a Duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Delay before an entry that already failed `retry_count` times may be
    /// attempted again: `initial * 2^(retry_count - 1)`, capped.
    pub fn retry_delay(&self, retry_count: i64) -> Duration {
        if retry_count <= 0 {
            return Duration::ZERO;
        }
        let exp = (retry_count - 1).min(32) as u32;
        let secs = self
            .backoff_initial_secs
            .saturating_mul(1u64 << exp)
            .min(self.backoff_max_secs);
        Duration::from_secs(secs)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.max_retries, 10);
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let config: SyncConfig = toml::from_str("batch_size = 25").unwrap();
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.max_retries, 10);
    }

    #[test]
    fn test_retry_delay_is_exponential_and_capped() {
        let config = SyncConfig {
            backoff_initial_secs: 2,
            backoff_max_secs: 30,
            ..SyncConfig::default()
        };

        assert_eq!(config.retry_delay(0), Duration::ZERO);
        assert_eq!(config.retry_delay(1), Duration::from_secs(2));
        assert_eq!(config.retry_delay(2), Duration::from_secs(4));
        assert_eq!(config.retry_delay(3), Duration::from_secs(8));
        assert_eq!(config.retry_delay(10), Duration::from_secs(30));
        assert_eq!(config.retry_delay(60), Duration::from_secs(30));
    }
}
