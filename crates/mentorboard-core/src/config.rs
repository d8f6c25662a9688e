//! Refresh configuration
//!
//! Loaded from `mentorboard.toml` (every key optional), then overridden by CLI
//! flags. Durations are whole seconds in the file.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// File name looked up in the data directory when no `--config` is given
pub const CONFIG_FILE_NAME: &str = "mentorboard.toml";

/// Scheduler, claim and hot-cache tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Scheduler cadence
    pub tick_interval_secs: u64,

    /// Rows older than this are refreshed by the sweep
    pub staleness_threshold_secs: u64,

    /// Queue entries claimed per drain
    pub queue_batch_size: usize,

    /// Upper bound on drains per tick (keeps a busy producer from pinning a tick)
    pub max_queue_batches_per_tick: usize,

    /// Stale rows refreshed per tick
    pub sweep_batch_size: usize,

    /// Refreshes in flight at once
    pub max_concurrent_refreshes: usize,

    /// Lifetime of refresh claims and queue claims
    pub claim_timeout_secs: u64,

    /// How long `refresh_now` waits on a claim held elsewhere
    pub claim_wait_timeout_secs: u64,

    /// Per source read deadline
    pub source_read_timeout_secs: u64,

    /// Retry gate after a failed refresh; defaults to the tick interval
    pub retry_delay_secs: Option<u64>,

    /// In-memory hot cache in front of the record store
    pub hot_cache_capacity: u64,
    pub hot_cache_ttl_secs: u64,

    /// Bearer token accepted for operator endpoints (disabled when unset)
    pub operator_token: Option<String>,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 300,
            staleness_threshold_secs: 3600,
            queue_batch_size: 50,
            max_queue_batches_per_tick: 20,
            sweep_batch_size: 100,
            max_concurrent_refreshes: 8,
            claim_timeout_secs: 120,
            claim_wait_timeout_secs: 30,
            source_read_timeout_secs: 10,
            retry_delay_secs: None,
            hot_cache_capacity: 10_000,
            hot_cache_ttl_secs: 60,
            operator_token: None,
        }
    }
}

impl RefreshConfig {
    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path).map_err(|e| CoreError::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| CoreError::ConfigParse {
            path: path.to_path_buf(),
            message: e.message().to_string(),
        })?;
        config.validate()?;
        debug!(path = %path.display(), "Refresh config loaded");
        Ok(config)
    }

    /// Load `<data_dir>/mentorboard.toml` if present, defaults otherwise
    pub fn load_or_default(data_dir: &Path) -> Result<Self, CoreError> {
        let path = data_dir.join(CONFIG_FILE_NAME);
        if path.exists() {
            Self::load(&path)
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let invalid = |message: &str| {
            Err(CoreError::InvalidConfig {
                message: message.to_string(),
            })
        };

        if self.tick_interval_secs == 0 {
            return invalid("tick_interval_secs must be > 0");
        }
        if self.queue_batch_size == 0 || self.sweep_batch_size == 0 {
            return invalid("batch sizes must be > 0");
        }
        if self.max_queue_batches_per_tick == 0 {
            return invalid("max_queue_batches_per_tick must be > 0");
        }
        if self.max_concurrent_refreshes == 0 {
            return invalid("max_concurrent_refreshes must be > 0");
        }
        if self.source_read_timeout_secs == 0 {
            return invalid("source_read_timeout_secs must be > 0");
        }
        if self.claim_timeout_secs <= self.source_read_timeout_secs {
            return invalid("claim_timeout_secs must exceed source_read_timeout_secs");
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn staleness_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.staleness_threshold_secs as i64)
    }

    pub fn claim_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.claim_timeout_secs as i64)
    }

    pub fn claim_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.claim_wait_timeout_secs)
    }

    pub fn source_read_timeout(&self) -> Duration {
        Duration::from_secs(self.source_read_timeout_secs)
    }

    pub fn retry_delay(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.retry_delay_secs.unwrap_or(self.tick_interval_secs) as i64)
    }

    pub fn hot_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.hot_cache_ttl_secs)
    }
}

/// Resolve the data directory: explicit override, else `<local data dir>/mentorboard`
pub fn resolve_data_dir(explicit: Option<PathBuf>) -> Result<PathBuf, CoreError> {
    explicit
        .or_else(|| dirs::data_local_dir().map(|d| d.join("mentorboard")))
        .ok_or(CoreError::DataDirNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = RefreshConfig::default();
        config.validate().unwrap();
        assert_eq!(config.tick_interval(), Duration::from_secs(300));
        assert_eq!(config.retry_delay(), chrono::Duration::seconds(300));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "tick_interval_secs = 60\nsweep_batch_size = 10\n",
        )
        .unwrap();

        let config = RefreshConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.tick_interval_secs, 60);
        assert_eq!(config.sweep_batch_size, 10);
        assert_eq!(config.queue_batch_size, 50);
        assert_eq!(config.retry_delay(), chrono::Duration::seconds(60));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = RefreshConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config, RefreshConfig::default());
    }

    #[test]
    fn test_validate_rejects_short_claim_timeout() {
        let config = RefreshConfig {
            claim_timeout_secs: 5,
            source_read_timeout_secs: 10,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CoreError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_parse_error_names_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "tick_interval_secs = \"soon\"").unwrap();

        let err = RefreshConfig::load(&path).unwrap_err();
        assert!(matches!(err, CoreError::ConfigParse { .. }));
        assert!(err.to_string().contains(CONFIG_FILE_NAME));
    }
}
