//! Watcher configuration
//!
//! One TOML document with a section per component. Every section has
//! defaults, so a partial file (or none at all) is valid:
//!
//! ```toml
//! [debounce]
//! window_ms = 150
//!
//! [burst]
//! threshold = 30
//! ```

use crate::burst::BurstConfig;
use crate::debounce::DebounceConfig;
use crate::error::ConfigError;
use crate::ignore::ClassifierConfig;
use crate::recovery::RecoveryConfig;
use crate::rename::RenameConfig;
use crate::scan::ScanConfig;
use crate::source::SourceConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use treewatch_core::default_fold_case;

/// Complete configuration for a [`crate::SessionManager`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Match paths case-insensitively (case-insensitive filesystems)
    ///
    /// Only lookups fold; reported paths keep their on-disk spelling.
    pub fold_case: bool,

    pub classifier: ClassifierConfig,
    pub scan: ScanConfig,
    pub debounce: DebounceConfig,
    pub rename: RenameConfig,
    pub burst: BurstConfig,
    pub recovery: RecoveryConfig,
    pub source: SourceConfig,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            fold_case: default_fold_case(),
            classifier: ClassifierConfig::default(),
            scan: ScanConfig::default(),
            debounce: DebounceConfig::default(),
            rename: RenameConfig::default(),
            burst: BurstConfig::default(),
            recovery: RecoveryConfig::default(),
            source: SourceConfig::default(),
        }
    }
}

impl WatcherConfig {
    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Commented example document with every default spelled out
    pub fn example_toml() -> String {
        let body = Self::default()
            .to_toml_string()
            .unwrap_or_else(|e| format!("# failed to render defaults: {}\n", e));
        format!(
            "# Treewatch configuration\n\
             # Every key is optional; omitted keys keep the values shown here.\n\n{}",
            body
        )
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scan.max_concurrent_io == 0 {
            return Err(ConfigError::invalid("scan.max_concurrent_io", "must be at least 1"));
        }

        if self.debounce.window_ms == 0 {
            return Err(ConfigError::invalid("debounce.window_ms", "must be greater than 0"));
        }
        if self.debounce.max_wait_ms < self.debounce.window_ms {
            return Err(ConfigError::invalid(
                "debounce.max_wait_ms",
                "must not be shorter than debounce.window_ms",
            ));
        }

        if self.rename.window_ms == 0 {
            return Err(ConfigError::invalid("rename.window_ms", "must be greater than 0"));
        }

        if self.burst.window_ms == 0 {
            return Err(ConfigError::invalid("burst.window_ms", "must be greater than 0"));
        }
        if self.burst.threshold == 0 {
            return Err(ConfigError::invalid("burst.threshold", "must be at least 1"));
        }
        if self.burst.max_duration_ms < self.burst.quiet_ms {
            return Err(ConfigError::invalid(
                "burst.max_duration_ms",
                "must not be shorter than burst.quiet_ms",
            ));
        }

        let recovery = &self.recovery;
        if recovery.fast_interval_ms == 0 || recovery.deep_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "recovery.fast_interval_ms",
                "check intervals must be greater than 0",
            ));
        }
        if !(recovery.stale_ratio > 0.0 && recovery.stale_ratio <= 1.0) {
            return Err(ConfigError::invalid("recovery.stale_ratio", "must be in (0, 1]"));
        }
        if !(0.0..1.0).contains(&recovery.jitter) {
            return Err(ConfigError::invalid("recovery.jitter", "must be in [0, 1)"));
        }
        if recovery.base_backoff_ms == 0 {
            return Err(ConfigError::invalid("recovery.base_backoff_ms", "must be greater than 0"));
        }
        if recovery.max_backoff_ms < recovery.base_backoff_ms {
            return Err(ConfigError::invalid(
                "recovery.max_backoff_ms",
                "must not be smaller than recovery.base_backoff_ms",
            ));
        }
        if recovery.max_retries == 0 {
            return Err(ConfigError::invalid("recovery.max_retries", "must be at least 1"));
        }
        if recovery.error_threshold == 0 {
            return Err(ConfigError::invalid("recovery.error_threshold", "must be at least 1"));
        }

        if self.source.poll_interval_ms == 0 {
            return Err(ConfigError::invalid("source.poll_interval_ms", "must be greater than 0"));
        }

        Ok(())
    }
}
