//! Ledger configuration.
//!
//! Settings come from an optional JSON file and may be overridden through
//! environment variables:
//!
//! ```json
//! { "min_interval_secs": 60 }
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Environment variable overriding [`LedgerConfig::min_interval_secs`].
pub const MIN_INTERVAL_ENV: &str = "VEIL_MIN_INTERVAL_SECS";

/// Default seconds between contributions of the same principal.
pub const DEFAULT_MIN_INTERVAL_SECS: u64 = 60;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid JSON for this schema.
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    /// An override or field had an unusable value.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Tunables for a ledger instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LedgerConfig {
    /// Minimum seconds between two contributions of one principal.
    ///
    /// `0` accepts any timestamp not earlier than the principal's last one.
    #[serde(default = "default_min_interval")]
    pub min_interval_secs: u64,
}

fn default_min_interval() -> u64 {
    DEFAULT_MIN_INTERVAL_SECS
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: DEFAULT_MIN_INTERVAL_SECS,
        }
    }
}

impl LedgerConfig {
    /// Config with the given interval.
    pub fn with_min_interval(min_interval_secs: u64) -> Self {
        Self { min_interval_secs }
    }

    /// Loads from JSON; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Applies overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary lookup, so tests need not touch the process env.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(MIN_INTERVAL_ENV).filter(|v| !v.trim().is_empty()) {
            self.min_interval_secs = raw.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("{MIN_INTERVAL_ENV} must be an integer, got {raw:?}"))
            })?;
        }
        Ok(self)
    }

    /// Persists as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}
