//! Cache configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::namespace::NamespacePrefixes;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Configuration validation failure
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// A field holds a value outside its allowed range
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Offending field
        field: &'static str,
        /// Why the value was rejected
        reason: String,
    },
}

/// Cache store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL applied by `Expiry::Default`, in minutes
    pub default_ttl_minutes: u64,

    /// Size budget for all namespaces together, in MB
    pub max_cache_size_mb: f64,

    /// Entries written under another version are treated as absent
    pub cache_version: String,

    /// Key prefix per namespace
    pub prefixes: NamespacePrefixes,

    /// Entries older than this are dropped when storage runs low, in minutes
    pub aggressive_cleanup_age_minutes: u64,

    /// Storage usage (percent of quota) that triggers aggressive cleanup
    pub usage_threshold_percent: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_minutes: 60,
            max_cache_size_mb: 10.0,
            cache_version: "1.0.0".to_string(),
            prefixes: NamespacePrefixes::default(),
            aggressive_cleanup_age_minutes: 60,
            usage_threshold_percent: 80.0,
        }
    }
}

impl CacheConfig {
    /// Set the size budget in MB
    pub fn with_max_size_mb(mut self, mb: f64) -> Self {
        self.max_cache_size_mb = mb;
        self
    }

    /// Set the size budget in bytes
    pub fn with_budget_bytes(mut self, bytes: u64) -> Self {
        self.max_cache_size_mb = bytes as f64 / BYTES_PER_MB;
        self
    }

    /// Set the cache format version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.cache_version = version.into();
        self
    }

    /// Size budget in bytes
    pub fn budget_bytes(&self) -> u64 {
        (self.max_cache_size_mb * BYTES_PER_MB) as u64
    }

    /// Default TTL as Duration
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_minutes.saturating_mul(60))
    }

    /// Aggressive cleanup age as Duration
    pub fn aggressive_cleanup_age(&self) -> Duration {
        Duration::from_secs(self.aggressive_cleanup_age_minutes.saturating_mul(60))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.max_cache_size_mb.is_finite() || self.max_cache_size_mb <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "max_cache_size_mb",
                reason: format!("must be a positive number, got {}", self.max_cache_size_mb),
            });
        }

        if self.cache_version.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "cache_version",
                reason: "must not be empty".to_string(),
            });
        }

        if !(0.0..=100.0).contains(&self.usage_threshold_percent) {
            return Err(ConfigError::InvalidValue {
                field: "usage_threshold_percent",
                reason: format!(
                    "must be between 0 and 100, got {}",
                    self.usage_threshold_percent
                ),
            });
        }

        self.prefixes.validate()
    }
}

/// Background maintenance schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Period of the expired-entry sweep, in seconds
    pub sweep_interval_secs: u64,

    /// Period of the storage usage check, in seconds
    pub storage_check_interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 30 * 60,
            storage_check_interval_secs: 5 * 60,
        }
    }
}

impl MaintenanceConfig {
    /// Sweep period as Duration
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Storage check period as Duration
    pub fn storage_check_interval(&self) -> Duration {
        Duration::from_secs(self.storage_check_interval_secs)
    }
}
