//! TOML configuration file

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use pawcache::{CacheConfig, MaintenanceConfig};
use pawfetch::OptimizerConfig;
use serde::Deserialize;

/// Backend settings
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Quota of the storage directory in MB; unlimited when absent
    pub quota_mb: Option<f64>,
}

impl StorageConfig {
    pub fn quota_bytes(&self) -> Option<u64> {
        self.quota_mb.map(|mb| (mb * 1024.0 * 1024.0) as u64)
    }
}

/// Everything `pawctl` reads from `--config`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PawConfig {
    pub storage: StorageConfig,
    pub cache: CacheConfig,
    pub maintenance: MaintenanceConfig,
    pub optimizer: OptimizerConfig,
}

impl PawConfig {
    /// Load and validate `path`, or the defaults when no file is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("failed to read config {}", path.display()))?;
                Self::parse(&text)
                    .with_context(|| format!("invalid config {}", path.display()))?
            }
            None => Self::default(),
        };

        config.cache.validate()?;
        config.optimizer.validate()?;
        Ok(config)
    }

    fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}
