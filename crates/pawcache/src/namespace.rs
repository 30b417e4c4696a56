//! Cache namespaces and entry expiry

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Logical partition of the cache keyspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    /// API responses
    Api,
    /// User data
    User,
    /// Short-lived scratch data
    Temp,
    /// Image payloads
    Images,
    /// Application configuration
    Config,
}

impl Namespace {
    /// Every namespace, in a fixed order
    pub const ALL: [Namespace; 5] = [
        Namespace::Api,
        Namespace::User,
        Namespace::Temp,
        Namespace::Images,
        Namespace::Config,
    ];

    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Api => "api",
            Namespace::User => "user",
            Namespace::Temp => "temp",
            Namespace::Images => "images",
            Namespace::Config => "config",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Namespace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Namespace::ALL
            .into_iter()
            .find(|ns| ns.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown namespace '{}'", s))
    }
}

/// Key prefix per namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespacePrefixes {
    /// Prefix for API responses
    pub api: String,
    /// Prefix for user data
    pub user: String,
    /// Prefix for scratch data
    pub temp: String,
    /// Prefix for image payloads
    pub images: String,
    /// Prefix for application configuration
    pub config: String,
}

impl Default for NamespacePrefixes {
    fn default() -> Self {
        Self {
            api: "vp_api_".to_string(),
            user: "vp_user_".to_string(),
            temp: "vp_temp_".to_string(),
            images: "vp_img_".to_string(),
            config: "vp_config_".to_string(),
        }
    }
}

impl NamespacePrefixes {
    /// Prefix for `namespace`
    pub fn get(&self, namespace: Namespace) -> &str {
        match namespace {
            Namespace::Api => &self.api,
            Namespace::User => &self.user,
            Namespace::Temp => &self.temp,
            Namespace::Images => &self.images,
            Namespace::Config => &self.config,
        }
    }

    /// Check whether `key` belongs to any namespace
    pub fn owns(&self, key: &str) -> bool {
        Namespace::ALL
            .into_iter()
            .any(|ns| key.starts_with(self.get(ns)))
    }

    /// Prefixes must be non-empty and must not shadow one another
    pub fn validate(&self) -> Result<(), ConfigError> {
        for ns in Namespace::ALL {
            let prefix = self.get(ns);
            if prefix.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "prefixes",
                    reason: format!("prefix for '{}' is empty", ns),
                });
            }

            for other in Namespace::ALL {
                if other != ns && self.get(other).starts_with(prefix) {
                    return Err(ConfigError::InvalidValue {
                        field: "prefixes",
                        reason: format!(
                            "prefix '{}' of '{}' overlaps prefix of '{}'",
                            prefix, ns, other
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Lifetime requested for a cache write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiry {
    /// Use the configured default TTL
    #[default]
    Default,
    /// Never expires
    Never,
    /// Expires after the given duration
    After(Duration),
}

impl Expiry {
    /// Expire after `minutes`
    pub fn minutes(minutes: u64) -> Self {
        Expiry::After(Duration::from_secs(minutes.saturating_mul(60)))
    }

    /// TTL in milliseconds, `None` for entries that never expire
    pub(crate) fn resolve_millis(self, default: Duration) -> Option<u64> {
        match self {
            Expiry::Default => Some(saturating_millis(default)),
            Expiry::Never => None,
            Expiry::After(ttl) => Some(saturating_millis(ttl)),
        }
    }
}

/// Whole milliseconds of `duration`, capped at `u64::MAX`
pub(crate) fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl From<Option<Duration>> for Expiry {
    fn from(ttl: Option<Duration>) -> Self {
        ttl.map(Expiry::After).unwrap_or(Expiry::Default)
    }
}
