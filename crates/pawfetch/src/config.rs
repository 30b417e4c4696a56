//! Optimizer configuration

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

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

/// Debounce delays by UI operation, in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceDelays {
    /// Search-as-you-type
    pub search: u64,
    /// Filter changes
    pub filter: u64,
    /// Autocomplete suggestions
    pub autocomplete: u64,
    /// Form validation
    pub validation: u64,
}

impl Default for DebounceDelays {
    fn default() -> Self {
        Self {
            search: 300,
            filter: 200,
            autocomplete: 150,
            validation: 500,
        }
    }
}

/// Throttle delays by UI event, in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleDelays {
    /// Scroll handlers
    pub scroll: u64,
    /// Resize handlers
    pub resize: u64,
    /// Pointer movement
    pub mousemove: u64,
    /// Analytics beacons
    pub analytics: u64,
}

impl Default for ThrottleDelays {
    fn default() -> Self {
        Self {
            scroll: 100,
            resize: 250,
            mousemove: 50,
            analytics: 1000,
        }
    }
}

/// Response TTL by resource category, in minutes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheTtl {
    /// Category name to TTL; a category matches a URL path segment it prefixes
    pub categories: BTreeMap<String, u64>,
    /// TTL for URLs matching no category (static content)
    pub default_minutes: u64,
}

impl Default for CacheTtl {
    fn default() -> Self {
        let categories = [("products", 30), ("categories", 60), ("user", 15), ("search", 10)]
            .into_iter()
            .map(|(name, minutes)| (name.to_string(), minutes))
            .collect();

        Self {
            categories,
            default_minutes: 120,
        }
    }
}

impl CacheTtl {
    /// TTL for `url`: the longest category prefixing any path segment wins
    pub fn ttl_for(&self, url: &str) -> Duration {
        let path = url.split(['?', '#']).next().unwrap_or(url);

        let minutes = self
            .categories
            .iter()
            .filter(|(name, _)| {
                path.split('/')
                    .any(|segment| !segment.is_empty() && segment.starts_with(name.as_str()))
            })
            .max_by_key(|(name, _)| name.len())
            .map(|(_, minutes)| *minutes)
            .unwrap_or(self.default_minutes);

        Duration::from_secs(minutes.saturating_mul(60))
    }
}

/// Request batching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Master switch
    pub enabled: bool,
    /// A window dispatches as soon as it holds this many calls
    pub max_batch_size: usize,
    /// Window length from its first call, in milliseconds
    pub batch_delay_ms: u64,
    /// Endpoint groups eligible for batching; empty means all
    pub enabled_endpoints: Vec<String>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_batch_size: 10,
            batch_delay_ms: 100,
            enabled_endpoints: vec![
                "products".to_string(),
                "users".to_string(),
                "orders".to_string(),
            ],
        }
    }
}

impl BatchConfig {
    /// Batch window length
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    /// Whether calls for `group` are batched
    pub fn applies_to(&self, group: &str) -> bool {
        self.enabled
            && (self.enabled_endpoints.is_empty()
                || self.enabled_endpoints.iter().any(|g| g == group))
    }
}

/// Retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds
    pub base_delay_ms: u64,
    /// Double the delay on every further retry
    pub exponential_backoff: bool,
    /// HTTP statuses worth retrying
    pub retryable_status_codes: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            exponential_backoff: true,
            retryable_status_codes: vec![408, 429, 500, 502, 503, 504],
        }
    }
}

impl RetryConfig {
    /// Delay before retry `attempt` (1 for the first retry)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let millis = if self.exponential_backoff {
            let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
            self.base_delay_ms.saturating_mul(factor)
        } else {
            self.base_delay_ms
        };
        Duration::from_millis(millis)
    }
}

/// Request optimizer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Base URL relative request paths resolve against
    pub base_url: String,
    /// Debounce delays
    pub debounce: DebounceDelays,
    /// Throttle delays
    pub throttle: ThrottleDelays,
    /// Response TTLs
    pub cache_ttl: CacheTtl,
    /// Batching
    pub batch: BatchConfig,
    /// Retry policy
    pub retry: RetryConfig,
    /// Default limit for request queues
    pub concurrency_limit: usize,
    /// Default per-request timeout, in milliseconds
    pub request_timeout_ms: u64,
    /// Period of the metrics log, in seconds
    pub metrics_interval_secs: u64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            debounce: DebounceDelays::default(),
            throttle: ThrottleDelays::default(),
            cache_ttl: CacheTtl::default(),
            batch: BatchConfig::default(),
            retry: RetryConfig::default(),
            concurrency_limit: 5,
            request_timeout_ms: 30_000,
            metrics_interval_secs: 5 * 60,
        }
    }
}

impl OptimizerConfig {
    /// Default request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Metrics log period
    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_secs)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if url::Url::parse(&self.base_url).is_err() {
            return Err(ConfigError::InvalidValue {
                field: "base_url",
                reason: format!("'{}' is not an absolute URL", self.base_url),
            });
        }

        if self.batch.max_batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "batch.max_batch_size",
                reason: "must be at least 1".to_string(),
            });
        }

        if self.concurrency_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "concurrency_limit",
                reason: "must be at least 1".to_string(),
            });
        }

        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout_ms",
                reason: "must be positive".to_string(),
            });
        }

        if let Some(code) = self
            .retry
            .retryable_status_codes
            .iter()
            .find(|code| !(100..=599).contains(*code))
        {
            return Err(ConfigError::InvalidValue {
                field: "retry.retryable_status_codes",
                reason: format!("{} is not an HTTP status", code),
            });
        }

        Ok(())
    }
}
