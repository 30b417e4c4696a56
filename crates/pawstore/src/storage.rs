//! Storage trait and the in-memory backend

use std::collections::HashMap;

use ahash::RandomState;
use parking_lot::RwLock;

use crate::error::{Error, Result};

/// Usage report comparable to a browser storage estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageEstimate {
    /// Bytes currently used
    pub usage: u64,
    /// Bytes available in total
    pub quota: u64,
}

impl StorageEstimate {
    /// Usage as a percentage of quota (0.0 when the quota is zero)
    pub fn usage_percent(&self) -> f64 {
        if self.quota == 0 {
            0.0
        } else {
            self.usage as f64 / self.quota as f64 * 100.0
        }
    }
}

/// Durable string key/value storage
///
/// Every method takes `&self`; implementations handle their own locking.
pub trait Storage: Send + Sync {
    /// Read the value stored under `key`
    fn get_item(&self, key: &str) -> Result<Option<String>>;

    /// Write `value` under `key`, replacing any previous value
    fn set_item(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`; removing a missing key is not an error
    fn remove_item(&self, key: &str) -> Result<()>;

    /// All keys, sorted
    fn keys(&self) -> Result<Vec<String>>;

    /// Number of stored keys
    fn len(&self) -> usize;

    /// Check if no keys are stored
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes used by keys and values
    fn usage_bytes(&self) -> u64;

    /// Configured quota, if any
    fn quota_bytes(&self) -> Option<u64>;

    /// Usage and quota, when a quota is configured
    fn estimate(&self) -> Option<StorageEstimate> {
        self.quota_bytes().map(|quota| StorageEstimate {
            usage: self.usage_bytes(),
            quota,
        })
    }
}

/// Key/value map with byte usage accounting, shared by the backends
#[derive(Debug, Default)]
pub(crate) struct Entries {
    map: HashMap<String, String, RandomState>,
    usage: u64,
}

fn entry_bytes(key: &str, value: &str) -> u64 {
    (key.len() + value.len()) as u64
}

impl Entries {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, key: &str) -> Option<&String> {
        self.map.get(key)
    }

    /// Fail if writing `key`/`value` would push usage past `quota`
    pub(crate) fn check_quota(&self, key: &str, value: &str, quota: Option<u64>) -> Result<()> {
        let Some(quota) = quota else {
            return Ok(());
        };

        let replaced = self
            .map
            .get(key)
            .map(|old| entry_bytes(key, old))
            .unwrap_or(0);
        let needed = self.usage - replaced + entry_bytes(key, value);

        if needed > quota {
            return Err(Error::QuotaExceeded { needed, quota });
        }
        Ok(())
    }

    pub(crate) fn insert(&mut self, key: String, value: String) {
        let added = entry_bytes(&key, &value);
        if let Some(old) = self.map.insert(key.clone(), value) {
            self.usage -= entry_bytes(&key, &old);
        }
        self.usage += added;
    }

    pub(crate) fn remove(&mut self, key: &str) -> bool {
        match self.map.remove(key) {
            Some(old) => {
                self.usage -= entry_bytes(key, &old);
                true
            }
            None => false,
        }
    }

    pub(crate) fn sorted_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.map.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.map.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    pub(crate) fn usage(&self) -> u64 {
        self.usage
    }
}

/// Non-durable backend, used for session-scoped data and tests
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<Entries>,
    quota: Option<u64>,
}

impl MemoryStorage {
    /// Create an unbounded in-memory storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an in-memory storage that rejects writes past `quota` bytes
    pub fn with_quota(quota: u64) -> Self {
        Self {
            entries: RwLock::new(Entries::new()),
            quota: Some(quota),
        }
    }
}

impl Storage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write();
        entries.check_quota(key, value, self.quota)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.read().sorted_keys())
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }

    fn usage_bytes(&self) -> u64 {
        self.entries.read().usage()
    }

    fn quota_bytes(&self) -> Option<u64> {
        self.quota
    }
}
